// FixedUpdate ticks, PostUpdate presents, Last releases on AppExit

use std::marker::PhantomData;
use std::time::Duration;

use bevy::prelude::*;
use bevy::render::renderer::{RenderDevice, RenderQueue};

use crate::config::SlimeConfig;
use crate::driver::SimulationDriver;
use crate::error::SlimeError;
use crate::gpu::ffi::GpuParticle;
use crate::gpu::host::{DisplaySurface, RenderDeviceHost};
use crate::host::{ComputeHost, TextureHandle};
use crate::lifecycle::{EnvironmentMap, InitialParticles, SlimeResources};
use crate::present::PresentationBridge;

const LOG_EVERY_TICKS: u64 = 500;

// ==================== resources ======================================

// optional inputs, inserted before SlimePlugin
#[derive(Resource, Debug, Clone)]
pub struct SlimeEnvironment(pub EnvironmentMap);

#[derive(Resource, Debug, Clone)]
pub struct InitialDistribution(pub Vec<GpuParticle>);

#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlimeStats {
    pub ticks: u64,
    pub presented: u64,
    pub skipped: u64,
    pub failed_presents: u64,
}

/// Host, resources, driver and bridge of one running simulation.
#[derive(Resource)]
pub struct SlimeRuntime<H: ComputeHost + Send + Sync + 'static> {
    host: H,
    resources: SlimeResources,
    driver: SimulationDriver,
    bridge: PresentationBridge,
}

impl<H: ComputeHost + Send + Sync + 'static> SlimeRuntime<H> {
    pub fn start(
        mut host: H,
        config: SlimeConfig,
        environment: Option<&EnvironmentMap>,
        initial: InitialParticles,
    ) -> Result<Self, SlimeError> {
        let driver = SimulationDriver::new(&config);
        let bridge = PresentationBridge::new(config.present_source);
        let mut resources = SlimeResources::new(config);
        resources.initialize(&mut host, environment, initial)?;
        Ok(Self {
            host,
            resources,
            driver,
            bridge,
        })
    }

    pub fn tick(&mut self) -> Result<(), SlimeError> {
        self.driver.tick(&mut self.host, &self.resources)
    }

    pub fn advance(&mut self, frame_delta: Duration) -> Result<u32, SlimeError> {
        self.driver
            .advance(&mut self.host, &self.resources, frame_delta)
    }

    pub fn present(&mut self) -> Result<bool, SlimeError> {
        self.bridge
            .present(&mut self.host, &self.resources, &self.driver)
    }

    pub fn shutdown(&mut self) {
        self.resources.shutdown(&mut self.host);
    }

    pub fn display(&self) -> Result<TextureHandle, SlimeError> {
        self.bridge.display(&self.resources)
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn resources(&self) -> &SlimeResources {
        &self.resources
    }

    pub fn driver(&self) -> &SimulationDriver {
        &self.driver
    }

    pub fn bridge(&self) -> &PresentationBridge {
        &self.bridge
    }
}

impl SlimeRuntime<RenderDeviceHost> {
    /// Texture, view and sampler of the display surface.
    pub fn display_surface(&self) -> Option<DisplaySurface> {
        let handle = self.display().ok()?;
        self.host.display_surface(handle)
    }
}

/// Schedules an already inserted `SlimeRuntime<H>`. Does not create one.
pub struct SlimeSchedulePlugin<H>(PhantomData<fn() -> H>);

impl<H> Default for SlimeSchedulePlugin<H> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<H: ComputeHost + Send + Sync + 'static> Plugin for SlimeSchedulePlugin<H> {
    fn build(&self, app: &mut App) {
        app.init_resource::<SlimeStats>()
            .add_systems(FixedUpdate, tick_simulation::<H>)
            .add_systems(PostUpdate, present_frame::<H>)
            .add_systems(Last, shutdown_on_exit::<H>);
    }
}

// ==================== systems ========================================

fn tick_simulation<H: ComputeHost + Send + Sync + 'static>(
    runtime: Option<ResMut<SlimeRuntime<H>>>,
    mut stats: ResMut<SlimeStats>,
) {
    let Some(mut runtime) = runtime else { return };
    // the driver already logged the failure that halted it
    if runtime.driver().is_halted() || !runtime.resources().is_live() {
        return;
    }
    if runtime.tick().is_ok() {
        stats.ticks += 1;
        if stats.ticks % LOG_EVERY_TICKS == 0 {
            info!(
                "slime: {} ticks ({:.1} s simulated), {} frames presented",
                stats.ticks,
                runtime.driver().clock().seconds(),
                stats.presented
            );
        }
    }
}

fn present_frame<H: ComputeHost + Send + Sync + 'static>(
    runtime: Option<ResMut<SlimeRuntime<H>>>,
    mut stats: ResMut<SlimeStats>,
) {
    let Some(mut runtime) = runtime else { return };
    if !runtime.resources().is_live() {
        return;
    }
    match runtime.present() {
        Ok(true) => stats.presented += 1,
        Ok(false) => stats.skipped += 1,
        Err(err) => {
            if stats.failed_presents == 0 {
                error!("slime presentation failed: {err}");
            }
            stats.failed_presents += 1;
        }
    }
}

fn shutdown_on_exit<H: ComputeHost + Send + Sync + 'static>(
    mut exit: EventReader<AppExit>,
    runtime: Option<ResMut<SlimeRuntime<H>>>,
) {
    if exit.read().next().is_none() {
        return;
    }
    let Some(mut runtime) = runtime else { return };
    if runtime.resources().is_live() {
        info!(
            "slime shutting down after {} ticks",
            runtime.driver().clock().ticks()
        );
    }
    runtime.shutdown();
}

// ==================== plugin =========================================

/// Runs the simulation on Bevy's render device.
///
/// Reads `SlimeConfig` (inserting the default when absent), and optionally
/// `SlimeEnvironment` and `InitialDistribution`. A failed start is fatal:
/// the app exits with an error.
#[derive(Default)]
pub struct SlimePlugin;

impl Plugin for SlimePlugin {
    fn build(&self, app: &mut App) {
        let config = app
            .world()
            .get_resource::<SlimeConfig>()
            .cloned()
            .unwrap_or_default();
        if let Err(reason) = config.validate() {
            // Time<Fixed> refuses a zero timestep, so nothing else is wired
            error!("slime config rejected: {reason}");
            app.insert_resource(config)
                .add_systems(Startup, exit_with_error);
            return;
        }

        app.insert_resource(Time::<Fixed>::from_duration(config.tick_duration))
            .insert_resource(config)
            .add_plugins(SlimeSchedulePlugin::<RenderDeviceHost>::default())
            .add_systems(Startup, start_gpu_runtime);
    }
}

fn exit_with_error(mut exit: EventWriter<AppExit>) {
    exit.write(AppExit::error());
}

fn start_gpu_runtime(
    mut commands: Commands,
    config: Res<SlimeConfig>,
    device: Res<RenderDevice>,
    queue: Res<RenderQueue>,
    environment: Option<Res<SlimeEnvironment>>,
    distribution: Option<Res<InitialDistribution>>,
    mut exit: EventWriter<AppExit>,
) {
    let host = match RenderDeviceHost::new(device.clone(), queue.clone()) {
        Ok(host) => host,
        Err(err) => {
            error!("slime compute host unavailable: {err}");
            exit.write(AppExit::error());
            return;
        }
    };

    let initial = distribution.map_or(InitialParticles::Scatter, |d| {
        InitialParticles::Supplied(d.0.clone())
    });
    let environment = environment.as_deref().map(|e| &e.0);

    match SlimeRuntime::start(host, config.clone(), environment, initial) {
        Ok(runtime) => commands.insert_resource(runtime),
        Err(err) => {
            error!("slime initialization failed: {err}");
            exit.write(AppExit::error());
        }
    }
}
