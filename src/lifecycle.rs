//! Allocation, binding and release of every simulation resource.

use bevy::prelude::{info, warn};

use crate::config::{FieldFilter, SlimeConfig};
use crate::error::{HostError, ResourceKind, SlimeError};
use crate::gpu::ffi::{GpuParticle, PARTICLE_STRIDE};
use crate::host::{
    BufferHandle, ComputeHost, HostLimits, ResourceHandle, TextureDescriptor, TextureHandle, UniformName,
    UniformValue,
};
use crate::stages::{FieldExtent, Requirement, ResourceSlot, StageId, StageSet};

/// Externally supplied obstacle map, read-only for the process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentMap {
    extent: FieldExtent,
    texels: Vec<f32>,
}

impl EnvironmentMap {
    /// `texels` is row-major with one value per pixel in [0, 1].
    pub fn new(width: u32, height: u32, texels: Vec<f32>) -> Option<Self> {
        let extent = FieldExtent::new(width, height);
        (width > 0 && height > 0 && texels.len() as u64 == extent.pixel_count())
            .then_some(Self { extent, texels })
    }

    pub fn extent(&self) -> FieldExtent {
        self.extent
    }

    pub fn texels(&self) -> &[f32] {
        &self.texels
    }
}

/// Where the particle store's first contents come from.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum InitialParticles {
    /// Zero-filled, then laid out by the scatter pass.
    #[default]
    Scatter,
    /// Uploaded as-is. Must hold exactly `particle_count` records.
    Supplied(Vec<GpuParticle>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Handles {
    trail: TextureHandle,
    diffused: TextureHandle,
    display: TextureHandle,
    environment: TextureHandle,
    particles: BufferHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unallocated,
    Live(Handles),
    Released,
}

/// Sole owner of the field textures, the particle store and the uploaded
/// environment. Everything else holds copies of the handle ids only.
#[derive(Debug, Clone)]
pub struct SlimeResources {
    config: SlimeConfig,
    stages: StageSet,
    environment_supplied: bool,
    state: State,
}

impl SlimeResources {
    pub fn new(config: SlimeConfig) -> Self {
        let stages = StageSet::standard(config.trail_seed);
        Self {
            config,
            stages,
            environment_supplied: false,
            state: State::Unallocated,
        }
    }

    /// Allocates and binds everything, sets the invariant uniforms and runs
    /// the one-shot startup passes.
    ///
    /// All or nothing: on failure every resource created by this call has
    /// been released again and `self` stays unallocated.
    pub fn initialize<H: ComputeHost>(
        &mut self,
        host: &mut H,
        environment: Option<&EnvironmentMap>,
        initial: InitialParticles,
    ) -> Result<(), SlimeError> {
        if self.state != State::Unallocated {
            return Err(SlimeError::AlreadyInitialized);
        }
        self.config.validate().map_err(SlimeError::InvalidConfig)?;

        let extent = self.config.extent();
        let count = self.config.particle_count;
        if extent.pixel_count() == 0 {
            return Err(SlimeError::ResourceAllocation {
                resource: ResourceKind::TrailField,
                reason: HostError::ZeroSized("field texture"),
            });
        }
        if count == 0 {
            return Err(SlimeError::ResourceAllocation {
                resource: ResourceKind::ParticleStore,
                reason: HostError::ZeroSized("particle store"),
            });
        }
        check_limits(host.limits(), &self.config, &self.stages)?;
        if let InitialParticles::Supplied(particles) = &initial {
            if particles.len() != count as usize {
                return Err(SlimeError::InvalidConfig(format!(
                    "supplied {} particles for a store of {}",
                    particles.len(),
                    count
                )));
            }
        }

        let mut alloc = Allocation::new(host);
        let handles = allocate(&mut alloc, &self.config, environment, &initial)?;
        bind_stages(&mut alloc, &self.stages, &handles, environment.is_some())?;
        set_invariant_uniforms(alloc.host(), &self.config)?;
        run_startup_passes(alloc.host(), &self.stages, &self.config, &initial)?;
        alloc.commit();

        info!(
            "slime resources ready: {}x{} fields, {} particles ({} bytes)",
            extent.width,
            extent.height,
            count,
            count as u64 * PARTICLE_STRIDE
        );
        self.environment_supplied = environment.is_some();
        self.state = State::Live(handles);
        Ok(())
    }

    /// Releases everything `initialize` created. Safe to call at any time
    /// and any number of times; only the first call after a successful
    /// `initialize` talks to the host.
    pub fn shutdown<H: ComputeHost>(&mut self, host: &mut H) {
        let State::Live(handles) = self.state else {
            if self.state == State::Unallocated {
                warn!("slime shutdown before initialization, nothing to release");
            }
            self.state = State::Released;
            return;
        };
        // flips first so no dispatch can start once shutdown has begun
        self.state = State::Released;
        host.abandon();
        host.release_buffer(handles.particles);
        host.release_texture(handles.environment);
        host.release_texture(handles.display);
        host.release_texture(handles.diffused);
        host.release_texture(handles.trail);
        info!("slime resources released");
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, State::Live(_))
    }

    pub fn is_released(&self) -> bool {
        self.state == State::Released
    }

    fn live(&self) -> Result<&Handles, SlimeError> {
        match &self.state {
            State::Live(handles) => Ok(handles),
            _ => Err(SlimeError::NotRunning),
        }
    }

    pub fn trail(&self) -> Result<TextureHandle, SlimeError> {
        self.live().map(|h| h.trail)
    }

    pub fn diffused(&self) -> Result<TextureHandle, SlimeError> {
        self.live().map(|h| h.diffused)
    }

    /// The surface an external presenter samples.
    pub fn display(&self) -> Result<TextureHandle, SlimeError> {
        self.live().map(|h| h.display)
    }

    pub fn particles(&self) -> Result<BufferHandle, SlimeError> {
        self.live().map(|h| h.particles)
    }

    pub fn environment(&self) -> Result<TextureHandle, SlimeError> {
        self.live().map(|h| h.environment)
    }

    /// False when the environment slot is bound to the 1x1 neutral map.
    pub fn environment_supplied(&self) -> bool {
        self.environment_supplied
    }

    pub fn config(&self) -> &SlimeConfig {
        &self.config
    }

    pub fn stages(&self) -> &StageSet {
        &self.stages
    }

    pub fn extent(&self) -> FieldExtent {
        self.config.extent()
    }
}

// Everything created through an Allocation is released again, newest first,
// unless commit() is reached.
struct Allocation<'h, H: ComputeHost> {
    host: &'h mut H,
    textures: Vec<TextureHandle>,
    buffers: Vec<BufferHandle>,
    committed: bool,
}

impl<'h, H: ComputeHost> Allocation<'h, H> {
    fn new(host: &'h mut H) -> Self {
        Self {
            host,
            textures: Vec::new(),
            buffers: Vec::new(),
            committed: false,
        }
    }

    fn host(&mut self) -> &mut H {
        &mut *self.host
    }

    fn texture(
        &mut self,
        resource: ResourceKind,
        desc: &TextureDescriptor,
        texels: Option<&[f32]>,
    ) -> Result<TextureHandle, SlimeError> {
        let handle = self
            .host
            .create_texture(desc, texels)
            .map_err(SlimeError::allocation(resource))?;
        self.textures.push(handle);
        Ok(handle)
    }

    fn buffer(&mut self, label: &'static str, contents: &[u8]) -> Result<BufferHandle, SlimeError> {
        let handle = self
            .host
            .create_buffer(label, contents)
            .map_err(SlimeError::allocation(ResourceKind::ParticleStore))?;
        self.buffers.push(handle);
        Ok(handle)
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl<H: ComputeHost> Drop for Allocation<'_, H> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.host.abandon();
        for buffer in self.buffers.drain(..).rev() {
            self.host.release_buffer(buffer);
        }
        for texture in self.textures.drain(..).rev() {
            self.host.release_texture(texture);
        }
        warn!("slime initialization rolled back");
    }
}

// Runs before any host memory is touched, so oversized requests fail
// without building the particle vector.
fn check_limits(
    limits: HostLimits,
    config: &SlimeConfig,
    stages: &StageSet,
) -> Result<(), SlimeError> {
    let extent = config.extent();
    let largest = extent.width.max(extent.height);
    if largest > limits.max_texture_dimension {
        return Err(SlimeError::ResourceAllocation {
            resource: ResourceKind::TrailField,
            reason: HostError::ExceedsLimit {
                what: "texture dimension",
                requested: largest as u64,
                limit: limits.max_texture_dimension as u64,
            },
        });
    }

    let store_size = config.particle_count as u64 * PARTICLE_STRIDE;
    if store_size > limits.max_buffer_size {
        return Err(SlimeError::ResourceAllocation {
            resource: ResourceKind::ParticleStore,
            reason: HostError::ExceedsLimit {
                what: "particle store size",
                requested: store_size,
                limit: limits.max_buffer_size,
            },
        });
    }

    for stage in stages.iter() {
        let groups = stage.groups_for(extent, config.particle_count).as_array();
        if groups.iter().any(|&g| g > limits.max_workgroups_per_dimension) {
            return Err(SlimeError::InvalidConfig(format!(
                "{} needs {:?} workgroups, the device allows {} per dimension",
                stage.id.label(),
                groups,
                limits.max_workgroups_per_dimension
            )));
        }
    }
    Ok(())
}

fn allocate<H: ComputeHost>(
    alloc: &mut Allocation<'_, H>,
    config: &SlimeConfig,
    environment: Option<&EnvironmentMap>,
    initial: &InitialParticles,
) -> Result<Handles, SlimeError> {
    let field = |label, filter| TextureDescriptor {
        label,
        extent: config.extent(),
        filter,
        random_write: true,
    };

    let trail = alloc.texture(
        ResourceKind::TrailField,
        &field("slime_trail_field", config.field_filter),
        None,
    )?;
    let diffused = alloc.texture(
        ResourceKind::DiffusedField,
        &field("slime_diffused_field", config.field_filter),
        None,
    )?;
    let display = alloc.texture(
        ResourceKind::DisplaySurface,
        &field("slime_display_surface", config.display_filter),
        None,
    )?;

    let particles = match initial {
        InitialParticles::Scatter => {
            let zeroed = vec![GpuParticle::default(); config.particle_count as usize];
            alloc.buffer("slime_particle_store", bytemuck::cast_slice(&zeroed))?
        }
        InitialParticles::Supplied(particles) => {
            alloc.buffer("slime_particle_store", bytemuck::cast_slice(particles))?
        }
    };

    let environment = match environment {
        Some(env) => alloc.texture(
            ResourceKind::Environment,
            &TextureDescriptor {
                label: "slime_environment",
                extent: env.extent(),
                filter: FieldFilter::Point,
                random_write: false,
            },
            Some(env.texels()),
        )?,
        None => alloc.texture(
            ResourceKind::Environment,
            &TextureDescriptor {
                label: "slime_neutral_environment",
                extent: FieldExtent::new(1, 1),
                filter: FieldFilter::Point,
                random_write: false,
            },
            None,
        )?,
    };

    Ok(Handles {
        trail,
        diffused,
        display,
        environment,
        particles,
    })
}

fn bind_stages<H: ComputeHost>(
    alloc: &mut Allocation<'_, H>,
    stages: &StageSet,
    handles: &Handles,
    environment_supplied: bool,
) -> Result<(), SlimeError> {
    for stage in stages.iter() {
        alloc
            .host()
            .register_stage(stage)
            .map_err(|source| SlimeError::Pipeline {
                stage: stage.id,
                source,
            })?;

        for binding in &stage.slots {
            let resource = match binding.slot {
                ResourceSlot::Particles => ResourceHandle::Buffer(handles.particles),
                ResourceSlot::Trail => ResourceHandle::Texture(handles.trail),
                ResourceSlot::Diffused => ResourceHandle::Texture(handles.diffused),
                ResourceSlot::Environment => {
                    if !environment_supplied && binding.requirement == Requirement::Required {
                        return Err(SlimeError::Binding {
                            stage: stage.id,
                            slot: binding.slot,
                            source: None,
                        });
                    }
                    ResourceHandle::Texture(handles.environment)
                }
            };
            alloc
                .host()
                .bind(stage.id, binding.slot, resource)
                .map_err(|source| SlimeError::Binding {
                    stage: stage.id,
                    slot: binding.slot,
                    source: Some(source),
                })?;
        }
    }
    Ok(())
}

fn set_invariant_uniforms<H: ComputeHost>(
    host: &mut H,
    config: &SlimeConfig,
) -> Result<(), SlimeError> {
    use UniformName::*;
    use UniformValue::{Float, Int};

    let k = &config.kernel;
    let values = [
        (Width, Int(config.width)),
        (Height, Int(config.height)),
        (ParticleCount, Int(config.particle_count)),
        (TimeDelta, Float(config.tick_seconds())),
        (Time, Float(0.0)),
        (MoveSpeed, Float(k.move_speed)),
        (TurnSpeed, Float(k.turn_speed)),
        (SensorAngle, Float(k.sensor_angle)),
        (SensorDistance, Float(k.sensor_distance)),
        (DepositAmount, Float(k.deposit_amount)),
        (DecayRate, Float(k.decay_rate)),
        (DiffuseRate, Float(k.diffuse_rate)),
    ];
    for (name, value) in values {
        host.set_uniform(name, value)
            .map_err(SlimeError::dispatch(None))?;
    }
    Ok(())
}

fn run_startup_passes<H: ComputeHost>(
    host: &mut H,
    stages: &StageSet,
    config: &SlimeConfig,
    initial: &InitialParticles,
) -> Result<(), SlimeError> {
    let extent = config.extent();
    let count = config.particle_count;

    if matches!(initial, InitialParticles::Scatter) {
        let scatter = stages.get(StageId::ScatterParticles);
        host.dispatch(scatter.id, scatter.groups_for(extent, count))
            .map_err(SlimeError::dispatch(Some(scatter.id)))?;
    }

    let seed = stages.get(StageId::SeedTrail);
    host.dispatch(seed.id, seed.groups_for(extent, count))
        .map_err(SlimeError::dispatch(Some(seed.id)))?;

    host.submit().map_err(SlimeError::dispatch(None))?;
    info!("slime startup passes submitted ({})", seed.entry_point);
    Ok(())
}
