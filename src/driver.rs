//! Fixed-tick issuance of the per-tick dispatch sequence.

use std::time::Duration;

use bevy::prelude::error;

use crate::config::SlimeConfig;
use crate::error::SlimeError;
use crate::host::{ComputeHost, UniformName, UniformValue};
use crate::lifecycle::SlimeResources;
use crate::stages::StageId;

/// Accumulated simulation time. Only ever moves by whole ticks, and only
/// when a tick has been fully issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationClock {
    tick_duration: Duration,
    elapsed: Duration,
    ticks: u64,
}

impl SimulationClock {
    pub fn new(tick_duration: Duration) -> Self {
        Self {
            tick_duration,
            elapsed: Duration::ZERO,
            ticks: 0,
        }
    }

    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    fn advance(&mut self) {
        self.elapsed += self.tick_duration;
        self.ticks += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    /// A tick failed; stays halted until the process restarts.
    Halted,
}

#[derive(Debug, Clone)]
pub struct SimulationDriver {
    clock: SimulationClock,
    accumulator: Duration,
    max_ticks_per_advance: u32,
    state: DriverState,
}

impl SimulationDriver {
    pub fn new(config: &SlimeConfig) -> Self {
        Self {
            clock: SimulationClock::new(config.tick_duration),
            accumulator: Duration::ZERO,
            max_ticks_per_advance: config.max_ticks_per_advance.max(1),
            state: DriverState::Running,
        }
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state == DriverState::Halted
    }

    /// Frame time received but not yet simulated.
    pub fn pending(&self) -> Duration {
        self.accumulator
    }

    /// Runs one fixed tick: time uniform, move, diffuse, feedback copy,
    /// submit, then the clock moves.
    ///
    /// On failure the pending commands are abandoned, the clock stays where
    /// it was and the driver halts.
    pub fn tick<H: ComputeHost>(
        &mut self,
        host: &mut H,
        resources: &SlimeResources,
    ) -> Result<(), SlimeError> {
        if self.is_halted() {
            return Err(SlimeError::Halted);
        }
        if !resources.is_live() {
            return Err(SlimeError::NotRunning);
        }

        match self.issue_tick(host, resources) {
            Ok(()) => {
                self.clock.advance();
                Ok(())
            }
            Err(err) => {
                host.abandon();
                self.state = DriverState::Halted;
                error!(
                    "slime tick {} aborted, simulation halted: {err}",
                    self.clock.ticks()
                );
                Err(err)
            }
        }
    }

    fn issue_tick<H: ComputeHost>(
        &self,
        host: &mut H,
        resources: &SlimeResources,
    ) -> Result<(), SlimeError> {
        let stages = resources.stages();
        let extent = resources.extent();
        let count = resources.config().particle_count;
        let trail = resources.trail()?;
        let diffused = resources.diffused()?;

        host.set_uniform(UniformName::Time, UniformValue::Float(self.clock.seconds()))
            .map_err(SlimeError::dispatch(Some(StageId::MoveParticles)))?;

        for id in [StageId::MoveParticles, StageId::Diffuse] {
            let stage = stages.get(id);
            host.dispatch(id, stage.groups_for(extent, count))
                .map_err(SlimeError::dispatch(Some(id)))?;
        }

        host.copy_texture(diffused, trail)
            .map_err(SlimeError::dispatch(None))?;
        host.submit().map_err(SlimeError::dispatch(None))
    }

    /// Feeds one render frame's worth of wall time and runs every tick that
    /// became due, at most `max_ticks_per_advance`. Time beyond the cap is
    /// kept for later calls. Returns the number of ticks run.
    pub fn advance<H: ComputeHost>(
        &mut self,
        host: &mut H,
        resources: &SlimeResources,
        frame_delta: Duration,
    ) -> Result<u32, SlimeError> {
        if self.is_halted() {
            return Err(SlimeError::Halted);
        }
        self.accumulator += frame_delta;

        let tick = self.clock.tick_duration();
        let mut ran = 0;
        while self.accumulator >= tick && ran < self.max_ticks_per_advance {
            self.tick(host, resources)?;
            self.accumulator -= tick;
            ran += 1;
        }
        Ok(ran)
    }
}
