use std::time::Duration;

use bevy::prelude::Resource;

use crate::stages::FieldExtent;

// ==================== options ========================================

// what gets copied into the display surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentSource {
    #[default]
    Trail,
    Diffused,
}

// Environment stamps the map into the trail (needs a map), Blank clears it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailSeed {
    #[default]
    Environment,
    Blank,
}

/// Display sampling only. The simulation always reads texels directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldFilter {
    #[default]
    Point,
    Linear,
}

// move + diffuse kernel tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelSettings {
    pub move_speed: f32,      // px / s
    pub turn_speed: f32,      // rad / s
    pub sensor_angle: f32,    // rad, forward to side sensor
    pub sensor_distance: f32, // px
    pub deposit_amount: f32,  // per tick, trail saturates at 1
    pub decay_rate: f32,      // fraction lost per second
    pub diffuse_rate: f32,    // blend towards the 3x3 mean, per second
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            move_speed: 60.0,
            turn_speed: 12.0,
            sensor_angle: std::f32::consts::FRAC_PI_4,
            sensor_distance: 9.0,
            deposit_amount: 0.25,
            decay_rate: 0.35,
            diffuse_rate: 8.0,
        }
    }
}

// ==================== config resource ================================

/// Everything fixed at initialization. There is no runtime reconfiguration.
#[derive(Resource, Debug, Clone, PartialEq)]
pub struct SlimeConfig {
    pub width: u32,
    pub height: u32,
    pub particle_count: u32,
    pub tick_duration: Duration,
    pub present_source: PresentSource,
    pub trail_seed: TrailSeed,
    pub field_filter: FieldFilter,
    pub display_filter: FieldFilter,
    /// Upper bound on ticks run by one `SimulationDriver::advance` call.
    pub max_ticks_per_advance: u32,
    pub kernel: KernelSettings,
}

impl Default for SlimeConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            particle_count: 500_000,
            tick_duration: Duration::from_millis(20),
            present_source: PresentSource::Trail,
            trail_seed: TrailSeed::Environment,
            field_filter: FieldFilter::Point,
            display_filter: FieldFilter::Linear,
            max_ticks_per_advance: 8,
            kernel: KernelSettings::default(),
        }
    }
}

impl SlimeConfig {
    pub fn new(width: u32, height: u32, particle_count: u32) -> Self {
        Self {
            width,
            height,
            particle_count,
            ..Self::default()
        }
    }

    pub fn with_tick_duration(mut self, tick_duration: Duration) -> Self {
        self.tick_duration = tick_duration;
        self
    }

    pub fn with_present_source(mut self, present_source: PresentSource) -> Self {
        self.present_source = present_source;
        self
    }

    pub fn with_trail_seed(mut self, trail_seed: TrailSeed) -> Self {
        self.trail_seed = trail_seed;
        self
    }

    pub fn with_kernel(mut self, kernel: KernelSettings) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_max_ticks_per_advance(mut self, max_ticks: u32) -> Self {
        self.max_ticks_per_advance = max_ticks;
        self
    }

    pub fn extent(&self) -> FieldExtent {
        FieldExtent::new(self.width, self.height)
    }

    pub fn tick_seconds(&self) -> f32 {
        self.tick_duration.as_secs_f32()
    }

    // zero sizes are the lifecycle's job (they are allocation failures)
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_duration.is_zero() {
            return Err("tick duration must be positive".into());
        }
        if self.max_ticks_per_advance == 0 {
            return Err("max_ticks_per_advance must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_the_full_hd_scene() {
        let config = SlimeConfig::default();
        assert_eq!(config.extent(), FieldExtent::new(1920, 1080));
        assert_eq!(config.particle_count, 500_000);
        assert_eq!(config.present_source, PresentSource::Trail);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_tick_is_invalid() {
        let config = SlimeConfig::new(64, 64, 10).with_tick_duration(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
