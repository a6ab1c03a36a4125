use bytemuck::{Pod, Zeroable};

use crate::host::{UniformName, UniformValue};

/// Bytes per particle record, host and device.
pub const PARTICLE_STRIDE: u64 = 20;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuParticle {
    // not using glam to make sure WGSL compatibility
    pub position: [f32; 2],
    pub velocity: [f32; 2],
    pub angle: f32,
}

/// Uniform block shared by every stage. Must match `Params` in slime.wgsl.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SlimeParams {
    pub width: u32,
    pub height: u32,
    pub particle_count: u32,
    pub time_delta: f32,
    pub time: f32,
    pub move_speed: f32,
    pub turn_speed: f32,
    pub sensor_angle: f32,
    pub sensor_distance: f32,
    pub deposit_amount: f32,
    pub decay_rate: f32,
    pub diffuse_rate: f32,
}

impl SlimeParams {
    /// Ints go to the integer fields and floats to the float fields; a value
    /// of the other kind is converted.
    pub fn set(&mut self, name: UniformName, value: UniformValue) {
        let as_u32 = match value {
            UniformValue::Int(v) => v,
            UniformValue::Float(v) => v.max(0.0) as u32,
        };
        let as_f32 = match value {
            UniformValue::Int(v) => v as f32,
            UniformValue::Float(v) => v,
        };
        match name {
            UniformName::Width => self.width = as_u32,
            UniformName::Height => self.height = as_u32,
            UniformName::ParticleCount => self.particle_count = as_u32,
            UniformName::TimeDelta => self.time_delta = as_f32,
            UniformName::Time => self.time = as_f32,
            UniformName::MoveSpeed => self.move_speed = as_f32,
            UniformName::TurnSpeed => self.turn_speed = as_f32,
            UniformName::SensorAngle => self.sensor_angle = as_f32,
            UniformName::SensorDistance => self.sensor_distance = as_f32,
            UniformName::DepositAmount => self.deposit_amount = as_f32,
            UniformName::DecayRate => self.decay_rate = as_f32,
            UniformName::DiffuseRate => self.diffuse_rate = as_f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn particle_record_has_no_padding() {
        assert_eq!(std::mem::size_of::<GpuParticle>() as u64, PARTICLE_STRIDE);
        let particles = [GpuParticle::default(); 3];
        let bytes: &[u8] = bytemuck::cast_slice(&particles);
        assert_eq!(bytes.len() as u64, 3 * PARTICLE_STRIDE);
    }

    #[test]
    fn params_block_is_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<SlimeParams>() % 16, 0);
        assert_eq!(std::mem::size_of::<SlimeParams>(), 48);
    }

    #[test]
    fn set_routes_by_name() {
        let mut params = SlimeParams::default();
        params.set(UniformName::Width, UniformValue::Int(1920));
        params.set(UniformName::Time, UniformValue::Float(1.5));
        assert_eq!(params.width, 1920);
        assert_eq!(params.time, 1.5);
    }
}
