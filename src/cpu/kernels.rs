// Reference versions of the slime.wgsl entry points.
//
// Each `*_group` function runs one workgroup's worth of invocations, in
// invocation order, with the same bounds checks the shader applies. The
// per-invocation math is kept in the small functions below so it can be
// tested on its own.

use std::f32::consts::TAU;

use glam::Vec2;

use crate::gpu::ffi::{GpuParticle, SlimeParams};
use crate::stages::{FieldExtent, WorkgroupSize};

/// Environment texels above this value block particle movement.
pub const OBSTACLE_THRESHOLD: f32 = 0.5;

/// Row-major single-channel surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub extent: FieldExtent,
    pub texels: Vec<f32>,
}

impl Field {
    pub fn zeroed(extent: FieldExtent) -> Self {
        Self {
            extent,
            texels: vec![0.0; extent.pixel_count() as usize],
        }
    }

    pub fn from_texels(extent: FieldExtent, texels: Vec<f32>) -> Option<Self> {
        (texels.len() as u64 == extent.pixel_count()).then_some(Self { extent, texels })
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.extent.width as usize + x as usize
    }

    /// Reads with coordinates clamped to the surface.
    #[inline]
    pub fn load(&self, x: i32, y: i32) -> f32 {
        let x = x.clamp(0, self.extent.width as i32 - 1) as u32;
        let y = y.clamp(0, self.extent.height as i32 - 1) as u32;
        self.texels[self.index(x, y)]
    }

    #[inline]
    pub fn store(&mut self, x: u32, y: u32, value: f32) {
        let i = self.index(x, y);
        self.texels[i] = value;
    }
}

#[inline]
pub fn hash(mut state: u32) -> u32 {
    state ^= 2_747_636_419;
    state = state.wrapping_mul(2_654_435_769);
    state ^= state >> 16;
    state = state.wrapping_mul(2_654_435_769);
    state ^= state >> 16;
    state.wrapping_mul(2_654_435_769)
}

#[inline]
pub fn unit(state: u32) -> f32 {
    state as f32 / u32::MAX as f32
}

/// Environment value under a field pixel; the map is scaled to the field.
#[inline]
pub fn environment_at(env: &Field, field: FieldExtent, x: u32, y: u32) -> f32 {
    let ex = x * env.extent.width / field.width;
    let ey = y * env.extent.height / field.height;
    env.load(ex as i32, ey as i32)
}

#[inline]
fn is_obstacle(env: &Field, field: FieldExtent, pos: Vec2) -> bool {
    environment_at(env, field, pos.x as u32, pos.y as u32) > OBSTACLE_THRESHOLD
}

// ------------------------- scatter ---------------------------------------

/// Start state of particle `index`: uniformly inside a disc centred on the
/// field, heading towards the centre, at rest.
pub fn scatter_particle(index: u32, extent: FieldExtent) -> GpuParticle {
    let a = hash(index);
    let b = hash(a);
    let center = Vec2::new(extent.width as f32, extent.height as f32) * 0.5;
    let radius = extent.width.min(extent.height) as f32 * 0.4 * unit(a).sqrt();
    let theta = unit(b) * TAU;
    let position = center + Vec2::from_angle(theta) * radius;

    GpuParticle {
        position: position.to_array(),
        velocity: [0.0, 0.0],
        angle: theta + std::f32::consts::PI,
    }
}

pub fn scatter_group(
    group: u32,
    workgroup: WorkgroupSize,
    params: &SlimeParams,
    particles: &mut [GpuParticle],
) {
    let extent = FieldExtent::new(params.width, params.height);
    for local in 0..workgroup.x {
        let index = group * workgroup.x + local;
        if index >= params.particle_count {
            return;
        }
        particles[index as usize] = scatter_particle(index, extent);
    }
}

// ------------------------- seed ------------------------------------------

pub fn seed_group(
    group: [u32; 2],
    workgroup: WorkgroupSize,
    env: Option<&Field>,
    trail: &mut Field,
) {
    let extent = trail.extent;
    for_each_pixel(group, workgroup, extent, |x, y| {
        let value = env.map_or(0.0, |env| environment_at(env, extent, x, y));
        trail.store(x, y, value);
    });
}

// ------------------------- move ------------------------------------------

/// Trail weight in a 3x3 neighbourhood `sensor_distance` ahead along `angle`.
pub fn sense(trail: &Field, position: Vec2, angle: f32, params: &SlimeParams) -> f32 {
    let tip = position + Vec2::from_angle(angle) * params.sensor_distance;
    let (cx, cy) = (tip.x as i32, tip.y as i32);
    let mut sum = 0.0;
    for oy in -1..=1 {
        for ox in -1..=1 {
            sum += trail.load(cx + ox, cy + oy);
        }
    }
    sum
}

/// New heading given the three sensor readings and a random value in [0, 1].
pub fn steer(angle: f32, forward: f32, left: f32, right: f32, random: f32, turn: f32) -> f32 {
    if forward >= left && forward >= right {
        angle
    } else if forward < left && forward < right {
        angle + (random - 0.5) * 2.0 * turn
    } else if right > left {
        angle - random * turn
    } else {
        angle + random * turn
    }
}

pub fn move_particle(
    index: u32,
    particle: &mut GpuParticle,
    params: &SlimeParams,
    env: &Field,
    trail: &mut Field,
) {
    let extent = trail.extent;
    let dt = params.time_delta;
    let position = Vec2::from_array(particle.position);

    let random = hash(
        (position.y as u32)
            .wrapping_mul(params.width)
            .wrapping_add(position.x as u32)
            .wrapping_add(hash(index.wrapping_add((params.time * 100_000.0) as u32))),
    );

    let forward = sense(trail, position, particle.angle, params);
    let left = sense(trail, position, particle.angle + params.sensor_angle, params);
    let right = sense(trail, position, particle.angle - params.sensor_angle, params);
    let mut angle = steer(
        particle.angle,
        forward,
        left,
        right,
        unit(random),
        params.turn_speed * dt,
    );

    let direction = Vec2::from_angle(angle);
    let mut next = position + direction * params.move_speed * dt;

    let max = Vec2::new(extent.width as f32, extent.height as f32) - 0.01;
    let outside = next.x < 0.0 || next.y < 0.0 || next.x > max.x || next.y > max.y;
    if outside || is_obstacle(env, extent, next.clamp(Vec2::ZERO, max)) {
        next = if outside {
            next.clamp(Vec2::ZERO, max)
        } else {
            position
        };
        angle = unit(hash(random)) * TAU;
    }

    particle.position = next.to_array();
    particle.velocity = (Vec2::from_angle(angle) * params.move_speed).to_array();
    particle.angle = angle;

    let (px, py) = (next.x as u32, next.y as u32);
    let deposited = (trail.load(px as i32, py as i32) + params.deposit_amount).min(1.0);
    trail.store(px, py, deposited);
}

pub fn move_group(
    group: u32,
    workgroup: WorkgroupSize,
    params: &SlimeParams,
    particles: &mut [GpuParticle],
    env: &Field,
    trail: &mut Field,
) {
    for local in 0..workgroup.x {
        let index = group * workgroup.x + local;
        if index >= params.particle_count {
            return;
        }
        move_particle(index, &mut particles[index as usize], params, env, trail);
    }
}

// ------------------------- diffuse ---------------------------------------

pub fn diffuse_pixel(x: u32, y: u32, params: &SlimeParams, env: &Field, trail: &Field) -> f32 {
    let extent = trail.extent;
    let environment = environment_at(env, extent, x, y);
    if environment > OBSTACLE_THRESHOLD {
        return environment;
    }

    let (cx, cy) = (x as i32, y as i32);
    let mut sum = 0.0;
    for oy in -1..=1 {
        for ox in -1..=1 {
            sum += trail.load(cx + ox, cy + oy);
        }
    }
    let mean = sum / 9.0;
    let original = trail.load(cx, cy);

    let dt = params.time_delta;
    let blend = (params.diffuse_rate * dt).min(1.0);
    let blurred = original + (mean - original) * blend;
    (blurred - params.decay_rate * dt).max(0.0)
}

pub fn diffuse_group(
    group: [u32; 2],
    workgroup: WorkgroupSize,
    params: &SlimeParams,
    env: &Field,
    trail: &Field,
    diffused: &mut Field,
) {
    for_each_pixel(group, workgroup, trail.extent, |x, y| {
        diffused.store(x, y, diffuse_pixel(x, y, params, env, trail));
    });
}

fn for_each_pixel(
    group: [u32; 2],
    workgroup: WorkgroupSize,
    extent: FieldExtent,
    mut f: impl FnMut(u32, u32),
) {
    for ly in 0..workgroup.y {
        for lx in 0..workgroup.x {
            let x = group[0] * workgroup.x + lx;
            let y = group[1] * workgroup.y + ly;
            if x < extent.width && y < extent.height {
                f(x, y);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(extent: FieldExtent, particle_count: u32) -> SlimeParams {
        SlimeParams {
            width: extent.width,
            height: extent.height,
            particle_count,
            time_delta: 0.02,
            move_speed: 50.0,
            turn_speed: 10.0,
            sensor_angle: 0.7,
            sensor_distance: 4.0,
            deposit_amount: 0.5,
            decay_rate: 0.5,
            diffuse_rate: 5.0,
            ..SlimeParams::default()
        }
    }

    #[test]
    fn scatter_stays_inside_the_field() {
        let extent = FieldExtent::new(64, 32);
        for i in 0..1_000 {
            let p = scatter_particle(i, extent);
            assert!((0.0..64.0).contains(&p.position[0]));
            assert!((0.0..32.0).contains(&p.position[1]));
        }
    }

    #[test]
    fn steer_keeps_heading_when_forward_is_strongest() {
        assert_eq!(steer(1.0, 3.0, 1.0, 2.0, 0.9, 0.5), 1.0);
        assert!(steer(1.0, 0.0, 0.0, 1.0, 1.0, 0.5) < 1.0);
        assert!(steer(1.0, 0.0, 1.0, 0.0, 1.0, 0.5) > 1.0);
    }

    #[test]
    fn move_deposits_under_the_particle() {
        let extent = FieldExtent::new(32, 32);
        let p = params(extent, 1);
        let env = Field::zeroed(FieldExtent::new(1, 1));
        let mut trail = Field::zeroed(extent);
        let mut particle = GpuParticle {
            position: [16.0, 16.0],
            velocity: [0.0, 0.0],
            angle: 0.0,
        };
        move_particle(0, &mut particle, &p, &env, &mut trail);

        assert_eq!(particle.position, [17.0, 16.0]);
        assert_eq!(trail.load(17, 16), 0.5);
        assert_eq!(trail.texels.iter().filter(|v| **v > 0.0).count(), 1);
    }

    #[test]
    fn move_never_leaves_the_field() {
        let extent = FieldExtent::new(8, 8);
        let p = params(extent, 1);
        let env = Field::zeroed(FieldExtent::new(1, 1));
        let mut trail = Field::zeroed(extent);
        let mut particle = GpuParticle {
            position: [7.5, 4.0],
            velocity: [0.0, 0.0],
            angle: 0.0,
        };
        for _ in 0..50 {
            move_particle(0, &mut particle, &p, &env, &mut trail);
            assert!(particle.position[0] >= 0.0 && particle.position[0] < 8.0);
            assert!(particle.position[1] >= 0.0 && particle.position[1] < 8.0);
        }
    }

    #[test]
    fn obstacles_block_movement() {
        let extent = FieldExtent::new(16, 16);
        let p = params(extent, 1);
        let mut env = Field::zeroed(extent);
        env.store(9, 8, 1.0);
        let mut trail = Field::zeroed(extent);
        let mut particle = GpuParticle {
            position: [8.0, 8.0],
            velocity: [0.0, 0.0],
            angle: 0.0,
        };
        move_particle(0, &mut particle, &p, &env, &mut trail);
        assert_eq!(particle.position, [8.0, 8.0]);
    }

    #[test]
    fn diffuse_spreads_and_decays() {
        let extent = FieldExtent::new(5, 5);
        let p = params(extent, 0);
        let env = Field::zeroed(FieldExtent::new(1, 1));
        let mut trail = Field::zeroed(extent);
        trail.store(2, 2, 1.0);

        let center = diffuse_pixel(2, 2, &p, &env, &trail);
        let neighbour = diffuse_pixel(1, 2, &p, &env, &trail);
        let far = diffuse_pixel(0, 0, &p, &env, &trail);

        assert!(center < 1.0);
        assert!(neighbour > 0.0);
        assert_eq!(far, 0.0);
    }

    #[test]
    fn environment_is_scaled_to_the_field() {
        let env = Field::from_texels(FieldExtent::new(2, 1), vec![0.0, 1.0]).unwrap();
        let field = FieldExtent::new(8, 4);
        assert_eq!(environment_at(&env, field, 3, 0), 0.0);
        assert_eq!(environment_at(&env, field, 4, 3), 1.0);
    }

    #[test]
    fn partial_groups_respect_bounds() {
        let extent = FieldExtent::new(10, 10);
        let p = params(extent, 20);
        let mut particles = vec![GpuParticle::default(); 20];
        scatter_group(1, WorkgroupSize::PARTICLES, &p, &mut particles);
        assert!(particles[..16].iter().all(|q| *q == GpuParticle::default()));
        assert!(particles[16..].iter().all(|q| *q != GpuParticle::default()));
    }
}
