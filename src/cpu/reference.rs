// A ComputeHost that runs the reference kernels on the CPU.
//
// Used for parity checks, tests and benches. Commands are queued and
// executed in order on submit, like a device queue. Faults can be injected
// to exercise the failure paths of the lifecycle and the driver.

use std::collections::HashMap;

use crate::cpu::kernels::{self, Field};
use crate::error::HostError;
use crate::gpu::ffi::{GpuParticle, PARTICLE_STRIDE, SlimeParams};
use crate::host::{
    BufferHandle, ComputeHost, HostLimits, ResourceHandle, TextureDescriptor, TextureHandle, UniformName,
    UniformValue,
};
use crate::stages::{
    FieldExtent, GroupCount, ResourceSlot, StageDescriptor, StageId, WorkgroupSize,
};

/// Matches the wgpu default limits.
pub const MAX_TEXTURE_DIMENSION: u32 = 8192;
pub const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;
pub const MAX_BUFFER_SIZE: u64 = 256 << 20;

/// Every call the host received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    CreateTexture(TextureHandle, &'static str),
    CreateBuffer(BufferHandle, &'static str),
    RegisterStage(StageId),
    Bind(StageId, ResourceSlot, ResourceHandle),
    SetUniform(UniformName, UniformValue),
    Dispatch(StageId, GroupCount),
    Copy {
        src: TextureHandle,
        dst: TextureHandle,
    },
    Submit,
    Abandon,
    ReleaseTexture(TextureHandle),
    ReleaseBuffer(BufferHandle),
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Dispatch(StageId, GroupCount),
    Copy(TextureHandle, TextureHandle),
}

#[derive(Debug, Default, Clone)]
struct Faults {
    /// Zero-based index of the allocation that reports out-of-memory.
    allocation: Option<usize>,
    dispatch: Option<StageId>,
    bind: Option<(StageId, ResourceSlot)>,
    submit: bool,
}

struct RegisteredStage {
    descriptor: StageDescriptor,
    bindings: HashMap<ResourceSlot, ResourceHandle>,
}

#[derive(Default)]
pub struct ReferenceHost {
    textures: Vec<Option<Field>>,
    buffers: Vec<Option<Vec<GpuParticle>>>,
    stages: HashMap<StageId, RegisteredStage>,
    params: SlimeParams,
    pending: Vec<Command>,
    log: Vec<HostOp>,
    faults: Faults,
    allocations: usize,
    redundant_releases: usize,
}

impl ReferenceHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`th allocation (counting from zero, textures and buffers
    /// alike) fail with out-of-memory.
    pub fn fail_allocation(&mut self, n: usize) -> &mut Self {
        self.faults.allocation = Some(n);
        self
    }

    /// Makes every dispatch of `stage` fail as if the device was lost.
    pub fn fail_dispatch(&mut self, stage: StageId) -> &mut Self {
        self.faults.dispatch = Some(stage);
        self
    }

    /// Makes binding `slot` of `stage` fail as if the handle was unknown.
    pub fn fail_bind(&mut self, stage: StageId, slot: ResourceSlot) -> &mut Self {
        self.faults.bind = Some((stage, slot));
        self
    }

    /// Makes the next submit fail as if the device was lost.
    pub fn fail_next_submit(&mut self) -> &mut Self {
        self.faults.submit = true;
        self
    }

    pub fn clear_faults(&mut self) -> &mut Self {
        self.faults = Faults::default();
        self
    }

    pub fn log(&self) -> &[HostOp] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    pub fn live_textures(&self) -> usize {
        self.textures.iter().filter(|t| t.is_some()).count()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    /// Releases of handles that were already released or never existed.
    pub fn redundant_releases(&self) -> usize {
        self.redundant_releases
    }

    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    pub fn params(&self) -> &SlimeParams {
        &self.params
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&Field> {
        self.textures.get(handle.0 as usize)?.as_ref()
    }

    pub fn particles(&self, handle: BufferHandle) -> Option<&[GpuParticle]> {
        self.buffers.get(handle.0 as usize)?.as_deref()
    }

    fn next_allocation(&mut self) -> Result<(), HostError> {
        let n = self.allocations;
        self.allocations += 1;
        if self.faults.allocation == Some(n) {
            return Err(HostError::OutOfMemory);
        }
        Ok(())
    }

    fn field(&self, handle: TextureHandle) -> Result<&Field, HostError> {
        self.texture(handle).ok_or(HostError::UnknownHandle)
    }

    fn take_field(&mut self, handle: TextureHandle) -> Result<Field, HostError> {
        self.textures
            .get_mut(handle.0 as usize)
            .and_then(Option::take)
            .ok_or(HostError::UnknownHandle)
    }

    fn put_field(&mut self, handle: TextureHandle, field: Field) {
        self.textures[handle.0 as usize] = Some(field);
    }

    fn take_particles(&mut self, handle: BufferHandle) -> Result<Vec<GpuParticle>, HostError> {
        self.buffers
            .get_mut(handle.0 as usize)
            .and_then(Option::take)
            .ok_or(HostError::UnknownHandle)
    }

    fn put_particles(&mut self, handle: BufferHandle, particles: Vec<GpuParticle>) {
        self.buffers[handle.0 as usize] = Some(particles);
    }

    fn bound(&self, stage: StageId, slot: ResourceSlot) -> Result<ResourceHandle, HostError> {
        self.stages
            .get(&stage)
            .and_then(|s| s.bindings.get(&slot))
            .copied()
            .ok_or(HostError::Unbound { stage, slot })
    }

    fn bound_texture(&self, stage: StageId, slot: ResourceSlot) -> Result<TextureHandle, HostError> {
        match self.bound(stage, slot)? {
            ResourceHandle::Texture(t) => Ok(t),
            ResourceHandle::Buffer(_) => Err(HostError::Unbound { stage, slot }),
        }
    }

    fn bound_buffer(&self, stage: StageId, slot: ResourceSlot) -> Result<BufferHandle, HostError> {
        match self.bound(stage, slot)? {
            ResourceHandle::Buffer(b) => Ok(b),
            ResourceHandle::Texture(_) => Err(HostError::Unbound { stage, slot }),
        }
    }

    fn execute(&mut self, command: Command) -> Result<(), HostError> {
        match command {
            Command::Dispatch(stage, groups) => self.execute_dispatch(stage, groups),
            Command::Copy(src, dst) => {
                let texels = self.field(src)?.texels.clone();
                let dst = self
                    .textures
                    .get_mut(dst.0 as usize)
                    .and_then(Option::as_mut)
                    .ok_or(HostError::UnknownHandle)?;
                dst.texels.copy_from_slice(&texels);
                Ok(())
            }
        }
    }

    fn execute_dispatch(&mut self, stage: StageId, groups: GroupCount) -> Result<(), HostError> {
        let workgroup = self
            .stages
            .get(&stage)
            .map(|s| s.descriptor.workgroup)
            .ok_or(HostError::UnknownHandle)?;
        let params = self.params;

        match stage {
            StageId::ScatterParticles => {
                let handle = self.bound_buffer(stage, ResourceSlot::Particles)?;
                let mut particles = self.take_particles(handle)?;
                for group in 0..groups.x {
                    kernels::scatter_group(group, workgroup, &params, &mut particles);
                }
                self.put_particles(handle, particles);
            }
            StageId::SeedTrail => {
                let trail_handle = self.bound_texture(stage, ResourceSlot::Trail)?;
                let env_handle = self.bound_texture(stage, ResourceSlot::Environment).ok();
                let mut trail = self.take_field(trail_handle)?;
                let env = env_handle.and_then(|h| self.texture(h));
                for gy in 0..groups.y {
                    for gx in 0..groups.x {
                        kernels::seed_group([gx, gy], workgroup, env, &mut trail);
                    }
                }
                self.put_field(trail_handle, trail);
            }
            StageId::MoveParticles => {
                let particles_handle = self.bound_buffer(stage, ResourceSlot::Particles)?;
                let trail_handle = self.bound_texture(stage, ResourceSlot::Trail)?;
                let env_handle = self.bound_texture(stage, ResourceSlot::Environment)?;
                self.field(env_handle)?;

                let mut particles = self.take_particles(particles_handle)?;
                let mut trail = match self.take_field(trail_handle) {
                    Ok(trail) => trail,
                    Err(err) => {
                        self.put_particles(particles_handle, particles);
                        return Err(err);
                    }
                };
                if let Some(env) = self.texture(env_handle) {
                    for group in 0..groups.x {
                        kernels::move_group(
                            group,
                            workgroup,
                            &params,
                            &mut particles,
                            env,
                            &mut trail,
                        );
                    }
                }
                self.put_field(trail_handle, trail);
                self.put_particles(particles_handle, particles);
            }
            StageId::Diffuse => {
                let trail = self.field(self.bound_texture(stage, ResourceSlot::Trail)?)?;
                let env = self.field(self.bound_texture(stage, ResourceSlot::Environment)?)?;
                let diffused_handle = self.bound_texture(stage, ResourceSlot::Diffused)?;

                let mut diffused = Field::zeroed(trail.extent);
                for gy in 0..groups.y {
                    for gx in 0..groups.x {
                        kernels::diffuse_group(
                            [gx, gy],
                            workgroup,
                            &params,
                            env,
                            trail,
                            &mut diffused,
                        );
                    }
                }
                // pixels outside every dispatched group keep their old value
                let old = self.take_field(diffused_handle)?;
                let merged = merge_written(old, diffused, groups, workgroup);
                self.put_field(diffused_handle, merged);
            }
        }
        Ok(())
    }
}

// Keeps `old` texels where no invocation of `groups` ran, takes `new`
// everywhere else.
fn merge_written(
    mut old: Field,
    new: Field,
    groups: GroupCount,
    workgroup: WorkgroupSize,
) -> Field {
    let covered_w = (groups.x * workgroup.x).min(old.extent.width);
    let covered_h = (groups.y * workgroup.y).min(old.extent.height);
    for y in 0..covered_h {
        let row = (y * old.extent.width) as usize;
        let span = row..row + covered_w as usize;
        old.texels[span.clone()].copy_from_slice(&new.texels[span]);
    }
    old
}

impl ComputeHost for ReferenceHost {
    fn limits(&self) -> HostLimits {
        HostLimits {
            max_texture_dimension: MAX_TEXTURE_DIMENSION,
            max_buffer_size: MAX_BUFFER_SIZE,
            max_workgroups_per_dimension: MAX_WORKGROUPS_PER_DIMENSION,
        }
    }

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        texels: Option<&[f32]>,
    ) -> Result<TextureHandle, HostError> {
        let FieldExtent { width, height } = desc.extent;
        if width == 0 || height == 0 {
            return Err(HostError::ZeroSized("texture"));
        }
        let largest = width.max(height);
        if largest > MAX_TEXTURE_DIMENSION {
            return Err(HostError::ExceedsLimit {
                what: "texture dimension",
                requested: largest as u64,
                limit: MAX_TEXTURE_DIMENSION as u64,
            });
        }
        let field = match texels {
            Some(texels) => Field::from_texels(desc.extent, texels.to_vec())
                .ok_or_else(|| HostError::Validation("texel count does not match extent".into()))?,
            None => Field::zeroed(desc.extent),
        };
        self.next_allocation()?;

        let handle = TextureHandle(self.textures.len() as u32);
        self.textures.push(Some(field));
        self.log.push(HostOp::CreateTexture(handle, desc.label));
        Ok(handle)
    }

    fn create_buffer(
        &mut self,
        label: &'static str,
        contents: &[u8],
    ) -> Result<BufferHandle, HostError> {
        if contents.is_empty() {
            return Err(HostError::ZeroSized("buffer"));
        }
        if contents.len() as u64 > MAX_BUFFER_SIZE {
            return Err(HostError::ExceedsLimit {
                what: "buffer size",
                requested: contents.len() as u64,
                limit: MAX_BUFFER_SIZE,
            });
        }
        if contents.len() as u64 % PARTICLE_STRIDE != 0 {
            return Err(HostError::Validation(
                "buffer is not a whole number of particle records".into(),
            ));
        }
        self.next_allocation()?;

        let handle = BufferHandle(self.buffers.len() as u32);
        self.buffers.push(Some(bytemuck::pod_collect_to_vec(contents)));
        self.log.push(HostOp::CreateBuffer(handle, label));
        Ok(handle)
    }

    fn register_stage(&mut self, stage: &StageDescriptor) -> Result<(), HostError> {
        self.stages.insert(
            stage.id,
            RegisteredStage {
                descriptor: stage.clone(),
                bindings: HashMap::new(),
            },
        );
        self.log.push(HostOp::RegisterStage(stage.id));
        Ok(())
    }

    fn bind(
        &mut self,
        stage: StageId,
        slot: ResourceSlot,
        resource: ResourceHandle,
    ) -> Result<(), HostError> {
        let exists = match resource {
            ResourceHandle::Texture(t) => self.texture(t).is_some(),
            ResourceHandle::Buffer(b) => self.particles(b).is_some(),
        };
        let kind_matches = matches!(
            (slot, resource),
            (ResourceSlot::Particles, ResourceHandle::Buffer(_))
                | (
                    ResourceSlot::Trail | ResourceSlot::Diffused | ResourceSlot::Environment,
                    ResourceHandle::Texture(_)
                )
        );
        if !exists || !kind_matches || self.faults.bind == Some((stage, slot)) {
            return Err(HostError::UnknownHandle);
        }

        let registered = self
            .stages
            .get_mut(&stage)
            .ok_or(HostError::Unbound { stage, slot })?;
        if registered.descriptor.slot(slot).is_none() {
            return Err(HostError::Unbound { stage, slot });
        }
        registered.bindings.insert(slot, resource);
        self.log.push(HostOp::Bind(stage, slot, resource));
        Ok(())
    }

    fn set_uniform(&mut self, name: UniformName, value: UniformValue) -> Result<(), HostError> {
        self.params.set(name, value);
        self.log.push(HostOp::SetUniform(name, value));
        Ok(())
    }

    fn dispatch(&mut self, stage: StageId, groups: GroupCount) -> Result<(), HostError> {
        self.log.push(HostOp::Dispatch(stage, groups));
        if self.faults.dispatch == Some(stage) {
            return Err(HostError::DeviceLost);
        }
        let dims = groups.as_array();
        if dims.iter().any(|&d| d == 0 || d > MAX_WORKGROUPS_PER_DIMENSION) {
            return Err(HostError::InvalidGroupCount(dims));
        }
        let registered = self.stages.get(&stage).ok_or(HostError::UnknownHandle)?;
        for binding in &registered.descriptor.slots {
            if !registered.bindings.contains_key(&binding.slot) {
                return Err(HostError::Unbound {
                    stage,
                    slot: binding.slot,
                });
            }
        }
        self.pending.push(Command::Dispatch(stage, groups));
        Ok(())
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<(), HostError> {
        self.log.push(HostOp::Copy { src, dst });
        let src_extent = self.field(src)?.extent;
        let dst_extent = self.field(dst)?.extent;
        if src_extent != dst_extent {
            return Err(HostError::SizeMismatch);
        }
        self.pending.push(Command::Copy(src, dst));
        Ok(())
    }

    fn submit(&mut self) -> Result<(), HostError> {
        self.log.push(HostOp::Submit);
        if std::mem::take(&mut self.faults.submit) {
            self.pending.clear();
            return Err(HostError::DeviceLost);
        }
        for command in std::mem::take(&mut self.pending) {
            self.execute(command)?;
        }
        Ok(())
    }

    fn abandon(&mut self) {
        self.log.push(HostOp::Abandon);
        self.pending.clear();
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        match self.textures.get_mut(texture.0 as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.log.push(HostOp::ReleaseTexture(texture));
            }
            _ => self.redundant_releases += 1,
        }
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        match self.buffers.get_mut(buffer.0 as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.log.push(HostOp::ReleaseBuffer(buffer));
            }
            _ => self.redundant_releases += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldFilter;

    fn desc(width: u32, height: u32) -> TextureDescriptor {
        TextureDescriptor {
            label: "test",
            extent: FieldExtent::new(width, height),
            filter: FieldFilter::Point,
            random_write: true,
        }
    }

    #[test]
    fn commands_wait_for_submit() {
        let mut host = ReferenceHost::new();
        let a = host
            .create_texture(&desc(2, 2), Some(&[1.0, 2.0, 3.0, 4.0]))
            .unwrap();
        let b = host.create_texture(&desc(2, 2), None).unwrap();

        host.copy_texture(a, b).unwrap();
        assert_eq!(host.texture(b).unwrap().texels, vec![0.0; 4]);
        host.submit().unwrap();
        assert_eq!(host.texture(b).unwrap().texels, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn abandoned_commands_never_run() {
        let mut host = ReferenceHost::new();
        let a = host.create_texture(&desc(1, 1), Some(&[5.0])).unwrap();
        let b = host.create_texture(&desc(1, 1), None).unwrap();
        host.copy_texture(a, b).unwrap();
        host.abandon();
        host.submit().unwrap();
        assert_eq!(host.texture(b).unwrap().texels, vec![0.0]);
    }

    #[test]
    fn copy_requires_equal_extents() {
        let mut host = ReferenceHost::new();
        let a = host.create_texture(&desc(2, 2), None).unwrap();
        let b = host.create_texture(&desc(2, 3), None).unwrap();
        assert_eq!(host.copy_texture(a, b), Err(HostError::SizeMismatch));
    }

    #[test]
    fn releases_are_counted_once() {
        let mut host = ReferenceHost::new();
        let a = host.create_texture(&desc(1, 1), None).unwrap();
        host.release_texture(a);
        host.release_texture(a);
        assert_eq!(host.live_textures(), 0);
        assert_eq!(host.redundant_releases(), 1);
    }

    #[test]
    fn oversized_textures_are_rejected() {
        let mut host = ReferenceHost::new();
        let err = host.create_texture(&desc(MAX_TEXTURE_DIMENSION + 1, 4), None);
        assert!(matches!(err, Err(HostError::ExceedsLimit { .. })));
        assert_eq!(host.live_textures(), 0);
    }
}
