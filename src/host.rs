//! The device capabilities the orchestration core consumes.

use crate::config::FieldFilter;
use crate::error::HostError;
use crate::stages::{FieldExtent, GroupCount, ResourceSlot, StageDescriptor, StageId};

// handles are plain ids, the host owns the memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    Texture(TextureHandle),
    Buffer(BufferHandle),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: &'static str,
    pub extent: FieldExtent,
    pub filter: FieldFilter,
    /// Storage (scatter) writes from compute passes.
    pub random_write: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformName {
    Width,
    Height,
    ParticleCount,
    TimeDelta,
    Time,
    MoveSpeed,
    TurnSpeed,
    SensorAngle,
    SensorDistance,
    DepositAmount,
    DecayRate,
    DiffuseRate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(u32),
    Float(f32),
}

/// Device limits checked before anything is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLimits {
    pub max_texture_dimension: u32,
    /// Largest storage buffer that can be bound to a stage.
    pub max_buffer_size: u64,
    pub max_workgroups_per_dimension: u32,
}

/// Program-wide uniforms and per-stage bindings are set on the host, then
/// dispatches and copies are recorded into one pending command stream that
/// `submit` hands to the device in order.
pub trait ComputeHost {
    fn limits(&self) -> HostLimits;

    /// Single-channel float surface. `texels` is row-major, one per pixel.
    fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        texels: Option<&[f32]>,
    ) -> Result<TextureHandle, HostError>;

    fn create_buffer(&mut self, label: &'static str, contents: &[u8])
    -> Result<BufferHandle, HostError>;

    // once per stage, before any bind
    fn register_stage(&mut self, stage: &StageDescriptor) -> Result<(), HostError>;

    fn bind(
        &mut self,
        stage: StageId,
        slot: ResourceSlot,
        resource: ResourceHandle,
    ) -> Result<(), HostError>;

    fn set_uniform(&mut self, name: UniformName, value: UniformValue) -> Result<(), HostError>;

    fn dispatch(&mut self, stage: StageId, groups: GroupCount) -> Result<(), HostError>;

    /// Full-surface copy between two surfaces of identical size.
    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<(), HostError>;

    fn submit(&mut self) -> Result<(), HostError>;

    fn abandon(&mut self);

    /// Releasing an unknown or already released handle is a no-op.
    fn release_texture(&mut self, texture: TextureHandle);

    fn release_buffer(&mut self, buffer: BufferHandle);
}
