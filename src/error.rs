use thiserror::Error;

use crate::stages::{ResourceSlot, StageId};

/// Failure reported by a [`ComputeHost`](crate::host::ComputeHost).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("out of device memory")]
    OutOfMemory,
    #[error("{what} of {requested} exceeds the device limit of {limit}")]
    ExceedsLimit {
        what: &'static str,
        requested: u64,
        limit: u64,
    },
    #[error("zero-sized {0}")]
    ZeroSized(&'static str),
    #[error("unknown or released handle")]
    UnknownHandle,
    #[error("stage {stage:?} has no resource bound to {slot:?}")]
    Unbound { stage: StageId, slot: ResourceSlot },
    #[error("invalid group count {0:?}")]
    InvalidGroupCount([u32; 3]),
    #[error("copy between surfaces of different size")]
    SizeMismatch,
    #[error("device lost")]
    DeviceLost,
    #[error("device validation error: {0}")]
    Validation(String),
}

/// Which resource an allocation failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    TrailField,
    DiffusedField,
    DisplaySurface,
    ParticleStore,
    Environment,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SlimeError {
    #[error("could not allocate {resource:?}: {reason}")]
    ResourceAllocation {
        resource: ResourceKind,
        reason: HostError,
    },
    #[error("stage {stage:?} could not resolve slot {slot:?}")]
    Binding {
        stage: StageId,
        slot: ResourceSlot,
        // None when nothing was supplied for a required slot
        #[source]
        source: Option<HostError>,
    },
    #[error("could not build the program for {stage:?}: {source}")]
    Pipeline {
        stage: StageId,
        #[source]
        source: HostError,
    },
    #[error("dispatch of {stage:?} failed: {source}")]
    Dispatch {
        stage: Option<StageId>,
        #[source]
        source: HostError,
    },
    #[error("simulation halted after an earlier dispatch failure")]
    Halted,
    #[error("simulation is not running")]
    NotRunning,
    #[error("resources are already initialized")]
    AlreadyInitialized,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SlimeError {
    pub(crate) fn allocation(resource: ResourceKind) -> impl FnOnce(HostError) -> Self {
        move |reason| SlimeError::ResourceAllocation { resource, reason }
    }

    pub(crate) fn dispatch(stage: Option<StageId>) -> impl FnOnce(HostError) -> Self {
        move |source| SlimeError::Dispatch { stage, source }
    }
}
