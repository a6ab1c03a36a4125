pub mod config;
pub mod driver;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod plugin;
pub mod present;
pub mod stages;

pub mod cpu {
    pub mod kernels;
    pub mod reference;
}

pub mod gpu {
    pub mod bindings;
    pub mod ffi;
    pub mod host;
}

pub use config::{FieldFilter, KernelSettings, PresentSource, SlimeConfig, TrailSeed};
pub use driver::{DriverState, SimulationClock, SimulationDriver};
pub use error::{HostError, ResourceKind, SlimeError};
pub use host::{ComputeHost, TextureHandle};
pub use lifecycle::{EnvironmentMap, InitialParticles, SlimeResources};
pub use plugin::{
    InitialDistribution, SlimeEnvironment, SlimePlugin, SlimeRuntime, SlimeSchedulePlugin,
    SlimeStats,
};
pub use present::PresentationBridge;
