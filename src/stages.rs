//! The fixed set of compute passes and their resource contracts.
//!
//! A [`StageSet`] only declares what each pass reads, writes and consumes.
//! The order in which passes run belongs to the
//! [`SimulationDriver`](crate::driver::SimulationDriver).

use crate::config::TrailSeed;
use crate::host::UniformName;

/// Binding index of the shared uniform block in every stage.
pub const PARAMS_BINDING: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    // one-shot, before tick 0
    ScatterParticles,
    SeedTrail,
    // every tick
    MoveParticles,
    Diffuse,
}

impl StageId {
    pub const ALL: [StageId; 4] = [
        StageId::ScatterParticles,
        StageId::SeedTrail,
        StageId::MoveParticles,
        StageId::Diffuse,
    ];

    /// Position in [`StageId::ALL`] and in every [`StageSet`].
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            StageId::ScatterParticles => "slime_scatter_particles",
            StageId::SeedTrail => "slime_seed_trail",
            StageId::MoveParticles => "slime_move_particles",
            StageId::Diffuse => "slime_diffuse",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceSlot {
    Particles,
    Trail,
    Diffused,
    Environment,
}

impl ResourceSlot {
    /// Binding index used for this slot in every stage's bind group.
    pub const fn binding(self) -> u32 {
        match self {
            ResourceSlot::Particles => 1,
            ResourceSlot::Trail => 2,
            ResourceSlot::Diffused => 3,
            ResourceSlot::Environment => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAccess {
    Read,
    Write,
    ReadWrite,
}

impl SlotAccess {
    pub fn reads(self) -> bool {
        matches!(self, SlotAccess::Read | SlotAccess::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, SlotAccess::Write | SlotAccess::ReadWrite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    /// Bound to a neutral stand-in when the real resource is absent.
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotBinding {
    pub slot: ResourceSlot,
    pub access: SlotAccess,
    pub requirement: Requirement,
}

impl SlotBinding {
    const fn required(slot: ResourceSlot, access: SlotAccess) -> Self {
        Self {
            slot,
            access,
            requirement: Requirement::Required,
        }
    }

    const fn optional(slot: ResourceSlot, access: SlotAccess) -> Self {
        Self {
            slot,
            access,
            requirement: Requirement::Optional,
        }
    }
}

/// What a stage is dispatched over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDomain {
    Particles,
    Pixels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Must match `@workgroup_size(16)` in slime.wgsl.
    pub const PARTICLES: WorkgroupSize = WorkgroupSize { x: 16, y: 1 };
    /// Must match `@workgroup_size(8, 8)` in slime.wgsl.
    pub const PIXELS: WorkgroupSize = WorkgroupSize { x: 8, y: 8 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldExtent {
    pub width: u32,
    pub height: u32,
}

impl FieldExtent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupCount {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GroupCount {
    pub fn as_array(self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn total(self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

/// Number of groups of `size` needed to cover `count` elements.
///
/// True ceiling division: a partial tail group is always dispatched.
pub fn group_count(count: u32, size: u32) -> u32 {
    count.div_ceil(size)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageDescriptor {
    pub id: StageId,
    /// WGSL entry point in slime.wgsl.
    pub entry_point: &'static str,
    pub domain: DispatchDomain,
    pub workgroup: WorkgroupSize,
    pub slots: Vec<SlotBinding>,
    pub uniforms: &'static [UniformName],
}

impl StageDescriptor {
    pub fn groups_for(&self, extent: FieldExtent, particle_count: u32) -> GroupCount {
        match self.domain {
            DispatchDomain::Particles => GroupCount {
                x: group_count(particle_count, self.workgroup.x),
                y: 1,
                z: 1,
            },
            DispatchDomain::Pixels => GroupCount {
                x: group_count(extent.width, self.workgroup.x),
                y: group_count(extent.height, self.workgroup.y),
                z: 1,
            },
        }
    }

    pub fn slot(&self, slot: ResourceSlot) -> Option<&SlotBinding> {
        self.slots.iter().find(|b| b.slot == slot)
    }

    pub fn writes(&self, slot: ResourceSlot) -> bool {
        self.slot(slot).is_some_and(|b| b.access.writes())
    }

    pub fn reads(&self, slot: ResourceSlot) -> bool {
        self.slot(slot).is_some_and(|b| b.access.reads())
    }
}

const SCATTER_UNIFORMS: &[UniformName] = &[
    UniformName::Width,
    UniformName::Height,
    UniformName::ParticleCount,
];

const SEED_UNIFORMS: &[UniformName] = &[UniformName::Width, UniformName::Height];

const MOVE_UNIFORMS: &[UniformName] = &[
    UniformName::Width,
    UniformName::Height,
    UniformName::ParticleCount,
    UniformName::TimeDelta,
    UniformName::Time,
    UniformName::MoveSpeed,
    UniformName::TurnSpeed,
    UniformName::SensorAngle,
    UniformName::SensorDistance,
    UniformName::DepositAmount,
];

const DIFFUSE_UNIFORMS: &[UniformName] = &[
    UniformName::Width,
    UniformName::Height,
    UniformName::TimeDelta,
    UniformName::DecayRate,
    UniformName::DiffuseRate,
];

#[derive(Debug, Clone, PartialEq)]
pub struct StageSet {
    // indexed by StageId::index()
    stages: [StageDescriptor; 4],
}

impl StageSet {
    pub fn standard(seed: TrailSeed) -> Self {
        use ResourceSlot::*;
        use SlotAccess::*;

        let seed_stage = match seed {
            TrailSeed::Environment => StageDescriptor {
                id: StageId::SeedTrail,
                entry_point: "seed_trail",
                domain: DispatchDomain::Pixels,
                workgroup: WorkgroupSize::PIXELS,
                slots: vec![
                    SlotBinding::required(Environment, Read),
                    SlotBinding::required(Trail, Write),
                ],
                uniforms: SEED_UNIFORMS,
            },
            TrailSeed::Blank => StageDescriptor {
                id: StageId::SeedTrail,
                entry_point: "seed_blank",
                domain: DispatchDomain::Pixels,
                workgroup: WorkgroupSize::PIXELS,
                slots: vec![SlotBinding::required(Trail, Write)],
                uniforms: SEED_UNIFORMS,
            },
        };

        let stages = [
            StageDescriptor {
                id: StageId::ScatterParticles,
                entry_point: "scatter_particles",
                domain: DispatchDomain::Particles,
                workgroup: WorkgroupSize::PARTICLES,
                slots: vec![SlotBinding::required(Particles, Write)],
                uniforms: SCATTER_UNIFORMS,
            },
            seed_stage,
            StageDescriptor {
                id: StageId::MoveParticles,
                entry_point: "move_particles",
                domain: DispatchDomain::Particles,
                workgroup: WorkgroupSize::PARTICLES,
                slots: vec![
                    SlotBinding::required(Particles, ReadWrite),
                    SlotBinding::optional(Environment, Read),
                    SlotBinding::required(Trail, ReadWrite),
                ],
                uniforms: MOVE_UNIFORMS,
            },
            StageDescriptor {
                id: StageId::Diffuse,
                entry_point: "diffuse",
                domain: DispatchDomain::Pixels,
                workgroup: WorkgroupSize::PIXELS,
                slots: vec![
                    SlotBinding::required(Trail, Read),
                    SlotBinding::optional(Environment, Read),
                    SlotBinding::required(Diffused, Write),
                ],
                uniforms: DIFFUSE_UNIFORMS,
            },
        ];

        Self { stages }
    }

    pub fn get(&self, id: StageId) -> &StageDescriptor {
        &self.stages[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.stages.iter()
    }

    /// Stages that write `slot`.
    pub fn writers(&self, slot: ResourceSlot) -> impl Iterator<Item = StageId> + '_ {
        self.stages
            .iter()
            .filter(move |s| s.writes(slot))
            .map(|s| s.id)
    }

    /// Whether any stage needs the environment map to be supplied.
    pub fn requires_environment(&self) -> bool {
        self.stages.iter().any(|s| {
            s.slot(ResourceSlot::Environment)
                .is_some_and(|b| b.requirement == Requirement::Required)
        })
    }
}
