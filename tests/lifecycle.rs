use slime_trail::config::{SlimeConfig, TrailSeed};
use slime_trail::cpu::reference::{HostOp, ReferenceHost};
use slime_trail::error::{HostError, ResourceKind, SlimeError};
use slime_trail::gpu::ffi::GpuParticle;
use slime_trail::lifecycle::{EnvironmentMap, InitialParticles, SlimeResources};
use slime_trail::stages::{ResourceSlot, StageId};

fn blank_config() -> SlimeConfig {
    SlimeConfig::new(32, 24, 40).with_trail_seed(TrailSeed::Blank)
}

fn start(host: &mut ReferenceHost, config: SlimeConfig) -> SlimeResources {
    let mut resources = SlimeResources::new(config);
    resources
        .initialize(host, None, InitialParticles::Scatter)
        .unwrap();
    resources
}

#[test]
fn initialization_is_all_or_nothing() {
    let kinds = [
        ResourceKind::TrailField,
        ResourceKind::DiffusedField,
        ResourceKind::DisplaySurface,
        ResourceKind::ParticleStore,
        ResourceKind::Environment,
    ];
    for (n, kind) in kinds.into_iter().enumerate() {
        let mut host = ReferenceHost::new();
        host.fail_allocation(n);
        let mut resources = SlimeResources::new(blank_config());

        let err = resources
            .initialize(&mut host, None, InitialParticles::Scatter)
            .unwrap_err();
        assert_eq!(
            err,
            SlimeError::ResourceAllocation {
                resource: kind,
                reason: HostError::OutOfMemory,
            }
        );
        assert_eq!(host.live_textures(), 0, "textures leaked at allocation {n}");
        assert_eq!(host.live_buffers(), 0, "buffers leaked at allocation {n}");
        assert!(!resources.is_live());
        assert_eq!(resources.trail(), Err(SlimeError::NotRunning));
    }
}

#[test]
fn failed_initialization_can_be_retried() {
    let mut host = ReferenceHost::new();
    host.fail_allocation(3);
    let mut resources = SlimeResources::new(blank_config());
    assert!(resources
        .initialize(&mut host, None, InitialParticles::Scatter)
        .is_err());

    host.clear_faults();
    resources
        .initialize(&mut host, None, InitialParticles::Scatter)
        .unwrap();
    assert!(resources.is_live());
    assert_eq!(host.live_textures(), 4);
    assert_eq!(host.live_buffers(), 1);
}

#[test]
fn environment_seed_without_environment_is_a_binding_error() {
    let mut host = ReferenceHost::new();
    let config = SlimeConfig::new(32, 24, 40).with_trail_seed(TrailSeed::Environment);
    let mut resources = SlimeResources::new(config);

    let err = resources
        .initialize(&mut host, None, InitialParticles::Scatter)
        .unwrap_err();
    assert_eq!(
        err,
        SlimeError::Binding {
            stage: StageId::SeedTrail,
            slot: ResourceSlot::Environment,
            source: None,
        }
    );
    assert_eq!(host.live_textures(), 0);
    assert_eq!(host.live_buffers(), 0);
}

#[test]
fn failed_bind_keeps_the_host_error() {
    let mut host = ReferenceHost::new();
    host.fail_bind(StageId::MoveParticles, ResourceSlot::Trail);
    let mut resources = SlimeResources::new(blank_config());

    let err = resources
        .initialize(&mut host, None, InitialParticles::Scatter)
        .unwrap_err();
    assert_eq!(
        err,
        SlimeError::Binding {
            stage: StageId::MoveParticles,
            slot: ResourceSlot::Trail,
            source: Some(HostError::UnknownHandle),
        }
    );
    assert!(std::error::Error::source(&err).is_some());
    assert_eq!(host.live_textures(), 0);
    assert_eq!(host.live_buffers(), 0);
}

#[test]
fn failed_startup_pass_rolls_everything_back() {
    let cases: [(fn(&mut ReferenceHost), Option<StageId>); 3] = [
        (
            |h| {
                h.fail_dispatch(StageId::ScatterParticles);
            },
            Some(StageId::ScatterParticles),
        ),
        (
            |h| {
                h.fail_dispatch(StageId::SeedTrail);
            },
            Some(StageId::SeedTrail),
        ),
        (
            |h| {
                h.fail_next_submit();
            },
            None,
        ),
    ];
    for (inject, stage) in cases {
        let mut host = ReferenceHost::new();
        inject(&mut host);
        let mut resources = SlimeResources::new(blank_config());

        let err = resources
            .initialize(&mut host, None, InitialParticles::Scatter)
            .unwrap_err();
        assert_eq!(
            err,
            SlimeError::Dispatch {
                stage,
                source: HostError::DeviceLost,
            }
        );
        assert_eq!(host.live_textures(), 0, "textures leaked after {stage:?}");
        assert_eq!(host.live_buffers(), 0, "buffers leaked after {stage:?}");
        assert_eq!(host.pending_commands(), 0);
        assert!(!resources.is_live());
    }
}

#[test]
fn environment_seed_copies_the_map_into_the_trail() {
    let mut texels = vec![0.0; 32 * 24];
    texels[5 * 32 + 7] = 1.0;
    texels[20 * 32 + 30] = 0.25;
    let env = EnvironmentMap::new(32, 24, texels.clone()).unwrap();

    let mut host = ReferenceHost::new();
    let config = SlimeConfig::new(32, 24, 40).with_trail_seed(TrailSeed::Environment);
    let mut resources = SlimeResources::new(config);
    resources
        .initialize(&mut host, Some(&env), InitialParticles::Scatter)
        .unwrap();

    assert!(resources.environment_supplied());
    let trail = host.texture(resources.trail().unwrap()).unwrap();
    assert_eq!(trail.texels, texels);
}

#[test]
fn zero_particles_are_rejected_before_any_host_call() {
    let mut host = ReferenceHost::new();
    let mut resources = SlimeResources::new(SlimeConfig::new(32, 24, 0));

    let err = resources
        .initialize(&mut host, None, InitialParticles::Scatter)
        .unwrap_err();
    assert!(matches!(
        err,
        SlimeError::ResourceAllocation {
            resource: ResourceKind::ParticleStore,
            reason: HostError::ZeroSized(_),
        }
    ));
    assert!(host.log().is_empty());
}

#[test]
fn zero_sized_fields_are_rejected_before_any_host_call() {
    for (w, h) in [(0, 24), (32, 0), (0, 0)] {
        let mut host = ReferenceHost::new();
        let mut resources = SlimeResources::new(SlimeConfig::new(w, h, 40));
        let err = resources
            .initialize(&mut host, None, InitialParticles::Scatter)
            .unwrap_err();
        assert!(matches!(
            err,
            SlimeError::ResourceAllocation {
                resource: ResourceKind::TrailField,
                ..
            }
        ));
        assert!(host.log().is_empty());
    }
}

#[test]
fn oversized_requests_fail_before_any_host_call() {
    // the store fits, the particle dispatch does not
    let mut host = ReferenceHost::new();
    let mut resources = SlimeResources::new(SlimeConfig::new(32, 24, 2_000_000));
    let err = resources
        .initialize(&mut host, None, InitialParticles::Scatter)
        .unwrap_err();
    assert!(matches!(err, SlimeError::InvalidConfig(_)));
    assert!(host.log().is_empty());

    let mut host = ReferenceHost::new();
    let mut resources = SlimeResources::new(SlimeConfig::new(32, 24, u32::MAX));
    let err = resources
        .initialize(&mut host, None, InitialParticles::Scatter)
        .unwrap_err();
    assert!(matches!(
        err,
        SlimeError::ResourceAllocation {
            resource: ResourceKind::ParticleStore,
            reason: HostError::ExceedsLimit { .. },
        }
    ));
    assert!(host.log().is_empty());

    let mut host = ReferenceHost::new();
    let mut resources = SlimeResources::new(SlimeConfig::new(8193, 24, 40));
    let err = resources
        .initialize(&mut host, None, InitialParticles::Scatter)
        .unwrap_err();
    assert!(matches!(
        err,
        SlimeError::ResourceAllocation {
            resource: ResourceKind::TrailField,
            reason: HostError::ExceedsLimit { .. },
        }
    ));
    assert!(host.log().is_empty());
}

#[test]
fn supplied_distribution_must_match_the_particle_count() {
    let mut host = ReferenceHost::new();
    let mut resources = SlimeResources::new(blank_config());
    let short = vec![GpuParticle::default(); 39];

    let err = resources
        .initialize(&mut host, None, InitialParticles::Supplied(short))
        .unwrap_err();
    assert!(matches!(err, SlimeError::InvalidConfig(_)));
    assert!(host.log().is_empty());
}

#[test]
fn scatter_runs_only_without_a_supplied_distribution() {
    let mut host = ReferenceHost::new();
    let resources = start(&mut host, blank_config());
    let dispatched: Vec<StageId> = host
        .log()
        .iter()
        .filter_map(|op| match op {
            HostOp::Dispatch(stage, _) => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(dispatched, vec![StageId::ScatterParticles, StageId::SeedTrail]);

    let particles = host.particles(resources.particles().unwrap()).unwrap();
    assert_eq!(particles.len(), 40);
    assert!(particles.iter().all(|p| {
        (0.0..32.0).contains(&p.position[0]) && (0.0..24.0).contains(&p.position[1])
    }));

    let supplied: Vec<GpuParticle> = (0..40)
        .map(|i| GpuParticle {
            position: [i as f32 * 0.5, 3.0],
            velocity: [0.0, 0.0],
            angle: 0.1 * i as f32,
        })
        .collect();
    let mut host = ReferenceHost::new();
    let mut resources = SlimeResources::new(blank_config());
    resources
        .initialize(&mut host, None, InitialParticles::Supplied(supplied.clone()))
        .unwrap();

    assert!(!host
        .log()
        .iter()
        .any(|op| matches!(op, HostOp::Dispatch(StageId::ScatterParticles, _))));
    assert_eq!(
        host.particles(resources.particles().unwrap()).unwrap(),
        supplied.as_slice()
    );
}

#[test]
fn second_initialize_is_refused() {
    let mut host = ReferenceHost::new();
    let mut resources = start(&mut host, blank_config());
    let err = resources
        .initialize(&mut host, None, InitialParticles::Scatter)
        .unwrap_err();
    assert_eq!(err, SlimeError::AlreadyInitialized);
    assert_eq!(host.live_textures(), 4);
}

#[test]
fn shutdown_is_idempotent() {
    let mut host = ReferenceHost::new();
    let mut resources = start(&mut host, blank_config());
    host.clear_log();

    resources.shutdown(&mut host);
    resources.shutdown(&mut host);

    assert!(resources.is_released());
    assert_eq!(host.live_textures(), 0);
    assert_eq!(host.live_buffers(), 0);
    assert_eq!(host.redundant_releases(), 0);

    let releases = host
        .log()
        .iter()
        .filter(|op| matches!(op, HostOp::ReleaseTexture(_) | HostOp::ReleaseBuffer(_)))
        .count();
    assert_eq!(releases, 5);
    assert_eq!(resources.display(), Err(SlimeError::NotRunning));
}

#[test]
fn shutdown_before_initialize_touches_nothing() {
    let mut host = ReferenceHost::new();
    let mut resources = SlimeResources::new(blank_config());
    resources.shutdown(&mut host);
    assert!(host.log().is_empty());
    assert!(!resources.is_live());
}
