use proptest::prelude::*;

use slime_trail::config::TrailSeed;
use slime_trail::stages::{FieldExtent, StageId, StageSet, WorkgroupSize, group_count};

#[test]
fn particle_counts_round_up() {
    let set = StageSet::standard(TrailSeed::Environment);
    let mv = set.get(StageId::MoveParticles);
    let extent = FieldExtent::new(64, 64);
    for (count, groups) in [(1, 1), (15, 1), (16, 1), (17, 2), (500_000, 31_250)] {
        assert_eq!(
            mv.groups_for(extent, count).as_array(),
            [groups, 1, 1],
            "particle count {count}"
        );
    }
}

#[test]
fn scatter_and_move_agree() {
    let set = StageSet::standard(TrailSeed::Blank);
    let extent = FieldExtent::new(1920, 1080);
    for count in [1, 33, 500_000] {
        assert_eq!(
            set.get(StageId::ScatterParticles).groups_for(extent, count),
            set.get(StageId::MoveParticles).groups_for(extent, count)
        );
    }
}

proptest! {
    #[test]
    fn particle_groups_cover_exactly(count in 1u32..2_000_000) {
        let size = WorkgroupSize::PARTICLES.x;
        let groups = group_count(count, size);
        prop_assert!(groups * size >= count);
        prop_assert!((groups - 1) * size < count);
    }

    #[test]
    fn pixel_groups_cover_the_field(width in 1u32..4096, height in 1u32..4096) {
        let set = StageSet::standard(TrailSeed::Environment);
        let extent = FieldExtent::new(width, height);
        for id in [StageId::SeedTrail, StageId::Diffuse] {
            let stage = set.get(id);
            let groups = stage.groups_for(extent, 1);
            prop_assert_eq!(groups.z, 1);
            prop_assert!(groups.x * stage.workgroup.x >= width);
            prop_assert!(groups.y * stage.workgroup.y >= height);
            prop_assert!((groups.x - 1) * stage.workgroup.x < width);
            prop_assert!((groups.y - 1) * stage.workgroup.y < height);
        }
    }

    #[test]
    fn pixel_groups_ignore_particle_count(count in 1u32..1_000_000) {
        let set = StageSet::standard(TrailSeed::Environment);
        let groups = set.get(StageId::Diffuse).groups_for(FieldExtent::new(100, 50), count);
        prop_assert_eq!(groups.as_array(), [13, 7, 1]);
    }
}
