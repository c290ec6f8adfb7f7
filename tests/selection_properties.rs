use proptest::prelude::*;

use amrkit::image_to_amr::image_to_amr;
use amrkit::index_space::range3d;
use amrkit::message::local::SerialCommunicator;
use amrkit::metadata::GlobalMetadata;
use amrkit::region::{owner_of, select_blocks};
use amrkit::{BlockRegistry, Centering, GridBlock};

fn registry() -> BlockRegistry {
    let image = GridBlock::new(0, [0.0; 3], [0.125; 3], range3d(0..16, 0..8, 0..8))
        .with_field_function("u", Centering::Cell, 1, |[i, j, k], s| s[0] = (i + j + k) as f64);
    let hierarchy = image_to_amr(&image, 3, 2, 12).unwrap();
    BlockRegistry::new(GlobalMetadata::gather(&hierarchy, &SerialCommunicator).unwrap()).unwrap()
}

fn corner() -> impl Strategy<Value = [f64; 3]> {
    [-0.5f64..2.5, -0.5f64..1.5, -0.5f64..1.5]
}

proptest! {
    #[test]
    fn selection_grows_with_the_region(
        min in corner(),
        size in [0.0f64..1.0, 0.0f64..1.0, 0.0f64..1.0],
        grow in [0.0f64..0.5, 0.0f64..0.5, 0.0f64..0.5],
        level in 0u32..3,
    ) {
        let r = registry();
        let max = [min[0] + size[0], min[1] + size[1], min[2] + size[2]];
        let big_min = [min[0] - grow[0], min[1] - grow[1], min[2] - grow[2]];
        let big_max = [max[0] + grow[0], max[1] + grow[1], max[2] + grow[2]];

        let small = select_blocks(&r, min, max, level);
        let big = select_blocks(&r, big_min, big_max, level);

        prop_assert!(small.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(small.iter().all(|id| big.contains(id)));
        prop_assert!(big.iter().all(|&id| r.entry(id).level() <= level));
    }

    #[test]
    fn ownership_partitions_ids_evenly(n in 0usize..500, workers in 1usize..17) {
        let mut counts = vec![0usize; workers];

        for id in 0..n {
            let owner = owner_of(id, workers);
            prop_assert!(owner < workers);
            prop_assert_eq!(owner, owner_of(id, workers));
            counts[owner] += 1;
        }
        let most = counts.iter().max().copied().unwrap_or(0);
        let least = counts.iter().min().copied().unwrap_or(0);
        prop_assert!(most - least <= 1);
        prop_assert_eq!(counts.iter().sum::<usize>(), n);
    }
}
