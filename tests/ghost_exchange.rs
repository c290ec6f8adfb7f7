use std::thread;

use amrkit::connectivity::{intersect, Connectivity, Relationship};
use amrkit::ghost::{self, count_unfilled, GhostLayerGenerator};
use amrkit::index_space::{range3d, IndexSpace};
use amrkit::message::comm::Communicator;
use amrkit::message::local::{ChannelCommunicator, SerialCommunicator};
use amrkit::metadata::GlobalMetadata;
use amrkit::{BlockKey, BlockRegistry, Centering, GridBlock, Hierarchy, LevelInfo, SENTINEL};

fn cube(origin: [f64; 3], offset: f64) -> GridBlock {
    GridBlock::new(0, origin, [1.0; 3], range3d(0..3, 0..3, 0..3))
        .with_field_function("u", Centering::Cell, 2, move |[i, j, k], s| {
            s[0] = offset + (9 * i + 3 * j + k) as f64;
            s[1] = -s[0];
        })
}

fn on_workers<T, F>(workers: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(ChannelCommunicator) -> T + Clone + Send + 'static,
{
    let handles: Vec<_> = ChannelCommunicator::group(workers)
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            thread::spawn(move || f(comm))
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn seeded(level: u32, origin: [f64; 3], h: f64, extent: IndexSpace, seed: f64) -> GridBlock {
    GridBlock::new(level, origin, [h; 3], extent)
        .with_field_function("u", Centering::Cell, 1, move |[i, j, k], s| s[0] = seed + (16 * i + 4 * j + k) as f64)
        .with_field_function("p", Centering::Point, 1, move |[i, j, k], s| s[0] = seed + (i + 10 * j + 100 * k) as f64)
}

/// Two coarse cubes side by side, and a fine block straddling their shared
/// face. Every ghost entry has a donor on some other block.
fn mixed_levels() -> Hierarchy {
    let mut h = Hierarchy::new(vec![
        LevelInfo { whole_extent: Some(range3d(0..8, 0..4, 0..4)), num_blocks: 2 },
        LevelInfo { whole_extent: Some(range3d(0..16, 0..8, 0..8)), num_blocks: 1 },
    ]);
    h.insert(BlockKey::new(0, 0), seeded(0, [0.0; 3], 1.0, range3d(0..4, 0..4, 0..4), 0.0)).unwrap();
    h.insert(BlockKey::new(0, 1), seeded(0, [4.0, 0.0, 0.0], 1.0, range3d(0..4, 0..4, 0..4), 100.0)).unwrap();
    h.insert(BlockKey::new(1, 0), seeded(1, [2.0, 1.0, 1.0], 0.5, range3d(0..8, 0..4, 0..4), 1000.0)).unwrap();
    h
}

fn side_by_side() -> Hierarchy {
    let mut h = Hierarchy::new(vec![LevelInfo {
        whole_extent: Some(range3d(0..6, 0..3, 0..3)),
        num_blocks: 2,
    }]);
    h.insert(BlockKey::new(0, 0), cube([0.0; 3], 0.0)).unwrap();
    h.insert(BlockKey::new(0, 1), cube([3.0, 0.0, 0.0], 1000.0)).unwrap();
    h
}

#[test]
fn side_by_side_cubes_get_one_face_layer_each() {
    let input = side_by_side();
    let output = ghost::generate(&input, 1, &SerialCommunicator).unwrap();

    for (key, neighbor, face, adjacent) in [(0, 1, 3, 0), (1, 0, -1, 2)] {
        let block = output.get(&BlockKey::new(0, key)).unwrap();
        let source = input.get(&BlockKey::new(0, neighbor)).unwrap();
        let ghosts: Vec<_> = block.extent().iter().filter(|i| !block.interior().contains(*i)).collect();

        assert_eq!(ghosts.len(), 9);

        for index in ghosts {
            assert_eq!(index[0], face);
            let expected = source.get_slice("u", [adjacent, index[1], index[2]]).unwrap();
            assert_eq!(block.get_slice("u", index).unwrap(), expected);
        }
        assert_eq!(count_unfilled(block)["u"], 0);
    }
}

#[test]
fn face_records_are_symmetric() {
    let metadata = GlobalMetadata::gather(&side_by_side(), &SerialCommunicator).unwrap();
    let registry = BlockRegistry::new(metadata).unwrap();
    let (a, b) = (registry.entry(0), registry.entry(1));

    let ab = intersect(&registry, a, b, 1).unwrap().unwrap();
    let ba = intersect(&registry, b, a, 1).unwrap().unwrap();

    assert_eq!(ab.relationship, Relationship::Face);
    assert_eq!(ba.relationship, Relationship::Face);
    assert_eq!((ab.source, ab.target), (ba.target, ba.source));
    assert_eq!(ab.region, range3d(-1..0, 0..3, 0..3));
    assert_eq!(ba.region, range3d(3..4, 0..3, 0..3));
    assert_eq!(ab.region.len(), ba.region.len());
}

#[test]
fn phases_expose_intermediate_results() {
    let input = side_by_side();
    let connected = GhostLayerGenerator::new(2)
        .register(&input, &SerialCommunicator)
        .unwrap()
        .compute_connectivity()
        .unwrap();

    let connectivity: &Connectivity = connected.connectivity();
    assert_eq!(connectivity.len(), 2);
    assert_eq!(connectivity.neighbors(0).collect::<Vec<_>>(), vec![1]);

    let allocated = connected.allocate().unwrap();
    let (_, grown) = allocated.blocks().next().unwrap();
    assert_eq!(grown.extent(), &range3d(0..5, 0..3, 0..3));
    assert_eq!(grown.get_slice("u", [4, 0, 0]), Some(&[SENTINEL, SENTINEL][..]));

    let exchanged = allocated.exchange(&SerialCommunicator).unwrap();
    assert_eq!(exchanged.num_received(), 0);

    let output = exchanged.fill().unwrap();
    assert_eq!(output.get(&BlockKey::new(0, 0)).unwrap().get_slice("u", [4, 0, 0]), Some(&[1009.0, -1009.0][..]));
}

#[test]
fn ghost_generation_is_repeatable_with_zero_depth() {
    let once = ghost::generate(&side_by_side(), 2, &SerialCommunicator).unwrap();
    let again = ghost::generate(&once, 0, &SerialCommunicator).unwrap();
    assert_eq!(once, again);
}

#[test]
fn remote_neighbors_supply_ghosts_like_local_ones() {
    let full = side_by_side();
    let serial = ghost::generate(&full, 1, &SerialCommunicator).unwrap();

    let parts = on_workers(2, move |comm| {
        let local = full.partition(comm.rank(), comm.size());
        ghost::generate(&local, 1, &comm).unwrap()
    });

    for (rank, part) in parts.iter().enumerate() {
        let key = BlockKey::new(0, rank);
        let block = part.get(&key).unwrap();
        assert_eq!(part.len(), 1);
        assert_eq!(Some(block), serial.get(&key));
        assert_eq!(count_unfilled(block)["u"], 0);
    }
}

#[test]
fn ghost_layers_do_not_depend_on_the_number_of_workers() {
    let full = mixed_levels();
    let serial = ghost::generate(&full, 2, &SerialCommunicator).unwrap();

    for (_, block) in serial.iter() {
        assert!(count_unfilled(block).values().all(|&n| n == 0));
    }

    for workers in 1..=3 {
        let input = full.clone();
        let parts = on_workers(workers, move |comm| {
            let local = input.partition(comm.rank(), comm.size());
            ghost::generate(&local, 2, &comm).unwrap()
        });

        assert_eq!(parts.iter().map(Hierarchy::len).sum::<usize>(), 3);

        for part in &parts {
            for (key, block) in part.iter() {
                assert_eq!(Some(block), serial.get(key), "block {:?} on {} workers", key, workers);
            }
        }
    }
}

#[test]
fn blocks_held_by_several_workers_get_identical_ghosts() {
    let full = mixed_levels();
    let serial = ghost::generate(&full, 1, &SerialCommunicator).unwrap();
    let held = [
        vec![BlockKey::new(0, 0)],
        vec![BlockKey::new(0, 0), BlockKey::new(0, 1)],
        vec![BlockKey::new(1, 0), BlockKey::new(0, 1)],
    ];

    let parts = on_workers(3, move |comm| {
        let mut local = full.empty_like();

        for key in &held[comm.rank()] {
            local.insert(*key, full.get(key).unwrap().clone()).unwrap();
        }
        ghost::generate(&local, 1, &comm).unwrap()
    });

    for part in &parts {
        for (key, block) in part.iter() {
            assert_eq!(Some(block), serial.get(key));
        }
    }
    assert_eq!(parts[1].len(), 2);
}
