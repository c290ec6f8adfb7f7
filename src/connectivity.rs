use std::cmp::Reverse;
use std::collections::BTreeMap;

use log::{debug, info};
use rayon::prelude::*;

use crate::error::Result;
use crate::index_space::{Axis, IndexSpace};
use crate::registry::{BlockEntry, BlockId, BlockRegistry};




/**
 * How the source of a connectivity record relates to its target.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relationship {
    /// Same level, the exchange region lies outside the target along one axis.
    Face,
    /// Same level, outside along two axes.
    Edge,
    /// Same level, outside along all three axes.
    Corner,
    /// A coarser source supplies a finer target.
    CoarseToFine,
    /// A finer source supplies a coarser target.
    FineToCoarse,
}




/**
 * An adjacency discovered between two blocks: the cells of the target that
 * the source's interior can supply. The region is expressed in the target
 * block's own index space (the space of its `extent`).
 */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectivityRecord {
    pub source: BlockId,
    pub target: BlockId,
    pub source_level: u32,
    pub target_level: u32,
    pub region: IndexSpace,
    pub relationship: Relationship,
}




// ============================================================================
impl ConnectivityRecord {

    pub fn is_same_level(&self) -> bool {
        self.source_level == self.target_level
    }

    /**
     * Sort key for filling a ghost entry which several records can supply:
     * same-level sources first, then finer sources, then lower source id.
     */
    pub fn priority(&self) -> (bool, Reverse<u32>, BlockId) {
        (!self.is_same_level(), Reverse(self.source_level), self.source)
    }
}




/**
 * Return the extent of a block after growing it by `depth` cells on each
 * side that lies strictly inside the whole extent of its level. Growth is
 * clamped to the whole extent, and is added to any ghost layers the block
 * already has. The result is in the global index space of the block's level.
 */
pub fn grown_extent(entry: &BlockEntry, whole: &IndexSpace, depth: i64) -> IndexSpace {
    let interior = &entry.global_extent;
    let g = entry.metadata.ghost_layers;
    let current = interior.extend_sides(
        [g[0][0], g[1][0], g[2][0]],
        [g[0][1], g[1][1], g[2][1]]);

    let mut start = current.start();
    let mut end = current.end();
    let ws = whole.start();
    let we = whole.end();

    for n in 0..3 {
        if interior.start()[n] > ws[n] {
            start[n] = (start[n] - depth).max(ws[n]).min(start[n]);
        }
        if interior.end()[n] < we[n] {
            end[n] = (end[n] + depth).min(we[n]).max(end[n]);
        }
    }
    IndexSpace::from_corners(start, end)
}




/**
 * Determine what the interior of `source` can supply to the ghost region of
 * `target`, when the target is grown by `depth` cells. Returns `None` if the
 * blocks are not neighbors. Fails if the levels of the two blocks are not
 * related by an integer refinement ratio, or if the target's level has no
 * whole extent.
 *
 * The result depends only on the geometry of the two blocks, never on which
 * worker owns them.
 */
pub fn intersect(
    registry: &BlockRegistry,
    source: &BlockEntry,
    target: &BlockEntry,
    depth: i64) -> Result<Option<ConnectivityRecord>>
{
    if source.id == target.id {
        return Ok(None);
    }
    let ls = source.level();
    let lt = target.level();
    let whole = registry.whole_extent(lt)?;
    let region = grown_extent(target, whole, depth);

    let supplied = if ls == lt {
        source.global_extent.clone()
    } else if ls < lt {
        source.global_extent.refine(registry.refinement_ratio(ls, lt)?)
    } else {
        source.global_extent.coarsen(registry.refinement_ratio(lt, ls)?)
    };

    let overlap = match region.intersect(&supplied) {
        Some(overlap) => overlap,
        None => return Ok(None),
    };
    let interior = &target.global_extent;

    if interior.contains_space(&overlap) {
        return Ok(None);
    }

    let relationship = if ls == lt {
        let outside = Axis::ALL
            .iter()
            .filter(|&&axis| {
                let o = overlap.range(axis);
                let t = interior.range(axis);
                o.end <= t.start || o.start >= t.end
            })
            .count();
        match outside {
            1 => Relationship::Face,
            2 => Relationship::Edge,
            _ => Relationship::Corner,
        }
    } else if ls < lt {
        Relationship::CoarseToFine
    } else {
        Relationship::FineToCoarse
    };

    let shift = target.shift();

    Ok(Some(ConnectivityRecord {
        source: source.id,
        target: target.id,
        source_level: ls,
        target_level: lt,
        region: overlap.translate([-shift[0], -shift[1], -shift[2]]),
        relationship,
    }))
}




/**
 * The connectivity of every ordered pair of blocks in a registry, grouped by
 * target and ordered by fill priority within each group. Having a value of
 * this type means connectivity is complete for the whole hierarchy.
 */
#[derive(Clone, Debug)]
pub struct Connectivity {
    depth: i64,
    records: BTreeMap<BlockId, Vec<ConnectivityRecord>>,
}




// ============================================================================
impl Connectivity {

    /**
     * Evaluate `intersect` for all ordered pairs of blocks. Targets are
     * processed in parallel.
     */
    pub fn compute(registry: &BlockRegistry, depth: i64) -> Result<Self> {
        let entries = registry.entries();

        let groups: Vec<(BlockId, Vec<ConnectivityRecord>)> = entries
            .par_iter()
            .map(|target| {
                let mut records = Vec::new();

                for source in entries {
                    if let Some(record) = intersect(registry, source, target, depth)? {
                        debug!("{:?} {} -> {} over {:?}", record.relationship, record.source, record.target, record.region);
                        records.push(record);
                    }
                }
                records.sort_by_key(|r| r.priority());
                Ok((target.id, records))
            })
            .collect::<Result<_>>()?;

        let records: BTreeMap<_, _> = groups.into_iter().collect();
        let connectivity = Self { depth, records };

        info!(
            "computed connectivity for {} blocks: {} records at depth {}",
            entries.len(),
            connectivity.len(),
            depth
        );
        Ok(connectivity)
    }

    pub fn depth(&self) -> i64 {
        self.depth
    }

    /**
     * Return the records whose target is the given block, in fill priority
     * order.
     */
    pub fn records_for(&self, target: BlockId) -> &[ConnectivityRecord] {
        self.records.get(&target).map_or(&[], |r| &r[..])
    }

    /**
     * Return the ids of the blocks supplying data to the given block.
     */
    pub fn neighbors(&self, target: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.records_for(target).iter().map(|r| r.source)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectivityRecord> {
        self.records.values().flat_map(|r| r.iter())
    }

    pub fn len(&self) -> usize {
        self.records.values().map(|r| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::block::GridBlock;
    use crate::index_space::range3d;
    use crate::metadata::{BlockKey, BlockMetadata, GlobalMetadata, LevelInfo};

    fn registry(whole: Vec<IndexSpace>, blocks: Vec<(u32, [f64; 3], f64, IndexSpace)>) -> BlockRegistry {
        let mut counts = vec![0; whole.len()];
        let entries = blocks
            .into_iter()
            .map(|(level, origin, h, extent)| {
                let index = counts[level as usize];
                counts[level as usize] += 1;
                let block = GridBlock::new(level, origin, [h; 3], extent);
                BlockMetadata::from_block(BlockKey::new(level, index), 0, &block)
            })
            .collect();
        let levels = whole
            .into_iter()
            .zip(counts)
            .map(|(w, num_blocks)| LevelInfo { whole_extent: Some(w), num_blocks })
            .collect();
        BlockRegistry::new(GlobalMetadata::from_entries(levels, entries).unwrap()).unwrap()
    }

    fn side_by_side() -> BlockRegistry {
        registry(vec![range3d(0..6, 0..3, 0..3)], vec![
            (0, [0.0; 3], 1.0, range3d(0..3, 0..3, 0..3)),
            (0, [3.0, 0.0, 0.0], 1.0, range3d(0..3, 0..3, 0..3)),
        ])
    }

    #[test]
    fn face_neighbors_produce_one_face_record_each_way() {
        let r = side_by_side();
        let ab = intersect(&r, r.entry(0), r.entry(1), 1).unwrap().unwrap();
        let ba = intersect(&r, r.entry(1), r.entry(0), 1).unwrap().unwrap();

        assert_eq!(ab.relationship, Relationship::Face);
        assert_eq!(ab.region, range3d(-1..0, 0..3, 0..3));
        assert_eq!((ab.source, ab.target), (0, 1));

        assert_eq!(ba.relationship, Relationship::Face);
        assert_eq!(ba.region, range3d(3..4, 0..3, 0..3));
        assert_eq!((ba.source, ba.target), (1, 0));
        assert_eq!(ab.region.len(), ba.region.len());
    }

    #[test]
    fn zero_depth_produces_no_records() {
        let r = side_by_side();
        assert!(intersect(&r, r.entry(0), r.entry(1), 0).unwrap().is_none());
        assert!(Connectivity::compute(&r, 0).unwrap().is_empty());
    }

    #[test]
    fn corner_contact_produces_corner_record() {
        let r = registry(vec![range3d(0..4, 0..4, 0..4)], vec![
            (0, [0.0; 3], 1.0, range3d(0..2, 0..2, 0..2)),
            (0, [2.0; 3], 1.0, range3d(0..2, 0..2, 0..2)),
        ]);
        let record = intersect(&r, r.entry(1), r.entry(0), 2).unwrap().unwrap();
        assert_eq!(record.relationship, Relationship::Corner);
        assert_eq!(record.region, range3d(2..4, 2..4, 2..4));
    }

    #[test]
    fn edge_contact_produces_edge_record() {
        let r = registry(vec![range3d(0..4, 0..4, 0..2)], vec![
            (0, [0.0; 3], 1.0, range3d(0..2, 0..2, 0..2)),
            (0, [2.0, 2.0, 0.0], 1.0, range3d(0..2, 0..2, 0..2)),
        ]);
        let record = intersect(&r, r.entry(0), r.entry(1), 1).unwrap().unwrap();
        assert_eq!(record.relationship, Relationship::Edge);
        assert_eq!(record.region, range3d(-1..0, -1..0, 0..2));
    }

    #[test]
    fn separated_blocks_are_not_neighbors() {
        let r = registry(vec![range3d(0..8, 0..2, 0..2)], vec![
            (0, [0.0; 3], 1.0, range3d(0..2, 0..2, 0..2)),
            (0, [5.0, 0.0, 0.0], 1.0, range3d(0..2, 0..2, 0..2)),
        ]);
        assert!(intersect(&r, r.entry(0), r.entry(1), 3).unwrap().is_none());
        assert!(intersect(&r, r.entry(0), r.entry(1), 4).unwrap().is_some());
    }

    #[test]
    fn cross_level_records_are_tagged_by_direction() {
        let r = registry(vec![range3d(0..4, 0..4, 0..4), range3d(0..8, 0..8, 0..8)], vec![
            (0, [0.0; 3], 1.0, range3d(0..4, 0..4, 0..4)),
            (1, [1.0; 3], 0.5, range3d(0..4, 0..4, 0..4)),
        ]);
        let c2f = intersect(&r, r.entry(0), r.entry(1), 1).unwrap().unwrap();
        assert_eq!(c2f.relationship, Relationship::CoarseToFine);
        assert_eq!(c2f.region, range3d(-1..5, -1..5, -1..5));

        // The fine block covers coarse interior cells only, so the coarse
        // block (which has no internal sides) gets nothing.
        assert!(intersect(&r, r.entry(1), r.entry(0), 1).unwrap().is_none());
    }

    #[test]
    fn fine_source_coarsens_with_floor_division() {
        let r = registry(vec![range3d(0..4, 0..2, 0..2), range3d(0..8, 0..4, 0..4)], vec![
            (0, [0.0; 3], 1.0, range3d(0..2, 0..2, 0..2)),
            (1, [2.0, 0.0, 0.0], 0.5, range3d(0..3, 0..4, 0..4)),
        ]);
        let f2c = intersect(&r, r.entry(1), r.entry(0), 1).unwrap().unwrap();
        assert_eq!(f2c.relationship, Relationship::FineToCoarse);
        assert_eq!(f2c.region, range3d(2..3, 0..2, 0..2));
    }

    #[test]
    fn records_are_ordered_by_priority() {
        let r = registry(vec![range3d(0..6, 0..3, 0..3), range3d(0..12, 0..6, 0..6)], vec![
            (0, [0.0; 3], 1.0, range3d(0..3, 0..3, 0..3)),
            (0, [3.0, 0.0, 0.0], 1.0, range3d(0..3, 0..3, 0..3)),
            (1, [3.0, 0.0, 0.0], 0.5, range3d(0..2, 0..6, 0..6)),
        ]);
        let c = Connectivity::compute(&r, 1).unwrap();
        let sources: Vec<_> = c.neighbors(0).collect();
        assert_eq!(sources, vec![1, 2]);
        assert_eq!(c.records_for(0)[1].relationship, Relationship::FineToCoarse);
    }
}
