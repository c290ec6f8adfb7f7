use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::block::GridBlock;
use crate::connectivity::{grown_extent, Connectivity, ConnectivityRecord};
use crate::error::{Error, Result};
use crate::field::Centering;
use crate::index_space::{Index, IndexSpace};
use crate::message::comm::Communicator;
use crate::metadata::{BlockKey, GlobalMetadata, Hierarchy};
use crate::registry::{BlockId, BlockRegistry};




/**
 * Entry point of ghost layer generation. Each phase of the generation
 * consumes the previous one and yields the next, so the phases can only run
 * in order:
 *
 * `GhostLayerGenerator` -> `Registered` -> `Connected` -> `Allocated` ->
 * `Exchanged` -> `Hierarchy`
 *
 * Input blocks are never modified; the output hierarchy holds newly
 * allocated blocks whose extents are grown by the ghost depth on every side
 * which lies strictly inside the whole extent of the block's level. Ghost
 * entries supplied by blocks held on other workers are received during the
 * exchange phase, so the output does not depend on how the hierarchy is
 * partitioned.
 */
#[derive(Clone, Copy, Debug)]
pub struct GhostLayerGenerator {
    depth: i64,
}




/**
 * Metadata has been gathered from every worker, and the blocks are
 * registered with global ids.
 */
pub struct Registered<'a> {
    depth: i64,
    hierarchy: &'a Hierarchy,
    registry: BlockRegistry,
}




/**
 * The connectivity of every ordered pair of blocks is known.
 */
pub struct Connected<'a> {
    depth: i64,
    hierarchy: &'a Hierarchy,
    registry: BlockRegistry,
    connectivity: Connectivity,
}




/**
 * Grown blocks are allocated, with every new entry set to the sentinel.
 */
pub struct Allocated<'a> {
    hierarchy: &'a Hierarchy,
    registry: BlockRegistry,
    connectivity: Connectivity,
    blocks: Vec<(BlockKey, GridBlock)>,
}




/**
 * The parts of remote source blocks needed by local targets have been
 * received, keyed by `(source, target)`.
 */
pub struct Exchanged<'a> {
    hierarchy: &'a Hierarchy,
    registry: BlockRegistry,
    connectivity: Connectivity,
    blocks: Vec<(BlockKey, GridBlock)>,
    slabs: BTreeMap<(BlockId, BlockId), GridBlock>,
}




/**
 * The interior entries of a source block which one connectivity record
 * reads, in the source's own index space.
 */
#[derive(Serialize, Deserialize)]
struct Slab {
    source: BlockId,
    target: BlockId,
    block: GridBlock,
}




/**
 * Message tag of ghost slab exchanges.
 */
const SLAB_TAG: u64 = 0x10;




// ============================================================================
impl GhostLayerGenerator {

    pub fn new(depth: usize) -> Self {
        Self { depth: depth as i64 }
    }

    pub fn depth(&self) -> usize {
        self.depth as usize
    }

    /**
     * Gather the block metadata from every worker and build the registry.
     * This is a collective operation. Fails if a level holding blocks does
     * not declare a whole extent, if any block's geometry is not that of a
     * uniform grid, or if the local blocks do not carry the same fields.
     */
    pub fn register<'a, C: Communicator>(self, hierarchy: &'a Hierarchy, comm: &C) -> Result<Registered<'a>> {
        validate_field_layout(hierarchy)?;

        let metadata = GlobalMetadata::gather(hierarchy, comm)?;

        for entry in metadata.entries() {
            entry.to_block().validate(&format!("{:?}", entry.key))?;
        }
        let registry = BlockRegistry::new(metadata)?;

        for (level, info) in hierarchy.levels().iter().enumerate() {
            if info.num_blocks > 0 {
                registry.whole_extent(level as u32)?;
            }
        }
        info!("rank {}: registered {} blocks for ghost depth {}", comm.rank(), registry.len(), self.depth);

        Ok(Registered {
            depth: self.depth,
            hierarchy,
            registry,
        })
    }
}




// ============================================================================
impl<'a> Registered<'a> {

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn compute_connectivity(self) -> Result<Connected<'a>> {
        let connectivity = Connectivity::compute(&self.registry, self.depth)?;

        Ok(Connected {
            depth: self.depth,
            hierarchy: self.hierarchy,
            registry: self.registry,
            connectivity,
        })
    }
}




// ============================================================================
impl<'a> Connected<'a> {

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /**
     * Allocate the grown version of every local block. Entries of the input
     * extent, including any ghost entries the input block already carries,
     * are copied verbatim; new entries are set to the sentinel.
     */
    pub fn allocate(self) -> Result<Allocated<'a>> {
        let mut blocks = Vec::with_capacity(self.hierarchy.len());

        for (&key, block) in self.hierarchy.iter() {
            let id = self.block_id(key)?;
            let entry = self.registry.entry(id);
            let whole = self.registry.whole_extent(key.level)?;
            let shift = entry.shift();
            let extent = grown_extent(entry, whole, self.depth).translate([-shift[0], -shift[1], -shift[2]]);

            let interior = &entry.metadata.extent;
            let (s0, e0) = (interior.start(), interior.end());
            let (s1, e1) = (extent.start(), extent.end());
            let ghost_layers = [0, 1, 2].map(|n| [s0[n] - s1[n], e1[n] - e0[n]]);

            let mut grown = block.allocate_like(extent, ghost_layers);
            copy_overlap(block, &mut grown);
            debug!("block {} {:?}: extent {:?} grown to {:?}", id, key, block.extent(), grown.extent());
            blocks.push((key, grown));
        }
        info!("allocated {} ghosted blocks", blocks.len());

        Ok(Allocated {
            hierarchy: self.hierarchy,
            registry: self.registry,
            connectivity: self.connectivity,
            blocks,
        })
    }

    fn block_id(&self, key: BlockKey) -> Result<BlockId> {
        self.registry
            .global_index(key)
            .ok_or_else(|| Error::IncompleteMetadata(format!("local block {:?} was not registered", key)))
    }
}




// ============================================================================
impl<'a> Allocated<'a> {

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn blocks(&self) -> impl Iterator<Item = (&BlockKey, &GridBlock)> {
        self.blocks.iter().map(|(k, b)| (k, b))
    }

    /**
     * Send every remote worker holding a target block the parts of locally
     * owned source blocks it reads, and receive the parts this worker's
     * targets read from blocks it does not hold. This is a collective
     * operation. A source block is sent by its owner, the lowest rank holding
     * it, so every worker derives the same message pattern from the
     * registry.
     */
    pub fn exchange<C: Communicator>(self, comm: &C) -> Result<Exchanged<'a>> {
        let rank = comm.rank();
        let mut outgoing: BTreeMap<usize, Vec<Slab>> = BTreeMap::new();
        let mut sources = BTreeSet::new();

        for (from, to, record) in routes(&self.registry, &self.connectivity) {
            if from == rank {
                let key = self.registry.entry(record.source).metadata.key;
                let source = self.hierarchy
                    .get(&key)
                    .ok_or_else(|| Error::IncompleteMetadata(format!("owned block {:?} is not loaded", key)))?;

                let slabs = outgoing.entry(to).or_default();

                if let Some(extent) = slab_extent(&self.registry, record)? {
                    slabs.push(Slab {
                        source: record.source,
                        target: record.target,
                        block: extract(source, extent),
                    });
                }
            }
            if to == rank {
                sources.insert(from);
            }
        }

        let num_sent: usize = outgoing.values().map(Vec::len).sum();
        let outgoing: BTreeMap<usize, Vec<u8>> = outgoing
            .into_iter()
            .map(|(to, slabs)| {
                let bytes = rmp_serde::to_vec(&slabs)
                    .map_err(|e| Error::Communication(format!("encoding ghost slabs: {}", e)))?;
                Ok((to, bytes))
            })
            .collect::<Result<_>>()?;

        let mut slabs = BTreeMap::new();

        for (from, bytes) in comm.exchange(SLAB_TAG, outgoing, &sources)? {
            let received: Vec<Slab> = rmp_serde::from_slice(&bytes)
                .map_err(|e| Error::Communication(format!("decoding ghost slabs from rank {}: {}", from, e)))?;

            for slab in received {
                slabs.insert((slab.source, slab.target), slab.block);
            }
        }
        info!("rank {}: sent {} ghost slabs, received {} from {} ranks", rank, num_sent, slabs.len(), sources.len());

        Ok(Exchanged {
            hierarchy: self.hierarchy,
            registry: self.registry,
            connectivity: self.connectivity,
            blocks: self.blocks,
            slabs,
        })
    }
}




// ============================================================================
impl<'a> Exchanged<'a> {

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    /**
     * Return the number of slabs received from other workers.
     */
    pub fn num_received(&self) -> usize {
        self.slabs.len()
    }

    /**
     * Fill the new ghost entries of every block from the interiors of its
     * neighbors, local or received, and return the output hierarchy.
     * Entries which no neighbor can supply keep the sentinel value.
     */
    pub fn fill(self) -> Result<Hierarchy> {
        let hierarchy = self.hierarchy;
        let registry = &self.registry;
        let connectivity = &self.connectivity;
        let slabs = &self.slabs;

        let filled: Vec<(BlockKey, GridBlock, usize)> = self.blocks
            .into_par_iter()
            .map(|(key, mut block)| {
                let n = fill_block(hierarchy, slabs, registry, connectivity, key, &mut block)?;
                Ok((key, block, n))
            })
            .collect::<Result<_>>()?;

        let mut output = hierarchy.empty_like();
        let mut unfilled = 0;

        for (key, block, n) in filled {
            unfilled += n;
            output.insert(key, block)?;
        }
        if unfilled > 0 {
            warn!("{} ghost entries have no donor and are left at the sentinel", unfilled);
        }
        info!("filled ghost layers of {} blocks", output.len());
        Ok(output)
    }
}




/**
 * Run every phase of ghost generation. This is a collective operation: each
 * worker calls it with its own part of the hierarchy.
 */
pub fn generate<C: Communicator>(hierarchy: &Hierarchy, depth: usize, comm: &C) -> Result<Hierarchy> {
    GhostLayerGenerator::new(depth)
        .register(hierarchy, comm)?
        .compute_connectivity()?
        .allocate()?
        .exchange(comm)?
        .fill()
}




fn validate_field_layout(hierarchy: &Hierarchy) -> Result<()> {
    let mut blocks = hierarchy.iter();

    let (first_key, first) = match blocks.next() {
        Some(b) => b,
        None => return Ok(()),
    };
    let layout = |b: &GridBlock| -> Vec<(String, Centering, usize)> {
        b.fields().map(|(name, f)| (name.clone(), f.centering(), f.num_components())).collect()
    };
    let expected = layout(first);

    for (key, block) in blocks {
        let found = layout(block);

        if found != expected {
            let name = found
                .iter()
                .zip(&expected)
                .find(|(a, b)| a != b)
                .map_or_else(|| "*".to_string(), |(a, _)| a.0.clone());

            return Err(Error::FieldMismatch {
                name,
                reason: format!("block {:?} has fields {:?}, block {:?} has {:?}", key, found, first_key, expected),
            });
        }
    }
    Ok(())
}

fn copy_overlap(source: &GridBlock, target: &mut GridBlock) {
    let names: Vec<String> = source.fields().map(|(name, _)| name.clone()).collect();

    for name in names {
        let (from, centering) = match source.field(&name) {
            Some(f) => (f, f.centering()),
            None => continue,
        };
        let space_in = source.space(centering);
        let space_out = target.space(centering);

        if let Some(to) = target.field_mut(&name) {
            for index in space_in.iter() {
                let a = space_in.row_major_offset(index);
                let b = space_out.row_major_offset(index);
                to.tuple_mut(b).copy_from_slice(from.tuple(a));
            }
        }
    }
}




/**
 * Return `(from, to, record)` for every record whose source must be sent from
 * rank `from` to rank `to`: `to` holds the target but not the source, and
 * `from` owns the source. Blocks nobody holds are never sent.
 */
fn routes<'r>(registry: &BlockRegistry, connectivity: &'r Connectivity) -> Vec<(usize, usize, &'r ConnectivityRecord)> {
    let mut routes = Vec::new();

    for record in connectivity.iter() {
        let source = &registry.entry(record.source).metadata;
        let target = &registry.entry(record.target).metadata;

        if let Some(from) = source.owner() {
            for &to in &target.holders {
                if !source.holders.contains(&to) {
                    routes.push((from, to, record));
                }
            }
        }
    }
    routes
}

fn ratio_for(registry: &BlockRegistry, record: &ConnectivityRecord) -> Result<Index> {
    if record.source_level < record.target_level {
        registry.refinement_ratio(record.source_level, record.target_level)
    } else if record.source_level > record.target_level {
        registry.refinement_ratio(record.target_level, record.source_level)
    } else {
        Ok([1; 3])
    }
}

/**
 * Return the smallest part of the source's interior, in the source's index
 * space, holding every cell and point the record's region maps onto. Index
 * mapping is monotonic, so mapping the region's corners is enough.
 */
fn slab_extent(registry: &BlockRegistry, record: &ConnectivityRecord) -> Result<Option<IndexSpace>> {
    let source = registry.entry(record.source);
    let target_shift = registry.entry(record.target).shift();
    let ratio = ratio_for(registry, record)?;
    let map = |index: Index, centering| {
        sub(map_index(add(index, target_shift), record.source_level, record.target_level, ratio, centering), source.shift())
    };

    let lo = record.region.start();
    let hi = record.region.end();
    let c0 = map(lo, Centering::Cell);
    let c1 = map([hi[0] - 1, hi[1] - 1, hi[2] - 1], Centering::Cell);
    let p0 = map(lo, Centering::Point);
    let p1 = map(hi, Centering::Point);

    let interior = &source.metadata.extent;
    let (is, ie) = (interior.start(), interior.end());
    let start = [0, 1, 2].map(|n| c0[n].min(p0[n]).max(is[n]));
    let end = [0, 1, 2].map(|n| (c1[n] + 1).max(p1[n]).min(ie[n]));

    if (0..3).any(|n| end[n] < start[n]) {
        Ok(None)
    } else {
        Ok(Some(IndexSpace::from_corners(start, end)))
    }
}

/**
 * Copy the given part of a block into a new block with no ghost layers.
 */
fn extract(source: &GridBlock, extent: IndexSpace) -> GridBlock {
    let mut slab = source.allocate_like(extent, [[0; 2]; 3]);
    let names: Vec<String> = source.fields().map(|(name, _)| name.clone()).collect();

    for name in names {
        let (from, centering) = match source.field(&name) {
            Some(f) => (f, f.centering()),
            None => continue,
        };
        let space_in = source.space(centering);
        let space_out = slab.space(centering);

        if let Some(to) = slab.field_mut(&name) {
            for (b, index) in space_out.iter().enumerate().filter(|(_, i)| space_in.contains(*i)) {
                to.tuple_mut(b).copy_from_slice(from.tuple(space_in.row_major_offset(index)));
            }
        }
    }
    slab
}




/**
 * Fill the entries of `block` outside the input block's extent. Returns the
 * number of entries left at the sentinel.
 */
fn fill_block(
    hierarchy: &Hierarchy,
    slabs: &BTreeMap<(BlockId, BlockId), GridBlock>,
    registry: &BlockRegistry,
    connectivity: &Connectivity,
    key: BlockKey,
    block: &mut GridBlock) -> Result<usize>
{
    let id = registry
        .global_index(key)
        .ok_or_else(|| Error::IncompleteMetadata(format!("local block {:?} was not registered", key)))?;

    let input = hierarchy
        .get(&key)
        .ok_or_else(|| Error::IncompleteMetadata(format!("local block {:?} is missing", key)))?;

    let target_shift = registry.entry(id).shift();
    let records = connectivity.records_for(id);

    // Donors in fill priority order; local blocks, else received slabs.
    let mut donors = Vec::new();

    for record in records {
        let entry = registry.entry(record.source);
        let source = hierarchy
            .get(&entry.metadata.key)
            .or_else(|| slabs.get(&(record.source, record.target)));

        if let Some(source) = source {
            let ratio = ratio_for(registry, record)?;
            donors.push(Donor { record, source, shift: entry.shift(), ratio });
        }
    }

    let names: Vec<String> = block.fields().map(|(name, _)| name.clone()).collect();
    let mut unfilled = 0;

    for name in names {
        let centering = match block.field(&name) {
            Some(f) => f.centering(),
            None => continue,
        };
        let space_in = input.space(centering);
        let space_out = block.space(centering);

        let field = match block.field_mut(&name) {
            Some(f) => f,
            None => continue,
        };

        for index in space_out.iter().filter(|i| !space_in.contains(*i)) {
            let global = add(index, target_shift);
            let supplied = donors
                .iter()
                .find_map(|donor| donor.sample(&name, centering, index, global));

            match supplied {
                Some(values) => field.tuple_mut(space_out.row_major_offset(index)).copy_from_slice(values),
                None => unfilled += 1,
            }
        }
    }
    Ok(unfilled)
}




struct Donor<'a> {
    record: &'a ConnectivityRecord,
    source: &'a GridBlock,
    shift: Index,
    ratio: Index,
}




// ============================================================================
impl<'a> Donor<'a> {

    /**
     * Return the donor's value for a target entry, given by its index in the
     * target block and in the global index space of the target's level.
     */
    fn sample(&self, name: &str, centering: Centering, index: Index, global: Index) -> Option<&'a [f64]> {
        let region = match centering {
            Centering::Cell => self.record.region.clone(),
            Centering::Point => self.record.region.points(),
        };
        if !region.contains(index) {
            return None;
        }
        let source_global = map_index(
            global,
            self.record.source_level,
            self.record.target_level,
            self.ratio,
            centering);

        let local = sub(source_global, self.shift);
        let interior: IndexSpace = self.source.interior_space(centering);

        if interior.contains(local) {
            self.source.get_slice(name, local)
        } else {
            None
        }
    }
}




/**
 * Map a global index at the target level onto the nearest enclosing entry at
 * the source level. Coarse cells are found by floor division and fine cells
 * by the one enclosing the centre of the target cell; fine points are the
 * coincident ones and coarse points the nearest.
 */
fn map_index(global: Index, source_level: u32, target_level: u32, r: Index, centering: Centering) -> Index {
    if source_level < target_level {
        match centering {
            Centering::Cell => [0, 1, 2].map(|n| global[n].div_euclid(r[n])),
            Centering::Point => [0, 1, 2].map(|n| (global[n] + r[n] / 2).div_euclid(r[n])),
        }
    } else if source_level > target_level {
        match centering {
            Centering::Cell => [0, 1, 2].map(|n| global[n] * r[n] + r[n] / 2),
            Centering::Point => [0, 1, 2].map(|n| global[n] * r[n]),
        }
    } else {
        global
    }
}

fn add(a: Index, b: Index) -> Index {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn sub(a: Index, b: Index) -> Index {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}




/**
 * Ghost generation for a hierarchy held entirely by one worker.
 */
pub fn generate_serial(hierarchy: &Hierarchy, depth: usize) -> Result<Hierarchy> {
    generate(hierarchy, depth, &crate::message::local::SerialCommunicator)
}




/**
 * Return the number of entries of every field of a ghosted block which are
 * still at the sentinel, keyed by field name.
 */
pub fn count_unfilled(block: &GridBlock) -> BTreeMap<String, usize> {
    block
        .fields()
        .map(|(name, field)| {
            let n = field.as_slice().iter().filter(|&&x| x == crate::field::SENTINEL).count();
            (name.clone(), n / field.num_components().max(1))
        })
        .collect()
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::field::SENTINEL;
    use crate::index_space::range3d;
    use crate::message::local::SerialCommunicator;
    use crate::metadata::LevelInfo;

    fn cube(origin: [f64; 3], seed: f64) -> GridBlock {
        GridBlock::new(0, origin, [1.0; 3], range3d(0..3, 0..3, 0..3))
            .with_field_function("u", Centering::Cell, 1, move |[i, j, k], s| {
                s[0] = seed + (9 * i + 3 * j + k) as f64
            })
    }

    fn face_pair() -> Hierarchy {
        let mut h = Hierarchy::new(vec![LevelInfo {
            whole_extent: Some(range3d(0..6, 0..3, 0..3)),
            num_blocks: 2,
        }]);
        h.insert(BlockKey::new(0, 0), cube([0.0; 3], 0.0)).unwrap();
        h.insert(BlockKey::new(0, 1), cube([3.0, 0.0, 0.0], 100.0)).unwrap();
        h
    }

    #[test]
    fn face_neighbors_exchange_one_layer() {
        let output = generate_serial(&face_pair(), 1).unwrap();
        let a = output.get(&BlockKey::new(0, 0)).unwrap();
        let b = output.get(&BlockKey::new(0, 1)).unwrap();

        assert_eq!(a.extent(), &range3d(0..4, 0..3, 0..3));
        assert_eq!(b.extent(), &range3d(-1..3, 0..3, 0..3));
        assert_eq!(a.ghost_layers(), [[0, 1], [0, 0], [0, 0]]);

        for j in 0..3 {
            for k in 0..3 {
                let from_b = 100.0 + (3 * j + k) as f64;
                let from_a = (18 + 3 * j + k) as f64;
                assert_eq!(a.get_slice("u", [3, j, k]), Some(&[from_b][..]));
                assert_eq!(b.get_slice("u", [-1, j, k]), Some(&[from_a][..]));
            }
        }
        assert_eq!(count_unfilled(a)["u"], 0);
    }

    fn registry_with_holders(holders: [Vec<usize>; 2]) -> BlockRegistry {
        let h = face_pair();
        let mut entries = h.local_metadata(0);

        for (entry, holders) in entries.iter_mut().zip(holders) {
            entry.holders = holders;
        }
        BlockRegistry::new(GlobalMetadata::from_entries(h.levels().to_vec(), entries).unwrap()).unwrap()
    }

    #[test]
    fn only_blocks_missing_on_the_target_worker_are_routed() {
        let pairs = |registry: &BlockRegistry| -> Vec<(usize, usize, BlockId)> {
            let connectivity = Connectivity::compute(registry, 1).unwrap();
            routes(registry, &connectivity).into_iter().map(|(f, t, r)| (f, t, r.source)).collect()
        };
        assert_eq!(pairs(&registry_with_holders([vec![0], vec![1]])), vec![(1, 0, 1), (0, 1, 0)]);
        assert_eq!(pairs(&registry_with_holders([vec![0, 1], vec![1]])), vec![(1, 0, 1)]);
        assert!(pairs(&registry_with_holders([vec![0], vec![]])).is_empty());
    }

    #[test]
    fn slab_holds_the_source_cells_a_record_reads() {
        let h = face_pair();
        let registry = BlockRegistry::new(GlobalMetadata::gather(&h, &SerialCommunicator).unwrap()).unwrap();
        let connectivity = Connectivity::compute(&registry, 1).unwrap();
        let record = &connectivity.records_for(0)[0];
        assert_eq!(record.source, 1);

        let extent = slab_extent(&registry, record).unwrap().unwrap();
        assert_eq!(extent, range3d(0..1, 0..3, 0..3));

        let source = h.get(&BlockKey::new(0, 1)).unwrap();
        let slab = extract(source, extent);
        assert_eq!(slab.field("u").unwrap().len(), 9);
        assert_eq!(slab.get_slice("u", [0, 2, 1]), source.get_slice("u", [0, 2, 1]));
    }

    #[test]
    fn interior_values_are_preserved() {
        let input = face_pair();
        let output = generate_serial(&input, 2).unwrap();

        for (key, block) in input.iter() {
            let ghosted = output.get(key).unwrap();
            for index in block.extent().iter() {
                assert_eq!(ghosted.get_slice("u", index), block.get_slice("u", index));
            }
        }
    }

    #[test]
    fn cells_without_a_neighbor_stay_at_sentinel() {
        let mut h = Hierarchy::new(vec![LevelInfo {
            whole_extent: Some(range3d(0..8, 0..3, 0..3)),
            num_blocks: 2,
        }]);
        h.insert(BlockKey::new(0, 0), cube([0.0; 3], 0.0)).unwrap();
        h.insert(BlockKey::new(0, 1), cube([5.0, 0.0, 0.0], 100.0)).unwrap();

        let output = generate_serial(&h, 1).unwrap();
        let a = output.get(&BlockKey::new(0, 0)).unwrap();
        assert_eq!(a.extent(), &range3d(0..4, 0..3, 0..3));
        assert_eq!(a.get_slice("u", [3, 1, 1]), Some(&[SENTINEL][..]));
        assert_eq!(count_unfilled(a)["u"], 9);
    }

    #[test]
    fn zero_depth_is_the_identity() {
        let once = generate_serial(&face_pair(), 1).unwrap();
        let twice = generate_serial(&once, 0).unwrap();
        assert_eq!(once, twice);
        assert_eq!(generate_serial(&face_pair(), 0).unwrap(), face_pair());
    }

    #[test]
    fn coarse_cells_fill_fine_ghosts() {
        let coarse = GridBlock::new(0, [0.0; 3], [1.0; 3], range3d(0..4, 0..4, 0..4))
            .with_field_function("u", Centering::Cell, 1, |[i, _, _], s| s[0] = i as f64);
        let fine = GridBlock::new(1, [1.0; 3], [0.5; 3], range3d(0..4, 0..4, 0..4))
            .with_field_function("u", Centering::Cell, 1, |_, s| s[0] = -1.0);

        let mut h = Hierarchy::new(vec![
            LevelInfo { whole_extent: Some(range3d(0..4, 0..4, 0..4)), num_blocks: 1 },
            LevelInfo { whole_extent: Some(range3d(0..8, 0..8, 0..8)), num_blocks: 1 },
        ]);
        h.insert(BlockKey::new(0, 0), coarse).unwrap();
        h.insert(BlockKey::new(1, 0), fine).unwrap();

        let output = generate_serial(&h, 1).unwrap();
        let fine = output.get(&BlockKey::new(1, 0)).unwrap();
        let coarse = output.get(&BlockKey::new(0, 0)).unwrap();

        assert_eq!(fine.extent(), &range3d(-1..5, -1..5, -1..5));
        assert_eq!(fine.get_slice("u", [-1, 0, 0]), Some(&[0.0][..]));
        assert_eq!(fine.get_slice("u", [4, 0, 0]), Some(&[3.0][..]));
        assert_eq!(fine.get_slice("u", [0, 0, 0]), Some(&[-1.0][..]));
        assert_eq!(coarse.extent(), &range3d(0..4, 0..4, 0..4));
        assert_eq!(count_unfilled(fine)["u"], 0);
    }

    #[test]
    fn missing_whole_extent_is_an_error() {
        let mut h = Hierarchy::new(vec![LevelInfo { whole_extent: None, num_blocks: 1 }]);
        h.insert(BlockKey::new(0, 0), cube([0.0; 3], 0.0)).unwrap();
        assert_eq!(generate_serial(&h, 1), Err(Error::MissingWholeExtent { level: 0 }));
    }

    #[test]
    fn degenerate_spacing_is_an_error() {
        let mut h = Hierarchy::new(vec![LevelInfo {
            whole_extent: Some(range3d(0..3, 0..3, 0..3)),
            num_blocks: 1,
        }]);
        h.insert(BlockKey::new(0, 0), GridBlock::new(0, [0.0; 3], [1.0, 0.0, 1.0], range3d(0..3, 0..3, 0..3))).unwrap();
        assert!(matches!(generate_serial(&h, 1), Err(Error::NonUniformGrid { .. })));
    }

    #[test]
    fn blocks_must_carry_the_same_fields() {
        let mut h = face_pair();
        h.insert(BlockKey::new(0, 1), GridBlock::new(0, [3.0, 0.0, 0.0], [1.0; 3], range3d(0..3, 0..3, 0..3))).unwrap();
        assert!(matches!(generate_serial(&h, 1), Err(Error::FieldMismatch { .. })));
    }

    #[test]
    fn point_fields_are_ghosted() {
        let block = |origin: [f64; 3]| {
            GridBlock::new(0, origin, [1.0; 3], range3d(0..2, 0..2, 0..2))
                .with_field_function("x", Centering::Point, 1, move |[i, _, _], s| s[0] = origin[0] + i as f64)
        };
        let mut h = Hierarchy::new(vec![LevelInfo {
            whole_extent: Some(range3d(0..4, 0..2, 0..2)),
            num_blocks: 2,
        }]);
        h.insert(BlockKey::new(0, 0), block([0.0; 3])).unwrap();
        h.insert(BlockKey::new(0, 1), block([2.0, 0.0, 0.0])).unwrap();

        let output = generate_serial(&h, 1).unwrap();
        let a = output.get(&BlockKey::new(0, 0)).unwrap();
        assert_eq!(a.get_slice("x", [3, 1, 1]), Some(&[3.0][..]));
        assert_eq!(count_unfilled(a)["x"], 0);
    }
}
