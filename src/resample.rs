//! Resampling of an AMR hierarchy onto a uniform grid. The target box is
//! split into slabs ("subdivisions") which are distributed block-cyclically
//! over the workers; each worker fills the slabs it owns, preferring the
//! finest donor at every target location. Donor blocks a worker needs but
//! does not hold are sent to it by their owners first, so the output does
//! not depend on the number of workers.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::block::{Bounds, GridBlock, PointLocator};
use crate::config::{Config, TransferMode};
use crate::error::{Error, Result};
use crate::field::{Centering, Field, SENTINEL};
use crate::index_space::{Axis, Index, IndexSpace};
use crate::message::comm::Communicator;
use crate::message::local::SerialCommunicator;
use crate::metadata::{BlockKey, GlobalMetadata, Hierarchy};
use crate::region::{blocks_to_load, is_mine};
use crate::registry::{BlockId, BlockRegistry};

/// Message tag of donor block exchanges.
///
const DONOR_TAG: u64 = 0x11;

/// The block and interior cell supplying a target value.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Donor {
    pub block: BlockId,
    pub cell: Index,
}

/// A block which may donate values, with its global id.
///
#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a> {
    pub id: BlockId,
    pub block: &'a GridBlock,
}

impl<'a> Candidate<'a> {
    fn rank(&self) -> (Reverse<u32>, BlockId) {
        (Reverse(self.block.level()), self.id)
    }
}

/// How many target entries were written, out of how many there are. Missing
/// coverage is reported here rather than as an error.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub targets: usize,
    pub found: usize,
}

impl Coverage {
    pub fn fraction(&self) -> f64 {
        if self.targets == 0 {
            1.0
        } else {
            self.found as f64 / self.targets as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.found == self.targets
    }
}

impl std::ops::Add for Coverage {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            targets: self.targets + other.targets,
            found: self.found + other.found,
        }
    }
}

/// The resampled grids produced by one worker, keyed by subdivision index,
/// and the coverage summed over them.
///
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResampledOutput {
    pub grids: BTreeMap<usize, GridBlock>,
    pub coverage: Coverage,
}

/// Return the cell spacing of the given level, or `NoReferenceGrid` if no
/// block exists there.
///
pub fn reference_spacing(registry: &BlockRegistry, level: u32) -> Result<[f64; 3]> {
    registry
        .geometry()
        .spacing(level)
        .ok_or(Error::NoReferenceGrid { level })
}

/// Return the number of target cells along each axis of the box `[min,
/// max]`, at spacing `h`.
///
pub fn target_cells(min: [f64; 3], max: [f64; 3], h: [f64; 3]) -> Index {
    [0, 1, 2].map(|n| (((max[n] - min[n]) / h[n]).round() as i64).max(1))
}

/// Return the axis along which the box is split into subdivisions: the one
/// with the most cells, the lowest such axis on a tie.
///
pub fn split_axis(cells: Index) -> Axis {
    let mut best = 0;

    for n in 1..3 {
        if cells[n] > cells[best] {
            best = n;
        }
    }
    Axis::from_index(best)
}

/// Build the geometry of one subdivision of the uniform target grid covering
/// `[min, max]` at the resolution of `level`. The returned block has no
/// fields; its origin is `min`, so cell indexes count from the lower corner
/// of the whole target box.
///
pub fn build_target_grid(
    registry: &BlockRegistry,
    min: [f64; 3],
    max: [f64; 3],
    level: u32,
    subdivisions: usize,
    subdivision: usize,
) -> Result<GridBlock> {
    if subdivisions == 0 || subdivision >= subdivisions {
        return Err(Error::InvalidConfiguration(format!(
            "subdivision {} of {} does not exist",
            subdivision, subdivisions
        )));
    }
    let h = reference_spacing(registry, level)?;
    let cells = target_cells(min, max, h);

    let spacing = [0, 1, 2].map(|n| {
        if max[n] > min[n] {
            (max[n] - min[n]) / cells[n] as f64
        } else {
            h[n]
        }
    });

    let axis = split_axis(cells);
    let a = axis.index();
    let (s, m) = (subdivision as i64, subdivisions as i64);

    let mut start = [0; 3];
    let mut end = cells;
    start[a] = s * cells[a] / m;
    end[a] = (s + 1) * cells[a] / m;

    Ok(GridBlock::new(level, min, spacing, IndexSpace::from_corners(start, end)))
}

/// Find the donor for a point: among the candidates whose interior contains
/// the point, the one on the finest level, then with the lowest id.
///
pub fn find_donor(point: [f64; 3], candidates: &[Candidate]) -> Option<Donor> {
    candidates
        .iter()
        .filter(|c| c.block.contains(point))
        .min_by_key(|c| c.rank())
        .and_then(|c| {
            c.block.cell_index_of(point).map(|cell| Donor { block: c.id, cell })
        })
}

/// Like `find_donor`, but the upper faces of each candidate's interior are
/// included. Used for target nodes, which may lie on the upper boundary of
/// the hierarchy.
///
fn find_node_donor<'a>(point: [f64; 3], candidates: &[Candidate<'a>]) -> Option<Candidate<'a>> {
    candidates
        .iter()
        .filter(|c| {
            let b = c.block.bounds();
            (0..3).all(|n| point[n] >= b.min[n] && point[n] <= b.max[n])
        })
        .min_by_key(|c| c.rank())
        .copied()
}

/// Return the names and component counts of the cell-centered fields
/// carried by any of the candidates.
///
fn donor_fields(candidates: &[Candidate]) -> BTreeMap<String, usize> {
    let mut fields = BTreeMap::new();

    for candidate in candidates {
        for (name, field) in candidate.block.fields() {
            if field.centering() == Centering::Cell {
                fields.entry(name.clone()).or_insert_with(|| field.num_components());
            }
        }
    }
    fields
}

fn allocate_target(target: &mut GridBlock, fields: &BTreeMap<String, usize>, centering: Centering) -> Result<()> {
    let len = target.space(centering).len();

    for (name, &num_components) in fields {
        target.insert_field(name, Field::filled(centering, num_components, len, SENTINEL))?;
    }
    Ok(())
}

/// Copy, for every cell of the target, the values of the donor cell
/// containing the cell centre. Cells with no donor keep the sentinel.
///
pub fn transfer_to_cell_centers(target: &mut GridBlock, candidates: &[Candidate]) -> Result<Coverage> {
    transfer_cells(target, candidates, &donor_fields(candidates))
}

fn transfer_cells(target: &mut GridBlock, candidates: &[Candidate], fields: &BTreeMap<String, usize>) -> Result<Coverage> {
    allocate_target(target, fields, Centering::Cell)?;

    let space = target.extent().clone();
    let mut coverage = Coverage { targets: space.len(), found: 0 };
    let by_id: BTreeMap<_, _> = candidates.iter().map(|c| (c.id, c.block)).collect();

    for (offset, index) in space.iter().enumerate() {
        let donor = match find_donor(target.cell_center(index), candidates) {
            Some(donor) => donor,
            None => continue,
        };
        let source = by_id[&donor.block];

        for name in fields.keys() {
            if let (Some(values), Some(field)) = (source.get_slice(name, donor.cell), target.field_mut(name)) {
                if values.len() == field.num_components() {
                    field.tuple_mut(offset).copy_from_slice(values);
                }
            }
        }
        coverage.found += 1;
    }
    Ok(coverage)
}

/// Return the interior cells of a block whose centres lie within half a cell
/// of the given point along every axis.
///
fn cells_around(block: &GridBlock, point: [f64; 3]) -> Vec<Index> {
    const EPS: f64 = 1e-9;
    let interior = block.interior();
    let o = block.origin();
    let h = block.spacing();

    let ranges: Vec<_> = (0..3)
        .map(|n| {
            let x = (point[n] - o[n]) / h[n] - 0.5;
            let lo = ((x - 0.5 - EPS).ceil() as i64).max(interior.start()[n]);
            let hi = ((x + 0.5 + EPS).floor() as i64 + 1).min(interior.end()[n]);
            lo..hi.max(lo)
        })
        .collect();

    IndexSpace::new(ranges[0].clone(), ranges[1].clone(), ranges[2].clone())
        .iter()
        .collect()
}

/// Write, for every node of the target, the average of the donor cells
/// adjacent to the node. The donor block is chosen as for cell centres,
/// except that nodes on the upper faces of a block's interior count as
/// inside it.
///
pub fn transfer_to_nodes(target: &mut GridBlock, candidates: &[Candidate]) -> Result<Coverage> {
    transfer_nodes(target, candidates, &donor_fields(candidates))
}

fn transfer_nodes(target: &mut GridBlock, candidates: &[Candidate], fields: &BTreeMap<String, usize>) -> Result<Coverage> {
    allocate_target(target, fields, Centering::Point)?;

    let space = target.extent().points();
    let mut coverage = Coverage { targets: space.len(), found: 0 };

    for (offset, index) in space.iter().enumerate() {
        let point = target.point_position(index);
        let donor = match find_node_donor(point, candidates) {
            Some(donor) => donor,
            None => continue,
        };
        let cells = cells_around(donor.block, point);

        if cells.is_empty() {
            continue;
        }
        for (name, &num_components) in fields {
            let mut sum = vec![0.0; num_components];
            let mut count = 0;

            for &cell in &cells {
                if let Some(values) = donor.block.get_slice(name, cell) {
                    if values.len() == num_components {
                        for (s, v) in sum.iter_mut().zip(values) {
                            *s += v;
                        }
                        count += 1;
                    }
                }
            }
            if count > 0 {
                if let Some(field) = target.field_mut(name) {
                    for (t, s) in field.tuple_mut(offset).iter_mut().zip(&sum) {
                        *t = s / count as f64;
                    }
                }
            }
        }
        coverage.found += 1;
    }
    Ok(coverage)
}

/// Resamples the part of a hierarchy held by a worker onto the target
/// subdivisions that worker owns.
///
#[derive(Clone, Debug)]
pub struct Resampler {
    config: Config,
}

impl Resampler {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Return the real-space bounds of every subdivision owned by `rank`.
    ///
    pub fn owned_regions(&self, registry: &BlockRegistry, rank: usize, workers: usize) -> Result<Vec<(usize, Bounds)>> {
        let c = &self.config;

        (0..c.number_of_subdivisions)
            .filter(|&s| is_mine(s, rank, workers))
            .map(|s| {
                let grid = build_target_grid(registry, c.region_min, c.region_max, c.level_of_resolution, c.number_of_subdivisions, s)?;
                Ok((s, grid.bounds()))
            })
            .collect()
    }

    /// Return the keys of the blocks a reader should load on `rank` for
    /// demand-driven resampling: the blocks intersecting any subdivision the
    /// rank owns, up to the level of resolution.
    ///
    pub fn blocks_to_load(&self, registry: &BlockRegistry, rank: usize, workers: usize) -> Result<Vec<BlockKey>> {
        let regions: Vec<_> = self
            .owned_regions(registry, rank, workers)?
            .into_iter()
            .map(|(_, bounds)| bounds)
            .collect();
        Ok(blocks_to_load(registry, &regions, self.config.level_of_resolution))
    }

    /// Return the keys of the blocks `rank` should load, planned from the
    /// declared metadata of the hierarchy alone: the demand-driven load set
    /// if the configuration asks for it, else the block-cyclic share of
    /// `rank`.
    ///
    pub fn load_plan(&self, hierarchy: &Hierarchy, rank: usize, workers: usize) -> Result<Vec<BlockKey>> {
        let registry = BlockRegistry::new(GlobalMetadata::declared(hierarchy)?)?;

        if self.config.demand_driven {
            self.blocks_to_load(&registry, rank, workers)
        } else {
            Ok(registry
                .entries()
                .iter()
                .filter(|e| is_mine(e.id, rank, workers))
                .map(|e| e.metadata.key)
                .collect())
        }
    }

    /// Return the hierarchy `rank` works on when reading from `reader`: every
    /// block is declared, and the blocks of the load plan are loaded.
    ///
    pub fn load(&self, reader: &Hierarchy, rank: usize, workers: usize) -> Result<Hierarchy> {
        let mut local = reader.empty_like();
        local.declare_all(reader)?;

        for key in self.load_plan(reader, rank, workers)? {
            if let Some(block) = reader.get(&key) {
                local.insert(key, block.clone())?;
            }
        }
        debug!("rank {}: loaded {} blocks", rank, local.len());
        Ok(local)
    }

    /// Resample onto the subdivisions owned by the calling worker. This is a
    /// collective operation: the block metadata of every worker is gathered
    /// to assign global ids and the reference spacing, then donor blocks are
    /// exchanged so that each worker holds every block its subdivisions
    /// need.
    ///
    pub fn resample<C: Communicator>(&self, hierarchy: &Hierarchy, comm: &C) -> Result<ResampledOutput> {
        let registry = BlockRegistry::new(GlobalMetadata::gather(hierarchy, comm)?)?;
        reference_spacing(&registry, self.config.level_of_resolution)?;

        let received = self.fetch_donors(hierarchy, &registry, comm)?;
        let owned: Vec<_> = (0..self.config.number_of_subdivisions)
            .filter(|&s| is_mine(s, comm.rank(), comm.size()))
            .collect();
        self.resample_subdivisions(hierarchy, &received, &registry, comm.rank(), comm.size(), &owned)
    }

    /// Resample a hierarchy held entirely by this process onto every
    /// subdivision of the target grid.
    ///
    pub fn resample_all(&self, hierarchy: &Hierarchy) -> Result<ResampledOutput> {
        let registry = BlockRegistry::new(GlobalMetadata::gather(hierarchy, &SerialCommunicator)?)?;
        let all: Vec<_> = (0..self.config.number_of_subdivisions).collect();
        self.resample_subdivisions(hierarchy, &BTreeMap::new(), &registry, 0, 1, &all)
    }

    /// Send every worker the blocks its subdivisions need which it does not
    /// hold, and receive the ones this worker needs. Each block is sent by
    /// its owner. Blocks no worker holds are skipped.
    ///
    fn fetch_donors<C: Communicator>(
        &self,
        hierarchy: &Hierarchy,
        registry: &BlockRegistry,
        comm: &C,
    ) -> Result<BTreeMap<BlockKey, GridBlock>> {
        let (rank, workers) = (comm.rank(), comm.size());
        let mut outgoing: BTreeMap<usize, Vec<(BlockKey, GridBlock)>> = BTreeMap::new();
        let mut sources = BTreeSet::new();
        let mut missing = 0;

        for q in 0..workers {
            for key in self.blocks_to_load(registry, q, workers)? {
                let id = registry
                    .global_index(key)
                    .ok_or_else(|| Error::IncompleteMetadata(format!("block {:?} was not registered", key)))?;
                let metadata = &registry.entry(id).metadata;

                if metadata.holders.contains(&q) {
                    continue;
                }
                match metadata.owner() {
                    Some(owner) if owner == rank => {
                        let block = hierarchy
                            .get(&key)
                            .ok_or_else(|| Error::IncompleteMetadata(format!("owned block {:?} is not loaded", key)))?;
                        outgoing.entry(q).or_default().push((key, block.clone()));
                    }
                    Some(owner) if q == rank => {
                        sources.insert(owner);
                    }
                    None if q == rank => missing += 1,
                    _ => {}
                }
            }
        }
        if missing > 0 {
            warn!("rank {}: {} donor blocks are not loaded by any worker", rank, missing);
        }

        let outgoing: BTreeMap<usize, Vec<u8>> = outgoing
            .into_iter()
            .map(|(to, blocks)| {
                let bytes = rmp_serde::to_vec(&blocks)
                    .map_err(|e| Error::Communication(format!("encoding donor blocks: {}", e)))?;
                Ok((to, bytes))
            })
            .collect::<Result<_>>()?;

        let mut received = BTreeMap::new();

        for (from, bytes) in comm.exchange(DONOR_TAG, outgoing, &sources)? {
            let blocks: Vec<(BlockKey, GridBlock)> = rmp_serde::from_slice(&bytes)
                .map_err(|e| Error::Communication(format!("decoding donor blocks from rank {}: {}", from, e)))?;
            received.extend(blocks);
        }
        debug!("rank {}: received {} donor blocks from {} ranks", rank, received.len(), sources.len());
        Ok(received)
    }

    fn candidates<'a>(
        &self,
        hierarchy: &'a Hierarchy,
        received: &'a BTreeMap<BlockKey, GridBlock>,
        registry: &BlockRegistry,
        rank: usize,
        workers: usize,
    ) -> Result<Vec<Candidate<'a>>> {
        let mut candidates = Vec::new();

        for key in self.blocks_to_load(registry, rank, workers)? {
            let block = hierarchy.get(&key).or_else(|| received.get(&key));

            if let (Some(block), Some(id)) = (block, registry.global_index(key)) {
                candidates.push(Candidate { id, block });
            }
        }
        debug!("rank {}: {} donor blocks", rank, candidates.len());
        Ok(candidates)
    }

    fn resample_subdivisions(
        &self,
        hierarchy: &Hierarchy,
        received: &BTreeMap<BlockKey, GridBlock>,
        registry: &BlockRegistry,
        rank: usize,
        workers: usize,
        subdivisions: &[usize],
    ) -> Result<ResampledOutput> {
        let c = &self.config;
        reference_spacing(registry, c.level_of_resolution)?;

        let candidates = self.candidates(hierarchy, received, registry, rank, workers)?;
        let fields = registered_cell_fields(registry, c.level_of_resolution);

        let grids: Vec<(usize, GridBlock, Coverage)> = subdivisions
            .par_iter()
            .map(|&s| {
                let mut grid = build_target_grid(
                    registry,
                    c.region_min,
                    c.region_max,
                    c.level_of_resolution,
                    c.number_of_subdivisions,
                    s,
                )?;
                let coverage = match c.transfer_mode {
                    TransferMode::CellCenters => transfer_cells(&mut grid, &candidates, &fields)?,
                    TransferMode::Nodes => transfer_nodes(&mut grid, &candidates, &fields)?,
                };
                Ok((s, grid, coverage))
            })
            .collect::<Result<_>>()?;

        let mut output = ResampledOutput::default();

        for (s, grid, coverage) in grids {
            output.coverage = output.coverage + coverage;
            output.grids.insert(s, grid);
        }

        info!(
            "rank {}: resampled {} subdivisions, {} of {} targets covered ({:.1}%)",
            rank,
            output.grids.len(),
            output.coverage.found,
            output.coverage.targets,
            100.0 * output.coverage.fraction()
        );
        Ok(output)
    }
}

/// Return the cell-centered fields of the loaded blocks up to the given
/// level, as recorded in the registry. Every output grid carries these, even
/// where no block is a donor.
///
fn registered_cell_fields(registry: &BlockRegistry, level: u32) -> BTreeMap<String, usize> {
    let mut fields = BTreeMap::new();

    for entry in registry.entries().iter().filter(|e| e.level() <= level) {
        for (name, &(centering, num_components)) in &entry.metadata.fields {
            if centering == Centering::Cell {
                fields.entry(name.clone()).or_insert(num_components);
            }
        }
    }
    fields
}
