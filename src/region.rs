use log::debug;

use crate::block::Bounds;
use crate::error::{Error, Result};
use crate::metadata::BlockKey;
use crate::registry::{BlockId, BlockRegistry};

/// Return the worker which owns the block (or target subdivision) with the
/// given id, under a block-cyclic distribution.
///
pub fn owner_of(id: usize, workers: usize) -> usize {
    id % workers.max(1)
}

/// Return true if the given rank owns the block or subdivision `id`.
///
pub fn is_mine(id: usize, rank: usize, workers: usize) -> bool {
    owner_of(id, workers) == rank
}

/// Closed-interval bounds overlap; boxes touching at a face, edge or corner
/// intersect.
///
pub fn grids_intersect(a: &Bounds, b: &Bounds) -> bool {
    a.intersects(b)
}

/// Return the ascending ids of the blocks at levels `0..=level_of_resolution`
/// whose interior bounds intersect the closed box `[min, max]`.
///
pub fn select_blocks(registry: &BlockRegistry, min: [f64; 3], max: [f64; 3], level_of_resolution: u32) -> Vec<BlockId> {
    let region = Bounds::new(min, max);

    let selected: Vec<_> = registry
        .entries()
        .iter()
        .filter(|e| e.level() <= level_of_resolution)
        .filter(|e| grids_intersect(&e.bounds, &region))
        .map(|e| e.id)
        .collect();

    debug!("{} of {} blocks intersect {:?}..{:?}", selected.len(), registry.len(), min, max);
    selected
}

/// Return the keys of the blocks a worker needs to load in order to serve
/// the given target regions: the union of the blocks selected for each
/// region, in ascending id order.
///
pub fn blocks_to_load(registry: &BlockRegistry, regions: &[Bounds], level_of_resolution: u32) -> Vec<BlockKey> {
    let mut ids: Vec<_> = regions
        .iter()
        .flat_map(|r| select_blocks(registry, r.min, r.max, level_of_resolution))
        .collect();

    ids.sort_unstable();
    ids.dedup();
    ids.into_iter().map(|id| registry.entry(id).metadata.key).collect()
}

/// A region of interest and the finest level of the hierarchy to consider
/// within it.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionSelector {
    bounds: Bounds,
    level_of_resolution: u32,
}

impl RegionSelector {
    pub fn new(min: [f64; 3], max: [f64; 3], level_of_resolution: u32) -> Result<Self> {
        if (0..3).any(|n| !(min[n].is_finite() && max[n].is_finite() && min[n] <= max[n])) {
            return Err(Error::InvalidConfiguration(format!(
                "region of interest {:?}..{:?} is not a valid box",
                min, max
            )));
        }
        Ok(Self {
            bounds: Bounds::new(min, max),
            level_of_resolution,
        })
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn level_of_resolution(&self) -> u32 {
        self.level_of_resolution
    }

    pub fn select(&self, registry: &BlockRegistry) -> Vec<BlockId> {
        select_blocks(registry, self.bounds.min, self.bounds.max, self.level_of_resolution)
    }

    /// Return the selected blocks owned by the given rank.
    ///
    pub fn select_owned(&self, registry: &BlockRegistry, rank: usize, workers: usize) -> Vec<BlockId> {
        self.select(registry)
            .into_iter()
            .filter(|&id| is_mine(id, rank, workers))
            .collect()
    }
}
