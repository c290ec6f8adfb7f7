use std::collections::BTreeMap;

use log::{debug, info};

use crate::block::Bounds;
use crate::error::{Error, Result};
use crate::index_space::{Index, IndexSpace};
use crate::metadata::{BlockKey, BlockMetadata, GlobalMetadata, LevelInfo};

/// Global linear index of a block. Ids are assigned level-major, then in the
/// enumeration order within a level.
///
pub type BlockId = usize;

const SPACING_TOLERANCE: f64 = 1e-9;
const RATIO_TOLERANCE: f64 = 1e-6;

/// The reference grid of a hierarchy: a single origin shared by all levels,
/// and the cell spacing of each level that holds blocks.
///
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalGeometry {
    pub origin: [f64; 3],
    spacing: BTreeMap<u32, [f64; 3]>,
}

impl GlobalGeometry {
    pub fn spacing(&self, level: u32) -> Option<[f64; 3]> {
        self.spacing.get(&level).copied()
    }

    /// Return the levels which hold at least one block, coarsest first.
    ///
    pub fn levels(&self) -> impl Iterator<Item = u32> + '_ {
        self.spacing.keys().copied()
    }
}

/// A registered block: its metadata, global id, interior extent in the
/// global index space of its level, and real-space bounds.
///
#[derive(Clone, Debug, PartialEq)]
pub struct BlockEntry {
    pub id: BlockId,
    pub metadata: BlockMetadata,
    pub global_extent: IndexSpace,
    pub bounds: Bounds,
}

impl BlockEntry {
    pub fn level(&self) -> u32 {
        self.metadata.key.level
    }

    /// Return the offset which maps this block's own indexes onto the global
    /// index space of its level.
    ///
    pub fn shift(&self) -> Index {
        let s0 = self.global_extent.start();
        let s1 = self.metadata.extent.start();
        [s0[0] - s1[0], s0[1] - s1[1], s0[2] - s1[2]]
    }
}

/// Global geometry and stable ids for every block of one hierarchy. A
/// registry is built for a single ghosting or resampling invocation, from
/// metadata gathered across all workers, and passed by reference to the
/// phases that need it.
///
#[derive(Clone, Debug)]
pub struct BlockRegistry {
    geometry: GlobalGeometry,
    levels: Vec<LevelInfo>,
    level_offsets: Vec<usize>,
    entries: Vec<BlockEntry>,
}

impl BlockRegistry {
    /// Compute the global origin and the spacing of every level. The origin
    /// is the per-axis minimum of the block lower corners over all levels.
    /// Fails if two blocks of one level disagree on the spacing.
    ///
    pub fn compute_global_geometry(metadata: &GlobalMetadata) -> Result<GlobalGeometry> {
        let mut origin = [f64::INFINITY; 3];
        let mut reference = None;
        let mut spacing: BTreeMap<u32, ([f64; 3], usize)> = BTreeMap::new();

        for (id, entry) in metadata.entries().iter().enumerate() {
            let lower = entry.bounds().min;

            if lower[0] < origin[0] {
                reference = Some(id);
            }
            for n in 0..3 {
                origin[n] = origin[n].min(lower[n]);
            }

            let level = entry.key.level;
            match spacing.get(&level) {
                None => {
                    spacing.insert(level, (entry.spacing, id));
                }
                Some(&(expected, _)) => {
                    let same = (0..3).all(|n| {
                        (entry.spacing[n] - expected[n]).abs() <= SPACING_TOLERANCE * expected[n].abs()
                    });
                    if !same {
                        return Err(Error::InconsistentSpacing {
                            level,
                            block: id,
                            expected,
                            found: entry.spacing,
                        });
                    }
                }
            }
        }

        if let Some(id) = reference {
            debug!("global origin {:?} (reference block {})", origin, id);
        } else {
            origin = [0.0; 3];
        }

        Ok(GlobalGeometry {
            origin,
            spacing: spacing.into_iter().map(|(level, (h, _))| (level, h)).collect(),
        })
    }

    /// Build the registry: compute the global geometry, assign ids and map
    /// every block into the global index space of its level. Fails if the
    /// interiors of two blocks on the same level overlap.
    ///
    pub fn new(metadata: GlobalMetadata) -> Result<Self> {
        let geometry = Self::compute_global_geometry(&metadata)?;
        let levels = metadata.levels().to_vec();

        let mut level_offsets = Vec::with_capacity(levels.len());
        let mut total = 0;

        for info in &levels {
            level_offsets.push(total);
            total += info.num_blocks;
        }

        let entries: Vec<_> = metadata
            .entries()
            .iter()
            .enumerate()
            .map(|(id, m)| {
                let shift: Index = [0, 1, 2].map(|n| {
                    ((m.origin[n] - geometry.origin[n]) / m.spacing[n]).round() as i64
                });
                BlockEntry {
                    id,
                    metadata: m.clone(),
                    global_extent: m.extent.translate(shift),
                    bounds: m.bounds(),
                }
            })
            .collect();

        let registry = Self {
            geometry,
            levels,
            level_offsets,
            entries,
        };
        registry.validate_siblings()?;

        info!(
            "registered {} blocks on {} levels",
            registry.entries.len(),
            registry.levels.len()
        );
        Ok(registry)
    }

    fn validate_siblings(&self) -> Result<()> {
        for level in 0..self.levels.len() as u32 {
            let siblings: Vec<_> = self.entries_at_level(level).collect();

            for (n, a) in siblings.iter().enumerate() {
                for b in &siblings[n + 1..] {
                    if a.global_extent.intersect(&b.global_extent).is_some() {
                        return Err(Error::OverlappingInterior { level, a: a.id, b: b.id });
                    }
                }
            }
        }
        Ok(())
    }

    /// Return the global id of the block at the given level and enumeration
    /// index.
    ///
    pub fn global_index(&self, key: BlockKey) -> Option<BlockId> {
        let offset = self.level_offsets.get(key.level as usize)?;

        if key.index < self.levels[key.level as usize].num_blocks {
            Some(offset + key.index)
        } else {
            None
        }
    }

    pub fn geometry(&self) -> &GlobalGeometry {
        &self.geometry
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, id: BlockId) -> &BlockEntry {
        &self.entries[id]
    }

    pub fn entries(&self) -> &[BlockEntry] {
        &self.entries
    }

    pub fn entries_at_level(&self, level: u32) -> impl Iterator<Item = &BlockEntry> {
        let range = match (self.level_offsets.get(level as usize), self.levels.get(level as usize)) {
            (Some(&offset), Some(info)) => offset..offset + info.num_blocks,
            _ => 0..0,
        };
        self.entries[range].iter()
    }

    /// Return the declared whole extent of a level, in cells of that level
    /// relative to the global origin.
    ///
    pub fn whole_extent(&self, level: u32) -> Result<&IndexSpace> {
        self.levels
            .get(level as usize)
            .and_then(|info| info.whole_extent.as_ref())
            .ok_or(Error::MissingWholeExtent { level })
    }

    /// Return the number of fine cells per coarse cell along each axis. The
    /// ratio must be a positive integer on every axis.
    ///
    pub fn refinement_ratio(&self, coarse_level: u32, fine_level: u32) -> Result<Index> {
        let coarse = self.geometry.spacing(coarse_level).ok_or(Error::NoReferenceGrid { level: coarse_level })?;
        let fine = self.geometry.spacing(fine_level).ok_or(Error::NoReferenceGrid { level: fine_level })?;
        refinement_ratio(coarse_level, coarse, fine_level, fine)
    }
}

/// Return the integer ratio between two spacings, or an error if the fine
/// spacing does not divide the coarse one.
///
pub fn refinement_ratio(coarse_level: u32, coarse: [f64; 3], fine_level: u32, fine: [f64; 3]) -> Result<Index> {
    let mut ratio = [1; 3];

    for n in 0..3 {
        let r = coarse[n] / fine[n];
        let rounded = r.round();

        if rounded < 1.0 || (r - rounded).abs() > RATIO_TOLERANCE * rounded {
            return Err(Error::RefinementRatio {
                coarse_level,
                fine_level,
                coarse,
                fine,
            });
        }
        ratio[n] = rounded as i64;
    }
    Ok(ratio)
}
