use std::collections::BTreeMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::block::{Bounds, GridBlock};
use crate::error::{Error, Result};
use crate::field::Centering;
use crate::index_space::IndexSpace;
use crate::message::comm::Communicator;
use crate::region::is_mine;




/**
 * Identifies a block by its refinement level and its position in the
 * enumeration of that level's blocks. Keys order level-major, which is the
 * order global block ids are assigned in.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockKey {
    pub level: u32,
    pub index: usize,
}




// ============================================================================
impl BlockKey {
    pub fn new(level: u32, index: usize) -> Self {
        Self { level, index }
    }
}




/**
 * What a hierarchy reader declares about one refinement level. The whole
 * extent is given in cells of this level, relative to the global origin of
 * the hierarchy.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub whole_extent: Option<IndexSpace>,
    pub num_blocks: usize,
}




/**
 * Geometry of a single block, small enough to be shared with every worker.
 * The extent is the block's interior cell extent in its own index space;
 * ghost layers already present on the block are recorded separately.
 *
 * `holders` lists, in ascending order, the ranks which have the block's data
 * loaded; it is empty for a block which is only declared. `fields` is the
 * field layout of the loaded data, and is empty when nothing is loaded.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub key: BlockKey,
    pub origin: [f64; 3],
    pub spacing: [f64; 3],
    pub extent: IndexSpace,
    pub ghost_layers: [[i64; 2]; 3],
    pub fields: BTreeMap<String, (Centering, usize)>,
    pub holders: Vec<usize>,
}




// ============================================================================
impl BlockMetadata {

    /**
     * Metadata for a block a reader knows about without loading it.
     */
    pub fn declare(key: BlockKey, origin: [f64; 3], spacing: [f64; 3], extent: IndexSpace) -> Self {
        Self {
            key,
            origin,
            spacing,
            extent,
            ghost_layers: [[0; 2]; 3],
            fields: BTreeMap::new(),
            holders: Vec::new(),
        }
    }

    pub fn from_block(key: BlockKey, rank: usize, block: &GridBlock) -> Self {
        Self {
            key,
            origin: block.origin(),
            spacing: block.spacing(),
            extent: block.interior(),
            ghost_layers: block.ghost_layers(),
            fields: block
                .fields()
                .map(|(name, f)| (name.clone(), (f.centering(), f.num_components())))
                .collect(),
            holders: vec![rank],
        }
    }

    /**
     * Return the rank responsible for sending this block's data to workers
     * which need it: the lowest rank holding it.
     */
    pub fn owner(&self) -> Option<usize> {
        self.holders.first().copied()
    }

    pub fn is_loaded(&self) -> bool {
        !self.holders.is_empty()
    }

    /**
     * Return a field-less block with this geometry; useful for containment
     * tests against remote blocks.
     */
    pub fn to_block(&self) -> GridBlock {
        GridBlock::new(self.key.level, self.origin, self.spacing, self.extent.clone())
    }

    pub fn bounds(&self) -> Bounds {
        let s = self.extent.start();
        let e = self.extent.end();
        Bounds {
            min: [0, 1, 2].map(|n| self.origin[n] + self.spacing[n] * s[n] as f64),
            max: [0, 1, 2].map(|n| self.origin[n] + self.spacing[n] * e[n] as f64),
        }
    }

    fn same_geometry(&self, other: &Self) -> bool {
        self.origin == other.origin && self.spacing == other.spacing && self.extent == other.extent
    }

    /**
     * Fold another report of the same block into this one. Loaded copies
     * take precedence over declarations for the ghost layers and fields.
     */
    fn merge(&mut self, other: Self) -> Result<()> {
        if !self.same_geometry(&other) {
            return Err(Error::IncompleteMetadata(format!(
                "inconsistent reports of block {:?}: {:?} at {:?} and {:?} at {:?}",
                self.key, self.extent, self.origin, other.extent, other.origin)));
        }
        if !self.is_loaded() && other.is_loaded() {
            self.ghost_layers = other.ghost_layers;
            self.fields = other.fields;
        }
        self.holders.extend(other.holders);
        self.holders.sort_unstable();
        self.holders.dedup();
        Ok(())
    }
}




/**
 * The part of an AMR hierarchy held by one worker: the per-level declarations
 * shared by everyone, the locally loaded blocks keyed by level and index, and
 * optionally the declared geometry of blocks which are not loaded here.
 */
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Hierarchy {
    levels: Vec<LevelInfo>,
    blocks: BTreeMap<BlockKey, GridBlock>,
    declared: BTreeMap<BlockKey, BlockMetadata>,
}




// ============================================================================
impl Hierarchy {

    pub fn new(levels: Vec<LevelInfo>) -> Self {
        Self {
            levels,
            blocks: BTreeMap::new(),
            declared: BTreeMap::new(),
        }
    }

    /**
     * Return a hierarchy with the same level and block declarations, and no
     * loaded blocks.
     */
    pub fn empty_like(&self) -> Self {
        Self {
            levels: self.levels.clone(),
            blocks: BTreeMap::new(),
            declared: self.declared.clone(),
        }
    }

    fn check_key(&self, key: BlockKey) -> Result<()> {
        let info = self.levels.get(key.level as usize).ok_or_else(|| {
            Error::InvalidConfiguration(format!("level {} is not declared", key.level))
        })?;

        if key.index >= info.num_blocks {
            return Err(Error::InvalidConfiguration(format!(
                "level {} declares {} blocks, there is no block {}",
                key.level, info.num_blocks, key.index)));
        }
        Ok(())
    }

    /**
     * Insert a locally held block. Fails if the key is not one the level
     * declarations allow for, or if the block claims a different level than
     * its key.
     */
    pub fn insert(&mut self, key: BlockKey, block: GridBlock) -> Result<()> {
        self.check_key(key)?;

        if block.level() != key.level {
            return Err(Error::InvalidConfiguration(format!(
                "block at level {} inserted under key for level {}",
                block.level(), key.level)));
        }
        self.blocks.insert(key, block);
        Ok(())
    }

    /**
     * Declare the geometry of a block without loading it. A reader which
     * declares every block on every worker lets the workers plan what to
     * load before any data is read.
     */
    pub fn declare(&mut self, mut metadata: BlockMetadata) -> Result<()> {
        self.check_key(metadata.key)?;
        metadata.holders.clear();
        metadata.fields.clear();
        self.declared.insert(metadata.key, metadata);
        Ok(())
    }

    /**
     * Declare every block of another hierarchy, loaded or declared there.
     */
    pub fn declare_all(&mut self, other: &Hierarchy) -> Result<()> {
        for metadata in other.local_metadata(0).into_iter().chain(other.declared.values().cloned()) {
            self.declare(metadata)?;
        }
        Ok(())
    }

    pub fn declared(&self) -> impl Iterator<Item = &BlockMetadata> {
        self.declared.values()
    }

    pub fn levels(&self) -> &[LevelInfo] {
        &self.levels
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn get(&self, key: &BlockKey) -> Option<&GridBlock> {
        self.blocks.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BlockKey, &GridBlock)> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /**
     * Return the part of this hierarchy owned by `rank` when blocks are
     * distributed block-cyclically by global id over `workers`.
     */
    pub fn partition(&self, rank: usize, workers: usize) -> Self {
        let mut offsets = Vec::with_capacity(self.levels.len());
        let mut total = 0;

        for info in &self.levels {
            offsets.push(total);
            total += info.num_blocks;
        }
        let blocks = self.blocks
            .iter()
            .filter(|(key, _)| is_mine(offsets[key.level as usize] + key.index, rank, workers))
            .map(|(&key, block)| (key, block.clone()))
            .collect();

        Self {
            levels: self.levels.clone(),
            blocks,
            declared: self.declared.clone(),
        }
    }

    /**
     * Return the metadata of the blocks held locally, held by the given rank.
     */
    pub fn local_metadata(&self, rank: usize) -> Vec<BlockMetadata> {
        self.blocks
            .iter()
            .map(|(&key, block)| BlockMetadata::from_block(key, rank, block))
            .collect()
    }

    /**
     * Return what this worker can report about the hierarchy: the metadata of
     * its loaded blocks, and the declarations of blocks it has not loaded.
     */
    fn reported_metadata(&self, rank: usize) -> Vec<BlockMetadata> {
        let mut reported = self.local_metadata(rank);

        reported.extend(self.declared
            .values()
            .filter(|m| !self.blocks.contains_key(&m.key))
            .cloned());
        reported
    }
}




/**
 * Metadata for every block of a hierarchy, on every worker. A value of this
 * type can only be obtained from a completed, validated collective gather,
 * or from local declarations covering every block, so holding one means the
 * metadata of the whole hierarchy is known.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalMetadata {
    levels: Vec<LevelInfo>,
    entries: Vec<BlockMetadata>,
}




// ============================================================================
impl GlobalMetadata {

    /**
     * Exchange the local block metadata with every other worker. This is a
     * blocking collective: every worker in the communicator must call it
     * once. A block may be loaded by several workers, or by none if some
     * worker declares it. Fails with `IncompleteMetadata` if a contribution
     * is missing or undecodable, or if the union does not contain exactly the
     * blocks the level declarations call for.
     */
    pub fn gather<C: Communicator>(hierarchy: &Hierarchy, comm: &C) -> Result<Self> {
        let local = hierarchy.reported_metadata(comm.rank());
        let bytes = rmp_serde::to_vec(&local)
            .map_err(|e| Error::Communication(format!("encoding metadata: {}", e)))?;

        let contributions = comm
            .all_gather(bytes)
            .map_err(|e| Error::IncompleteMetadata(e.to_string()))?;

        if contributions.len() != comm.size() {
            return Err(Error::IncompleteMetadata(format!(
                "received {} of {} contributions",
                contributions.len(),
                comm.size())));
        }

        let mut entries = Vec::new();

        for bytes in contributions {
            let part: Vec<BlockMetadata> = rmp_serde::from_slice(&bytes)
                .map_err(|e| Error::IncompleteMetadata(format!("decoding metadata: {}", e)))?;
            entries.extend(part);
        }
        debug!("rank {} gathered {} metadata entries", comm.rank(), entries.len());
        Self::from_entries(hierarchy.levels().to_vec(), entries)
    }

    /**
     * Build the metadata from this worker's knowledge alone, without any
     * communication. Every block must be loaded or declared locally. No
     * worker is recorded as holding any block, so the result serves to plan
     * what to load, not to locate data.
     */
    pub fn declared(hierarchy: &Hierarchy) -> Result<Self> {
        let entries = hierarchy
            .reported_metadata(0)
            .into_iter()
            .map(|mut m| {
                m.holders.clear();
                m
            })
            .collect();
        Self::from_entries(hierarchy.levels().to_vec(), entries)
    }

    /**
     * Merge the reports of every block into one entry each, and validate
     * that they are complete.
     */
    pub fn from_entries(levels: Vec<LevelInfo>, mut reports: Vec<BlockMetadata>) -> Result<Self> {
        reports.sort_by_key(|e| e.key);

        let mut entries: Vec<BlockMetadata> = Vec::with_capacity(reports.len());

        for report in reports {
            match entries.last_mut() {
                Some(last) if last.key == report.key => last.merge(report)?,
                _ => entries.push(report),
            }
        }

        let expected: usize = levels.iter().map(|l| l.num_blocks).sum();
        let mut cursor = entries.iter();

        for (level, info) in levels.iter().enumerate() {
            for index in 0..info.num_blocks {
                let key = BlockKey::new(level as u32, index);
                match cursor.next() {
                    Some(entry) if entry.key == key => {}
                    Some(entry) => {
                        return Err(Error::IncompleteMetadata(format!(
                            "expected block {:?}, found {:?}", key, entry.key)))
                    }
                    None => {
                        return Err(Error::IncompleteMetadata(format!(
                            "block {:?} is missing ({} of {} entries present)",
                            key, entries.len(), expected)))
                    }
                }
            }
        }
        if let Some(extra) = cursor.next() {
            return Err(Error::IncompleteMetadata(format!("undeclared block {:?}", extra.key)));
        }

        let loaded = entries.iter().filter(|e| e.is_loaded()).count();
        info!("metadata for {} blocks on {} levels is complete ({} loaded)", entries.len(), levels.len(), loaded);
        Ok(Self { levels, entries })
    }

    pub fn levels(&self) -> &[LevelInfo] {
        &self.levels
    }

    /**
     * Return the entries in level-major order.
     */
    pub fn entries(&self) -> &[BlockMetadata] {
        &self.entries
    }
}
