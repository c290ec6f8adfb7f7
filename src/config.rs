use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};




/**
 * Where resampled values are placed on the target grid.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferMode {
    /// One value per target cell, taken from the donor cell containing the
    /// cell centre.
    CellCenters,
    /// One value per target node, averaged over the donor cells adjacent to
    /// the node.
    Nodes,
}




/**
 * Options recognized by ghost generation and resampling. Values are plain
 * data and may come from a file, a command line or code; call `validate`
 * before handing them to a pipeline stage.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub level_of_resolution: u32,
    pub ghost_depth: usize,
    pub number_of_subdivisions: usize,
    pub transfer_mode: TransferMode,
    pub region_min: [f64; 3],
    pub region_max: [f64; 3],
    /// Load on each worker only the blocks its subdivisions need, rather
    /// than a block-cyclic share of the hierarchy.
    pub demand_driven: bool,
}




// ============================================================================
impl Default for Config {
    fn default() -> Self {
        Self {
            level_of_resolution: 0,
            ghost_depth: 1,
            number_of_subdivisions: 1,
            transfer_mode: TransferMode::CellCenters,
            region_min: [0.0; 3],
            region_max: [1.0; 3],
            demand_driven: false,
        }
    }
}




// ============================================================================
impl Config {

    /**
     * Check the option values, returning `InvalidConfiguration` naming the
     * first offending option.
     */
    pub fn validate(&self) -> Result<()> {
        if self.ghost_depth < 1 {
            return Err(Error::InvalidConfiguration("ghost_depth must be at least 1".into()));
        }
        if self.number_of_subdivisions < 1 {
            return Err(Error::InvalidConfiguration("number_of_subdivisions must be at least 1".into()));
        }
        for n in 0..3 {
            let (a, b) = (self.region_min[n], self.region_max[n]);

            if !(a.is_finite() && b.is_finite()) {
                return Err(Error::InvalidConfiguration(format!("region bound on axis {} is not finite", n)));
            }
            if a > b {
                return Err(Error::InvalidConfiguration(format!(
                    "region_min {:?} exceeds region_max {:?} on axis {}",
                    self.region_min, self.region_max, n)));
            }
        }
        Ok(())
    }
}
