use thiserror::Error;




/**
 * Error to represent an invalid AMR hierarchy, an invalid configuration, or a
 * failed collective exchange. Configuration and coordination errors are fatal
 * to the current invocation. Coverage gaps are never reported through this
 * type.
 */
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("level {level}: block {block} has spacing {found:?}, but the level uses {expected:?}")]
    InconsistentSpacing {
        level: u32,
        block: usize,
        expected: [f64; 3],
        found: [f64; 3],
    },

    #[error("spacing {coarse:?} (level {coarse_level}) is not an integer multiple of {fine:?} (level {fine_level})")]
    RefinementRatio {
        coarse_level: u32,
        fine_level: u32,
        coarse: [f64; 3],
        fine: [f64; 3],
    },

    #[error("level {level} has blocks but no declared whole extent")]
    MissingWholeExtent { level: u32 },

    #[error("block {block} is not a uniform grid: {reason}")]
    NonUniformGrid { block: String, reason: String },

    #[error("no blocks exist at level {level}, cannot infer the target grid spacing")]
    NoReferenceGrid { level: u32 },

    #[error("level {level}: interiors of blocks {a} and {b} overlap")]
    OverlappingInterior { level: u32, a: usize, b: usize },

    #[error("field `{name}`: {reason}")]
    FieldMismatch { name: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("incomplete metadata exchange: {0}")]
    IncompleteMetadata(String),

    #[error("communication failure: {0}")]
    Communication(String),
}




/**
 * Result type used throughout this crate.
 */
pub type Result<T> = core::result::Result<T, Error>;
