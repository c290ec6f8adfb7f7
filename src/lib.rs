//! Amrkit is a domain-decomposition engine for block-structured adaptive mesh
//! refinement (AMR) data. A hierarchy consists of uniform, axis-aligned grid
//! blocks placed at refinement levels of increasing resolution, distributed
//! over a number of workers. The crate determines which blocks a worker or a
//! region of interest needs, reconstructs ghost cells along block boundaries
//! (including across refinement levels), and resamples a hierarchy onto a
//! single uniform grid. Every result depends on the geometry of the
//! hierarchy alone, never on how many workers take part.
//!
//! The pipeline stages are:
//!
//! - [`metadata`]: local blocks, and the collective gather of their metadata
//! - [`registry`]: global geometry and stable block ids
//! - [`connectivity`]: neighbor relationships between blocks
//! - [`ghost`]: ghost layer generation, as a sequence of phase types
//! - [`region`]: block selection and block-cyclic ownership
//! - [`resample`]: uniform target grids, donor lookup and field transfer

pub mod block;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod field;
pub mod ghost;
pub mod image_to_amr;
pub mod index_space;
pub mod message;
pub mod metadata;
pub mod region;
pub mod registry;
pub mod resample;

pub use block::{Bounds, GridBlock, PointLocator};
pub use config::{Config, TransferMode};
pub use error::{Error, Result};
pub use field::{Centering, Field, SENTINEL};
pub use metadata::{BlockKey, Hierarchy, LevelInfo};
pub use registry::{BlockId, BlockRegistry};
