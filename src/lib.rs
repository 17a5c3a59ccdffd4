//! This file is the root of the `rhseg_core` Rust crate: the distributed
//! execution core of recursive hierarchical image segmentation.
//!
//! Its responsibilities are strictly limited to:
//! 1.  Declaring all the top-level modules of the library.
//! 2.  Re-exporting the types a caller needs to run a segmentation.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//==================================================================================
// 1. Module Declarations
//==================================================================================
pub mod buffer;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod records;
pub mod region;
pub mod results;
pub mod section;
pub mod spatial;
pub mod utils;

//==================================================================================
// 2. Public Surface
//==================================================================================
pub use buffer::{BufferSizes, MessageBuffer, WireRecord};
pub use config::{Dimensionality, FeatureFlags, RhsegConfig};
pub use error::RhsegError;
pub use observability::enable_verbose_logging;
pub use protocol::{
    run_local_cluster, ClusterOutcome, MergeDecision, MergePlan, NoMerge, RecursiveTask,
    RootOutcome, RunOptions, SegmentationMap, TaskReport, TaskState, Transport,
};
pub use records::{IndexRecord, Pixel, RecordLayout};
pub use region::{RegionClass, RegionObject, RegionSet};
pub use results::{LevelCounts, ResultsStore};
