//! The recursive task protocol: how tasks arranged in a binary tree pass
//! their regions upward, level by level, and how the root then pushes final
//! labels back down and shuts the tree.

pub mod local;
pub mod merge;
pub mod request;
pub mod section_data;
pub mod segmentation;
pub mod task;
pub mod transport;
pub mod tree;

pub use local::{run_local_cluster, ClusterOutcome};
pub use merge::{MergeDecision, MergePlan, NoMerge};
pub use request::{Envelope, RequestKind};
pub use section_data::{BorderStore, LabelMaps, SectionData};
pub use segmentation::SegmentationMap;
pub use task::{RecursiveTask, RootOutcome, RunOptions, TaskReport, TaskState};
pub use transport::{ChannelNetwork, ChannelTransport, Transport};
pub use tree::{LevelRole, RecursionTree};

#[cfg(test)]
mod protocol_tests;
