//! Unified error type for hedgecut public APIs.
//!
//! Fallible operations return [`CoreError`]; precondition violations (edge
//! ids out of range, uncontraction out of LIFO order, duplicate seeds) are
//! bugs and are caught by debug assertions instead.

use thiserror::Error;

use crate::graph::NodeId;

/// Errors surfaced by the partitioning core. All of them arise during
/// construction; once a structure is built, its operations are total. In
/// particular the work queues grow through segment installation and never
/// hit a reallocation cap, so no refinement round can fail on resource
/// exhaustion short of the allocator itself aborting.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The edge list referenced a node outside `[0, num_nodes)`.
    #[error("edge endpoint {0} out of range (graph has {1} nodes)")]
    NodeOutOfRange(NodeId, NodeId),
    /// A weight vector did not match the entity count it describes.
    #[error("weight vector has length {got}, expected {expected}")]
    WeightLengthMismatch { expected: usize, got: usize },
    /// A hyperedge with no pins was passed to construction.
    #[error("hyperedge {0} has no pins")]
    EmptyHyperedge(usize),
}
