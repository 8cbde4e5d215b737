//! # hedgecut
//!
//! hedgecut is the core of a shared-memory multilevel (hyper)graph
//! partitioner: given a (hyper)graph and a block count `k`, it produces a
//! k-way partition minimizing a cut-derived objective (connectivity or cut)
//! under per-block weight bounds.
//!
//! ## What lives here
//! - A dynamic adjacency array supporting versioned contraction and
//!   uncontraction of vertex pairs with neighbor-list splicing
//!   ([`graph::adjacency`])
//! - A deterministic multilevel coarsener whose clustering is reproducible
//!   for a fixed seed under any thread count ([`coarsening`])
//! - A deterministic synchronous label-propagation refiner with balanced
//!   swap-prefix selection and gain recalculation ([`refinement::lp`])
//! - A localized k-way FM refiner with a delta overlay and best-prefix
//!   rollback ([`refinement::fm`])
//! - A quotient graph and active-block scheduler coordinating flow-based
//!   refinement between block pairs ([`refinement::quotient`])
//! - Per-worker work queues with stealing and timestamp deduplication
//!   ([`parallel::work_container`])
//!
//! Input parsing, presets, initial partitioning and the max-flow solver are
//! host-side collaborators; the crate exposes the interfaces they plug into
//! (edge lists, the [`graph::partitioned::PartitionView`] seam, the
//! [`refinement::quotient::FlowOracle`] trait).
//!
//! ## Determinism
//! The coarsener and the synchronous label propagation produce bytewise
//! identical results for a fixed seed regardless of the worker count; FM and
//! flow scheduling intentionally trade reproducibility for parallelism.

pub mod coarsening;
pub mod context;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod parallel;
pub mod refinement;

/// Run a fallible structural check and panic with context when invariant
/// checking is enabled (debug builds or the `strict-invariants` feature).
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}

/// The most-used types and entry points.
pub mod prelude {
    pub use crate::coarsening::DeterministicCoarsener;
    pub use crate::context::{Context, Objective};
    pub use crate::error::CoreError;
    pub use crate::graph::adjacency::{DynamicAdjacencyArray, NoopLocks, VertexLocks};
    pub use crate::graph::dynamic_graph::DynamicGraph;
    pub use crate::graph::hypergraph::Hypergraph;
    pub use crate::graph::partitioned::{PartitionView, PartitionedHypergraph};
    pub use crate::graph::{EdgeId, Gain, Move, NodeId, PartId, INVALID_PART};
    pub use crate::refinement::fm::shared::FmSharedData;
    pub use crate::refinement::fm::LocalizedKWayFm;
    pub use crate::refinement::lp::DeterministicLabelPropagation;
    pub use crate::refinement::quotient::{FlowOracle, FlowResult, QuotientGraph};
    pub use crate::refinement::INVALID_SEARCH_ID;
}
