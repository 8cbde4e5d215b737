//! Refinement algorithms: deterministic synchronous label propagation,
//! localized k-way FM, and flow-based refinement scheduling over the
//! quotient graph.

pub mod fm;
pub mod gains;
pub mod lp;
pub mod quotient;

/// Identifier of one refinement search.
pub type SearchId = u32;

/// Returned when no block pair is available for scheduling.
pub const INVALID_SEARCH_ID: SearchId = SearchId::MAX;
