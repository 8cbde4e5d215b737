//! Weighted graph view over the dynamic adjacency array, with the
//! contraction history needed for multilevel uncoarsening.

use crate::error::CoreError;
use crate::graph::adjacency::{DynamicAdjacencyArray, NoopLocks, VertexLocks};
use crate::graph::{EdgeId, EdgeWeight, NodeId, NodeWeight};

/// One contraction, recorded for LIFO uncoarsening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractionMemento {
    pub u: NodeId,
    pub v: NodeId,
}

/// A contractible weighted graph.
#[derive(Debug, Clone)]
pub struct DynamicGraph {
    adjacency: DynamicAdjacencyArray,
    node_weights: Vec<NodeWeight>,
    num_active_nodes: NodeId,
    history: Vec<ContractionMemento>,
}

impl DynamicGraph {
    pub fn from_edge_list(
        num_nodes: NodeId,
        pairs: &[(NodeId, NodeId)],
        edge_weights: Option<&[EdgeWeight]>,
        node_weights: Option<&[NodeWeight]>,
    ) -> Result<Self, CoreError> {
        if let Some(w) = node_weights {
            if w.len() != num_nodes as usize {
                return Err(CoreError::WeightLengthMismatch {
                    expected: num_nodes as usize,
                    got: w.len(),
                });
            }
        }
        Ok(DynamicGraph {
            adjacency: DynamicAdjacencyArray::build_from_edge_list(num_nodes, pairs, edge_weights)?,
            node_weights: node_weights
                .map(<[NodeWeight]>::to_vec)
                .unwrap_or_else(|| vec![1; num_nodes as usize]),
            num_active_nodes: num_nodes,
            history: Vec::new(),
        })
    }

    #[inline]
    pub fn adjacency(&self) -> &DynamicAdjacencyArray {
        &self.adjacency
    }

    #[inline]
    pub fn initial_num_nodes(&self) -> NodeId {
        self.adjacency.num_nodes()
    }

    /// Number of representatives remaining at the current level.
    #[inline]
    pub fn current_num_nodes(&self) -> NodeId {
        self.num_active_nodes
    }

    #[inline]
    pub fn node_weight(&self, u: NodeId) -> NodeWeight {
        self.node_weights[u as usize]
    }

    #[inline]
    pub fn node_degree(&self, u: NodeId) -> u32 {
        self.adjacency.node_degree(u)
    }

    #[inline]
    pub fn is_head(&self, u: NodeId) -> bool {
        self.adjacency.header(u).is_head
    }

    pub fn incident_edges(&self, u: NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        self.adjacency.incident_edges(u)
    }

    pub fn total_node_weight(&self) -> NodeWeight {
        (0..self.initial_num_nodes())
            .filter(|&u| self.is_head(u))
            .map(|u| self.node_weight(u))
            .sum()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Contract `v` into `u`, merging node weights.
    pub fn contract(&mut self, u: NodeId, v: NodeId) {
        self.contract_with_locks(u, v, &NoopLocks);
    }

    pub fn contract_with_locks<L: VertexLocks>(&mut self, u: NodeId, v: NodeId, locks: &L) {
        self.adjacency.contract(u, v, locks);
        self.node_weights[u as usize] += self.node_weights[v as usize];
        self.num_active_nodes -= 1;
        self.history.push(ContractionMemento { u, v });
    }

    /// Coalesce parallel edges formed by the contractions of this pass.
    pub fn remove_parallel_edges(&mut self) {
        self.adjacency.remove_parallel_edges();
    }

    /// Undo the most recent contraction; `case_one`/`case_two` are forwarded
    /// to the adjacency array's reactivation callbacks.
    pub fn uncontract_latest<F1, F2>(&mut self, case_one: F1, case_two: F2) -> Option<ContractionMemento>
    where
        F1: FnMut(EdgeId),
        F2: FnMut(EdgeId),
    {
        let m = self.history.pop()?;
        self.adjacency.uncontract(m.u, m.v, case_one, case_two, &NoopLocks);
        self.node_weights[m.u as usize] -= self.node_weights[m.v as usize];
        self.num_active_nodes += 1;
        Some(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_merge_and_split() {
        let mut g = DynamicGraph::from_edge_list(
            3,
            &[(0, 1), (1, 2)],
            None,
            Some(&[5, 7, 9]),
        )
        .unwrap();
        assert_eq!(g.total_node_weight(), 21);
        g.contract(0, 1);
        assert_eq!(g.node_weight(0), 12);
        assert_eq!(g.current_num_nodes(), 2);
        assert_eq!(g.total_node_weight(), 21);
        let m = g.uncontract_latest(|_| {}, |_| {}).unwrap();
        assert_eq!((m.u, m.v), (0, 1));
        assert_eq!(g.node_weight(0), 5);
        assert_eq!(g.current_num_nodes(), 3);
    }
}
