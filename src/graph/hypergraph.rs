//! Static hypergraph in CSR form: pin lists per hyperedge plus the
//! transposed incidence structure (nets per node).

use crate::error::CoreError;
use crate::graph::{EdgeId, EdgeWeight, NodeId, NodeWeight};

/// Immutable hypergraph consumed by the refiners through a partitioned view.
#[derive(Debug, Clone)]
pub struct Hypergraph {
    num_nodes: NodeId,
    node_weights: Vec<NodeWeight>,
    edge_weights: Vec<EdgeWeight>,
    pin_index: Vec<usize>,
    pins: Vec<NodeId>,
    incidence_index: Vec<usize>,
    incident_nets: Vec<EdgeId>,
}

impl Hypergraph {
    pub fn new(
        num_nodes: NodeId,
        edges: &[Vec<NodeId>],
        edge_weights: Option<&[EdgeWeight]>,
        node_weights: Option<&[NodeWeight]>,
    ) -> Result<Self, CoreError> {
        if let Some(w) = edge_weights {
            if w.len() != edges.len() {
                return Err(CoreError::WeightLengthMismatch { expected: edges.len(), got: w.len() });
            }
        }
        if let Some(w) = node_weights {
            if w.len() != num_nodes as usize {
                return Err(CoreError::WeightLengthMismatch {
                    expected: num_nodes as usize,
                    got: w.len(),
                });
            }
        }

        let mut pin_index = Vec::with_capacity(edges.len() + 1);
        pin_index.push(0usize);
        let mut pins = Vec::new();
        for (i, e) in edges.iter().enumerate() {
            if e.is_empty() {
                return Err(CoreError::EmptyHyperedge(i));
            }
            for &p in e {
                if p >= num_nodes {
                    return Err(CoreError::NodeOutOfRange(p, num_nodes));
                }
                pins.push(p);
            }
            pin_index.push(pins.len());
        }

        let mut incidence_index = vec![0usize; num_nodes as usize + 1];
        for &p in &pins {
            incidence_index[p as usize + 1] += 1;
        }
        for u in 0..num_nodes as usize {
            incidence_index[u + 1] += incidence_index[u];
        }
        let mut cursor = incidence_index.clone();
        let mut incident_nets = vec![0 as EdgeId; pins.len()];
        for (e, window) in pin_index.windows(2).enumerate() {
            for &p in &pins[window[0]..window[1]] {
                incident_nets[cursor[p as usize]] = e as EdgeId;
                cursor[p as usize] += 1;
            }
        }

        Ok(Hypergraph {
            num_nodes,
            node_weights: node_weights
                .map(<[NodeWeight]>::to_vec)
                .unwrap_or_else(|| vec![1; num_nodes as usize]),
            edge_weights: edge_weights
                .map(<[EdgeWeight]>::to_vec)
                .unwrap_or_else(|| vec![1; edges.len()]),
            pin_index,
            pins,
            incidence_index,
            incident_nets,
        })
    }

    /// A plain graph as a hypergraph of 2-pin nets.
    pub fn from_graph_edges(
        num_nodes: NodeId,
        pairs: &[(NodeId, NodeId)],
        edge_weights: Option<&[EdgeWeight]>,
        node_weights: Option<&[NodeWeight]>,
    ) -> Result<Self, CoreError> {
        let nets: Vec<Vec<NodeId>> = pairs.iter().map(|&(a, b)| vec![a, b]).collect();
        Self::new(num_nodes, &nets, edge_weights, node_weights)
    }

    #[inline]
    pub fn initial_num_nodes(&self) -> NodeId {
        self.num_nodes
    }

    #[inline]
    pub fn initial_num_edges(&self) -> EdgeId {
        (self.pin_index.len() - 1) as EdgeId
    }

    #[inline]
    pub fn node_weight(&self, u: NodeId) -> NodeWeight {
        self.node_weights[u as usize]
    }

    #[inline]
    pub fn edge_weight(&self, e: EdgeId) -> EdgeWeight {
        self.edge_weights[e as usize]
    }

    #[inline]
    pub fn edge_size(&self, e: EdgeId) -> usize {
        self.pin_index[e as usize + 1] - self.pin_index[e as usize]
    }

    #[inline]
    pub fn pins(&self, e: EdgeId) -> &[NodeId] {
        &self.pins[self.pin_index[e as usize]..self.pin_index[e as usize + 1]]
    }

    #[inline]
    pub fn incident_edges(&self, u: NodeId) -> &[EdgeId] {
        &self.incident_nets[self.incidence_index[u as usize]..self.incidence_index[u as usize + 1]]
    }

    #[inline]
    pub fn node_degree(&self, u: NodeId) -> usize {
        self.incident_edges(u).len()
    }

    pub fn total_node_weight(&self) -> NodeWeight {
        self.node_weights.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csr_structures_are_consistent() {
        let hg = Hypergraph::new(
            5,
            &[vec![0, 1, 2], vec![2, 3], vec![3, 4, 0]],
            Some(&[2, 1, 3]),
            None,
        )
        .unwrap();
        assert_eq!(hg.initial_num_edges(), 3);
        assert_eq!(hg.edge_size(0), 3);
        assert_eq!(hg.pins(1), &[2, 3]);
        assert_eq!(hg.incident_edges(0), &[0, 2]);
        assert_eq!(hg.incident_edges(3), &[1, 2]);
        assert_eq!(hg.edge_weight(2), 3);
        assert_eq!(hg.total_node_weight(), 5);
    }

    #[test]
    fn empty_hyperedge_is_rejected() {
        let err = Hypergraph::new(2, &[vec![]], None, None).unwrap_err();
        assert_eq!(err, CoreError::EmptyHyperedge(0));
    }
}
