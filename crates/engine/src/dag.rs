//! DAG validation and planning. Run this before persisting or executing a
//! workflow.
//!
//! Rules enforced:
//! 1. Node IDs and node keys must be unique within the workflow.
//! 2. Every edge must reference valid node IDs (both `from` and `to`).
//! 3. The directed graph must be acyclic (topological sort must succeed).
//!
//! Nodes are addressed by their index in `workflow.nodes`; adjacency is kept
//! as index lists so the plan never holds references into the workflow.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use crate::{models::Workflow, EngineError};

/// Execution plan for one workflow, computed once per execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagPlan {
    /// Node indices in execution order.
    order: Vec<usize>,
    /// Direct predecessors of each node, in edge declaration order.
    upstream: Vec<Vec<usize>>,
    /// Transitive predecessors of each node.
    ancestors: Vec<BTreeSet<usize>>,
}

impl DagPlan {
    /// Validate the workflow's graph and compute its plan.
    ///
    /// Among nodes that are ready at the same time, the one declared first
    /// runs first, so the order is deterministic.
    ///
    /// # Errors
    /// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
    /// - [`EngineError::DuplicateNodeKey`] if two nodes share a key.
    /// - [`EngineError::UnknownNodeReference`] if an edge references a missing node.
    /// - [`EngineError::CycleDetected`] if the graph is not acyclic.
    pub fn build(workflow: &Workflow) -> Result<Self, EngineError> {
        let node_count = workflow.nodes.len();

        // -------------------------------------------------------------------
        // 1. Ensure node IDs and keys are unique
        // -------------------------------------------------------------------
        let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(node_count);
        let mut seen_keys: HashSet<&str> = HashSet::with_capacity(node_count);
        for (idx, node) in workflow.nodes.iter().enumerate() {
            if index_of.insert(node.id.as_str(), idx).is_some() {
                return Err(EngineError::DuplicateNodeId(node.id.clone()));
            }
            if !seen_keys.insert(node.key.as_str()) {
                return Err(EngineError::DuplicateNodeKey(node.key.clone()));
            }
        }

        // -------------------------------------------------------------------
        // 2. Validate edge endpoints and build adjacency
        // -------------------------------------------------------------------
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); node_count];
        let mut upstream: Vec<Vec<usize>> = vec![Vec::new(); node_count];
        let mut in_degree: Vec<usize> = vec![0; node_count];

        for edge in &workflow.edges {
            let from = *index_of.get(edge.from.as_str()).ok_or_else(|| {
                EngineError::UnknownNodeReference {
                    node_id: edge.from.clone(),
                    side: "from",
                }
            })?;
            let to = *index_of.get(edge.to.as_str()).ok_or_else(|| {
                EngineError::UnknownNodeReference {
                    node_id: edge.to.clone(),
                    side: "to",
                }
            })?;
            downstream[from].push(to);
            upstream[to].push(from);
            in_degree[to] += 1;
        }

        // -------------------------------------------------------------------
        // 3. Topological sort (Kahn's algorithm, lowest index first)
        // -------------------------------------------------------------------
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(idx, _)| Reverse(idx))
            .collect();

        let mut order: Vec<usize> = Vec::with_capacity(node_count);
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &next in &downstream[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        // If we didn't visit every node the graph contains a cycle.
        if order.len() != node_count {
            return Err(EngineError::CycleDetected);
        }

        // -------------------------------------------------------------------
        // 4. Ancestor sets, filled in topological order
        // -------------------------------------------------------------------
        let mut ancestors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); node_count];
        for &idx in &order {
            let mut set = BTreeSet::new();
            for &parent in &upstream[idx] {
                set.insert(parent);
                set.extend(ancestors[parent].iter().copied());
            }
            ancestors[idx] = set;
        }

        Ok(Self { order, upstream, ancestors })
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn upstream(&self, idx: usize) -> &[usize] {
        &self.upstream[idx]
    }

    pub fn ancestors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.ancestors[idx].iter().copied()
    }
}

/// Validate the workflow's DAG and return node IDs in execution order.
pub fn validate_dag(workflow: &Workflow) -> Result<Vec<String>, EngineError> {
    let plan = DagPlan::build(workflow)?;
    Ok(plan
        .order()
        .iter()
        .map(|&idx| workflow.nodes[idx].id.clone())
        .collect())
}
