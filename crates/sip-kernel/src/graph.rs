//! Stage Graph (construction phase)
//!
//! Edges are never declared by hand: a stage depends on every stage that
//! writes a field it reads. Construction validates the whole graph once so
//! the engine can run it without locking:
//! - stage ids are unique
//! - production graphs are acyclic
//! - every field has a single writer, and stages with no path between them
//!   never share a write

use crate::error::GraphError;
use crate::stage::{SkipPolicy, Stage, StageExecutor, StageSpec};
use crate::types::{FieldKey, GraphType, StageId};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Builder for [`StageGraph`]
///
/// ```rust,ignore
/// let mut builder = StageGraphBuilder::new(GraphType::Production);
/// builder.add_stage(spec_a, exec_a)?;
/// builder.add_stage(spec_b, exec_b)?;
/// let graph = builder.build()?;
/// ```
#[derive(Debug)]
pub struct StageGraphBuilder {
    graph_type: GraphType,
    stages: Vec<Stage>,
    index: HashMap<StageId, usize>,
}

impl StageGraphBuilder {
    #[must_use]
    pub fn new(graph_type: GraphType) -> Self {
        Self {
            graph_type,
            stages: Vec::new(),
            index: HashMap::new(),
        }
    }

    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Add a stage bound to its executor.
    ///
    /// # Errors
    /// `GraphError::DuplicateStage` if the id is already used.
    pub fn add_stage(
        &mut self,
        spec: StageSpec,
        executor: Arc<dyn StageExecutor>,
    ) -> Result<StageId, GraphError> {
        if self.index.contains_key(&spec.id) {
            return Err(GraphError::DuplicateStage(spec.id));
        }
        let id = spec.id.clone();
        self.index.insert(id.clone(), self.stages.len());
        self.stages.push(Stage::new(spec, executor));
        Ok(id)
    }

    /// Validate and freeze the graph.
    ///
    /// # Errors
    /// See [`GraphError`].
    pub fn build(self) -> Result<StageGraph, GraphError> {
        if self.stages.is_empty() {
            return Err(GraphError::EmptyGraph);
        }

        for stage in &self.stages {
            Self::check_spec(&stage.spec)?;
        }

        let mut writers: BTreeMap<FieldKey, Vec<usize>> = BTreeMap::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            for field in &stage.spec.writes {
                writers.entry(field.clone()).or_default().push(idx);
            }
        }

        let mut dag: DiGraphMap<usize, ()> = DiGraphMap::new();
        for idx in 0..self.stages.len() {
            dag.add_node(idx);
        }
        for (reader, stage) in self.stages.iter().enumerate() {
            for field in stage.spec.all_reads() {
                for &writer in writers.get(field).into_iter().flatten() {
                    dag.add_edge(writer, reader, ());
                }
            }
        }

        if self.graph_type == GraphType::Production {
            if let Some(stage) = self
                .stages
                .iter()
                .find(|s| s.spec.all_reads().any(|f| s.spec.writes.contains(f)))
            {
                return Err(GraphError::CycleDetected {
                    stage: stage.spec.id.clone(),
                });
            }
        }

        let order = match toposort(&dag, None) {
            Ok(order) => order,
            Err(cycle) if self.graph_type == GraphType::Production => {
                return Err(GraphError::CycleDetected {
                    stage: self.stages[cycle.node_id()].spec.id.clone(),
                });
            }
            Err(_) => (0..self.stages.len()).collect(),
        };

        let mut producers = HashMap::new();
        for (field, ws) in &writers {
            if let [a, b, ..] = ws.as_slice() {
                let first = self.stages[*a].spec.id.clone();
                let second = self.stages[*b].spec.id.clone();
                let ordered = has_path_connecting(&dag, *a, *b, None)
                    || has_path_connecting(&dag, *b, *a, None);
                return Err(if ordered {
                    GraphError::DuplicateWriter { field: field.clone(), first, second }
                } else {
                    GraphError::ConcurrentWriteConflict { field: field.clone(), first, second }
                });
            }
            producers.insert(field.clone(), ws[0]);
        }

        let mut external_inputs = BTreeSet::new();
        let mut required_inputs = BTreeSet::new();
        for stage in &self.stages {
            for field in stage.spec.all_reads() {
                if !producers.contains_key(field) {
                    external_inputs.insert(field.clone());
                }
            }
            for field in &stage.spec.reads {
                if !producers.contains_key(field) {
                    required_inputs.insert(field.clone());
                }
            }
        }

        tracing::debug!(
            stages = self.stages.len(),
            edges = dag.edge_count(),
            "stage graph validated"
        );

        Ok(StageGraph {
            graph_type: self.graph_type,
            stages: self.stages,
            index: self.index,
            dag,
            order,
            producers,
            external_inputs,
            required_inputs,
        })
    }

    fn check_spec(spec: &StageSpec) -> Result<(), GraphError> {
        if let Some(field) = spec.reads.intersection(&spec.optional_reads).next() {
            return Err(GraphError::AmbiguousRead {
                stage: spec.id.clone(),
                field: field.clone(),
            });
        }
        if matches!(spec.skip_policy, SkipPolicy::WhenOptionalInputsEmpty { .. })
            && spec.optional_reads.is_empty()
        {
            return Err(GraphError::SkipWithoutOptionalReads(spec.id.clone()));
        }
        Ok(())
    }
}

impl Default for StageGraphBuilder {
    fn default() -> Self {
        Self::new(GraphType::Production)
    }
}

/// A validated stage graph
///
/// Only produced by [`StageGraphBuilder::build`].
#[derive(Debug)]
pub struct StageGraph {
    graph_type: GraphType,
    stages: Vec<Stage>,
    index: HashMap<StageId, usize>,
    dag: DiGraphMap<usize, ()>,
    order: Vec<usize>,
    producers: HashMap<FieldKey, usize>,
    external_inputs: BTreeSet<FieldKey>,
    required_inputs: BTreeSet<FieldKey>,
}

impl StageGraph {
    #[must_use]
    pub fn graph_type(&self) -> GraphType {
        self.graph_type
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    #[must_use]
    pub fn stage(&self, id: &StageId) -> Option<&Stage> {
        self.index.get(id).map(|&i| &self.stages[i])
    }

    /// Stages in declaration order
    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter()
    }

    /// Stages in dependency order (declaration order for cyclic sandbox graphs)
    pub fn topological_order(&self) -> impl Iterator<Item = &Stage> {
        self.order.iter().map(|&i| &self.stages[i])
    }

    /// Stages with no upstream dependency
    #[must_use]
    pub fn entry_stages(&self) -> Vec<&StageId> {
        self.order
            .iter()
            .filter(|&&i| self.dag.neighbors_directed(i, Direction::Incoming).next().is_none())
            .map(|&i| &self.stages[i].spec.id)
            .collect()
    }

    /// Stages nothing depends on
    #[must_use]
    pub fn terminal_stages(&self) -> Vec<&StageId> {
        self.order
            .iter()
            .filter(|&&i| self.dag.neighbors_directed(i, Direction::Outgoing).next().is_none())
            .map(|&i| &self.stages[i].spec.id)
            .collect()
    }

    /// Direct upstream stages
    #[must_use]
    pub fn dependencies(&self, id: &StageId) -> Vec<&StageId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct downstream stages
    #[must_use]
    pub fn dependents(&self, id: &StageId) -> Vec<&StageId> {
        self.neighbors(id, Direction::Outgoing)
    }

    #[must_use]
    pub fn producer_of(&self, field: &FieldKey) -> Option<&StageId> {
        self.producers.get(field).map(|&i| &self.stages[i].spec.id)
    }

    /// Fields read by some stage but written by none; supplied at invocation
    #[must_use]
    pub fn external_inputs(&self) -> &BTreeSet<FieldKey> {
        &self.external_inputs
    }

    /// External inputs that some stage reads as required
    #[must_use]
    pub fn required_inputs(&self) -> &BTreeSet<FieldKey> {
        &self.required_inputs
    }

    /// External inputs only ever read optionally
    pub fn optional_inputs(&self) -> impl Iterator<Item = &FieldKey> {
        self.external_inputs.difference(&self.required_inputs)
    }

    /// Whether two stages have no path between them in either direction.
    #[must_use]
    pub fn can_run_concurrently(&self, a: &StageId, b: &StageId) -> bool {
        match (self.index.get(a), self.index.get(b)) {
            (Some(&a), Some(&b)) if a != b => {
                !has_path_connecting(&self.dag, a, b, None)
                    && !has_path_connecting(&self.dag, b, a, None)
            }
            _ => false,
        }
    }

    pub(crate) fn stage_at(&self, idx: usize) -> &Stage {
        &self.stages[idx]
    }

    pub(crate) fn order_indices(&self) -> &[usize] {
        &self.order
    }

    fn neighbors(&self, id: &StageId, dir: Direction) -> Vec<&StageId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<usize> = self.dag.neighbors_directed(idx, dir).collect();
        out.sort_unstable();
        out.into_iter().map(|i| &self.stages[i].spec.id).collect()
    }
}
