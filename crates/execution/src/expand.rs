//! Expansion of workflow definitions into concrete node instances.
//!
//! The expander walks the definition graph in topological order and turns
//! each node into the set of [`NodeInstance`]s covering its mapper's
//! state-space, wiring port-level edges between the concrete instances as it
//! goes. Expansion is pure and deterministic: the same definition always
//! yields the same instances, enumerated row-major with the outermost axis
//! first, so instance ids and fingerprints are reproducible across runs.

use std::collections::{BTreeMap, HashMap};

use cascade_core::NodeId;
use cascade_workflow::{
    AxisRef, Connection, DependencyGraph, Mapper, NodeDefinition, WorkflowDefinition,
};
use serde_json::Value;
use thiserror::Error;

use crate::instance::{AxisAssignment, AxisId, InputSource, InstanceId, NodeInstance, StateIndex};

/// Errors raised while expanding a workflow into instances.
///
/// These are validation failures: nothing has executed when they surface.
#[derive(Debug, Error)]
pub enum ExpandError {
    /// A mapped input port has no default value to iterate over.
    #[error("mapper on node {node_id} maps input port '{port}' which has no default value")]
    MissingAxisValues {
        /// The node carrying the mapper.
        node_id: NodeId,
        /// The mapped port.
        port: String,
    },

    /// A mapped input port's default is not a JSON array.
    #[error("mapper on node {node_id} maps input port '{port}' whose default is not an array")]
    AxisNotArray {
        /// The node carrying the mapper.
        node_id: NodeId,
        /// The mapped port.
        port: String,
    },

    /// Zipped axes have different lengths.
    #[error("zip on node {node_id} combines axes of mismatched lengths: {lengths:?}")]
    ZipLengthMismatch {
        /// The node carrying the mapper.
        node_id: NodeId,
        /// The operand lengths that failed to align.
        lengths: Vec<usize>,
    },

    /// A combinator has no operands.
    #[error("mapper on node {node_id} has an empty operand list")]
    EmptyMapper {
        /// The node carrying the mapper.
        node_id: NodeId,
    },

    /// A combination assigned two different indices to the same axis.
    #[error("mapper on node {node_id} combines conflicting assignments on axis {axis}")]
    ConflictingAxes {
        /// The node carrying the mapper.
        node_id: NodeId,
        /// The doubly-assigned axis.
        axis: AxisId,
    },

    /// A mapper references a node that is not upstream of the mapped node.
    #[error("mapper on node {node_id} references node {source_node_id} which is not upstream")]
    NodeNotUpstream {
        /// The node carrying the mapper.
        node_id: NodeId,
        /// The referenced node.
        source_node_id: NodeId,
    },

    /// Graph construction failed.
    #[error(transparent)]
    Workflow(#[from] cascade_workflow::WorkflowError),
}

/// One candidate state-space point during expansion.
#[derive(Debug, Clone, Default)]
struct Point {
    /// Axis assignments accumulated so far.
    index: BTreeMap<AxisId, usize>,
    /// Literal values bound by mapper axes, in binding order.
    bindings: Vec<(String, Value)>,
    /// Upstream sibling choices made by explicit outer crosses:
    /// node → the chosen sibling's full axis assignment.
    selections: BTreeMap<NodeId, BTreeMap<AxisId, usize>>,
    /// Input sources resolved so far (connections join in here).
    inputs: BTreeMap<String, InputSource>,
}

/// Everything downstream nodes need to know about an expanded node.
#[derive(Debug)]
struct NodeExpansion {
    /// Final instances in enumeration order: (id, full axis assignment).
    instances: Vec<(InstanceId, BTreeMap<AxisId, usize>)>,
}

/// Expand a validated workflow definition into concrete node instances.
///
/// Instances are returned grouped by node in topological order, each group
/// enumerated row-major over its axes.
pub fn expand(
    definition: &WorkflowDefinition,
    graph: &DependencyGraph,
) -> Result<Vec<NodeInstance>, ExpandError> {
    Expander::new(definition, graph).run()
}

struct Expander<'a> {
    definition: &'a WorkflowDefinition,
    graph: &'a DependencyGraph,
    axis_seq: HashMap<AxisId, usize>,
    next_seq: usize,
    expansions: HashMap<NodeId, NodeExpansion>,
}

impl<'a> Expander<'a> {
    fn new(definition: &'a WorkflowDefinition, graph: &'a DependencyGraph) -> Self {
        Self {
            definition,
            graph,
            axis_seq: HashMap::new(),
            next_seq: 0,
            expansions: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<Vec<NodeInstance>, ExpandError> {
        let order = self.graph.topological_sort()?;
        let mut all = Vec::new();

        for node_id in order {
            let node = self
                .definition
                .node(node_id)
                .ok_or(cascade_workflow::WorkflowError::UnknownNode(node_id))?;
            let instances = self.expand_node(node)?;
            all.extend(instances);
        }

        Ok(all)
    }

    /// Register an axis, assigning it a global sequence number on first use.
    fn alloc_axis(&mut self, axis: &AxisId) {
        if !self.axis_seq.contains_key(axis) {
            self.axis_seq.insert(axis.clone(), self.next_seq);
            self.next_seq += 1;
        }
    }

    /// Row-major sort key for a point: (axis seq, index) pairs.
    fn point_sort_key(&self, index: &BTreeMap<AxisId, usize>) -> Vec<(usize, usize)> {
        let mut key: Vec<(usize, usize)> = index
            .iter()
            .map(|(axis, idx)| (self.axis_seq[axis], *idx))
            .collect();
        key.sort_unstable();
        key
    }

    /// Axis assignments ordered outermost (lowest seq) first.
    fn ordered_assignments(&self, index: &BTreeMap<AxisId, usize>) -> Vec<AxisAssignment> {
        let mut assignments: Vec<(usize, AxisAssignment)> = index
            .iter()
            .map(|(axis, idx)| {
                (
                    self.axis_seq[axis],
                    AxisAssignment {
                        axis: axis.clone(),
                        index: *idx,
                    },
                )
            })
            .collect();
        assignments.sort_by_key(|(seq, _)| *seq);
        assignments.into_iter().map(|(_, a)| a).collect()
    }

    fn expand_node(&mut self, node: &NodeDefinition) -> Result<Vec<NodeInstance>, ExpandError> {
        // 1. The node's own state-space from its mapper.
        let mut points = match &node.mapper {
            Some(mapper) => self.eval_mapper(node, mapper, false)?,
            None => vec![Point::default()],
        };

        // 2. Join with each parent's instances through the incoming edges.
        let mut connections: Vec<&Connection> = self.graph.incoming_connections(node.id);
        connections.sort_by(|a, b| {
            (a.from_node.to_string(), &a.to_port).cmp(&(b.from_node.to_string(), &b.to_port))
        });

        for conn in connections {
            let gather = node
                .input(&conn.to_port)
                .is_some_and(cascade_workflow::PortSpec::is_gather);
            points = if gather {
                self.join_gather(points, conn)
            } else {
                self.join_single(points, conn)
            };
        }

        // 3. Fill literal inputs: axis bindings first, then plain defaults.
        for point in &mut points {
            let bindings = std::mem::take(&mut point.bindings);
            for (port, value) in bindings {
                point
                    .inputs
                    .entry(port)
                    .or_insert(InputSource::Literal { value });
            }
            for (port, value) in &node.defaults {
                if node.input(port).is_some() && !point.inputs.contains_key(port) {
                    point.inputs.insert(
                        port.clone(),
                        InputSource::Literal {
                            value: value.clone(),
                        },
                    );
                }
            }
        }

        // 4. Enumerate deterministically and freeze the instances.
        points.sort_by(|a, b| self.point_sort_key(&a.index).cmp(&self.point_sort_key(&b.index)));

        let mut instances = Vec::with_capacity(points.len());
        let mut summary = Vec::with_capacity(points.len());
        for point in points {
            let state_index = StateIndex(self.ordered_assignments(&point.index));
            let id = InstanceId::derive(node.id, &state_index);
            summary.push((id.clone(), point.index));
            instances.push(NodeInstance {
                id,
                node_id: node.id,
                state_index,
                inputs: point.inputs,
            });
        }

        self.expansions
            .insert(node.id, NodeExpansion { instances: summary });

        Ok(instances)
    }

    fn eval_mapper(
        &mut self,
        node: &NodeDefinition,
        mapper: &Mapper,
        in_outer: bool,
    ) -> Result<Vec<Point>, ExpandError> {
        match mapper {
            Mapper::Axis {
                axis: AxisRef::Input { port },
            } => self.eval_input_axis(node, port),
            Mapper::Axis {
                axis: AxisRef::Node { node_id },
            } => self.eval_node_axis(node, *node_id, in_outer),
            Mapper::Zip { axes } => {
                if axes.is_empty() {
                    return Err(ExpandError::EmptyMapper { node_id: node.id });
                }
                let operands = axes
                    .iter()
                    .map(|m| self.eval_mapper(node, m, false))
                    .collect::<Result<Vec<_>, _>>()?;
                // An empty axis propagates emptiness instead of erroring.
                if operands.iter().any(Vec::is_empty) {
                    return Ok(Vec::new());
                }
                let lengths: Vec<usize> = operands.iter().map(Vec::len).collect();
                if lengths.windows(2).any(|w| w[0] != w[1]) {
                    return Err(ExpandError::ZipLengthMismatch {
                        node_id: node.id,
                        lengths,
                    });
                }
                let len = lengths[0];
                let mut zipped = Vec::with_capacity(len);
                for i in 0..len {
                    let mut merged = operands[0][i].clone();
                    for operand in &operands[1..] {
                        merged = merge_points(node.id, &merged, &operand[i])?;
                    }
                    zipped.push(merged);
                }
                Ok(zipped)
            }
            Mapper::Product { axes } => self.eval_cartesian(node, axes, false),
            Mapper::Outer { axes } => self.eval_cartesian(node, axes, true),
        }
    }

    fn eval_input_axis(
        &mut self,
        node: &NodeDefinition,
        port: &str,
    ) -> Result<Vec<Point>, ExpandError> {
        let values = node
            .defaults
            .get(port)
            .ok_or_else(|| ExpandError::MissingAxisValues {
                node_id: node.id,
                port: port.to_string(),
            })?;
        let arr = values.as_array().ok_or_else(|| ExpandError::AxisNotArray {
            node_id: node.id,
            port: port.to_string(),
        })?;

        let axis = AxisId::new(node.id, port);
        self.alloc_axis(&axis);

        Ok(arr
            .iter()
            .enumerate()
            .map(|(i, value)| Point {
                index: BTreeMap::from([(axis.clone(), i)]),
                bindings: vec![(port.to_string(), value.clone())],
                ..Default::default()
            })
            .collect())
    }

    fn eval_node_axis(
        &mut self,
        node: &NodeDefinition,
        source: NodeId,
        in_outer: bool,
    ) -> Result<Vec<Point>, ExpandError> {
        let combos: Vec<BTreeMap<AxisId, usize>> = self
            .expansions
            .get(&source)
            .map(|e| e.instances.iter().map(|(_, index)| index.clone()).collect())
            .ok_or(ExpandError::NodeNotUpstream {
                node_id: node.id,
                source_node_id: source,
            })?;

        if in_outer {
            // An explicit cross: a fresh axis over the upstream sibling set,
            // remembering which sibling each index selects.
            let short = &source.to_string()[..8];
            let axis = AxisId::new(node.id, format!("over_{short}"));
            self.alloc_axis(&axis);
            Ok(combos
                .into_iter()
                .enumerate()
                .map(|(i, combo)| Point {
                    index: BTreeMap::from([(axis.clone(), i)]),
                    selections: BTreeMap::from([(source, combo)]),
                    ..Default::default()
                })
                .collect())
        } else {
            // Positional alignment: carry the upstream axes directly so the
            // downstream point shares the upstream sibling's indices.
            Ok(combos
                .into_iter()
                .map(|combo| Point {
                    index: combo,
                    ..Default::default()
                })
                .collect())
        }
    }

    fn eval_cartesian(
        &mut self,
        node: &NodeDefinition,
        axes: &[Mapper],
        in_outer: bool,
    ) -> Result<Vec<Point>, ExpandError> {
        if axes.is_empty() {
            return Err(ExpandError::EmptyMapper { node_id: node.id });
        }
        let mut acc = vec![Point::default()];
        for operand in axes {
            let points = self.eval_mapper(node, operand, in_outer)?;
            let mut next = Vec::with_capacity(acc.len() * points.len());
            for left in &acc {
                for right in &points {
                    next.push(merge_points(node.id, left, right)?);
                }
            }
            acc = next;
        }
        Ok(acc)
    }

    fn join_single(&self, points: Vec<Point>, conn: &Connection) -> Vec<Point> {
        let parent = &self.expansions[&conn.from_node];
        let mut out = Vec::new();

        for point in points {
            let selection = point.selections.get(&conn.from_node).cloned();
            for (pid, pindex) in &parent.instances {
                let merged = match &selection {
                    Some(selection) => {
                        // The cross already chose a sibling; only that
                        // candidate matches, and its axes were replaced by
                        // the fresh cross axis, so none of them flow in.
                        if pindex != selection {
                            continue;
                        }
                        Some(point.index.clone())
                    }
                    None => try_merge_index(&point.index, pindex),
                };
                let Some(merged) = merged else { continue };

                let mut joined = point.clone();
                joined.index = merged;
                joined.inputs.insert(
                    conn.to_port.clone(),
                    InputSource::Upstream {
                        instance: pid.clone(),
                        port: conn.from_port.clone(),
                    },
                );
                out.push(joined);
            }
        }
        out
    }

    /// Join a gather port: every sibling instance of the fanned-out parent
    /// feeds one downstream instance, collapsing the parent's axes.
    fn join_gather(&self, points: Vec<Point>, conn: &Connection) -> Vec<Point> {
        let parent = &self.expansions[&conn.from_node];

        // An empty fan-out propagates emptiness through the gather.
        if parent.instances.is_empty() {
            return Vec::new();
        }

        let members: Vec<(InstanceId, String)> = parent
            .instances
            .iter()
            .map(|(pid, _)| (pid.clone(), conn.from_port.clone()))
            .collect();

        let mut out = Vec::new();
        for point in points {
            let mut joined = point.clone();
            joined.inputs.insert(
                conn.to_port.clone(),
                InputSource::Gather {
                    sources: members.clone(),
                },
            );
            out.push(joined);
        }
        out
    }
}

/// Union two axis assignments, or `None` if they disagree on a shared axis.
fn try_merge_index(
    a: &BTreeMap<AxisId, usize>,
    b: &BTreeMap<AxisId, usize>,
) -> Option<BTreeMap<AxisId, usize>> {
    let mut merged = a.clone();
    for (axis, idx) in b {
        match merged.get(axis) {
            Some(existing) if existing != idx => return None,
            _ => {
                merged.insert(axis.clone(), *idx);
            }
        }
    }
    Some(merged)
}

/// Merge two points inside one mapper combination.
///
/// Unlike [`try_merge_index`], a disagreement here is a definition error:
/// the mapper combined the same axis twice with different positions.
fn merge_points(node_id: NodeId, a: &Point, b: &Point) -> Result<Point, ExpandError> {
    let mut merged = a.clone();
    for (axis, idx) in &b.index {
        match merged.index.get(axis) {
            Some(existing) if existing != idx => {
                return Err(ExpandError::ConflictingAxes {
                    node_id,
                    axis: axis.clone(),
                });
            }
            _ => {
                merged.index.insert(axis.clone(), *idx);
            }
        }
    }
    for (port, value) in &b.bindings {
        if !merged.bindings.iter().any(|(p, _)| p == port) {
            merged.bindings.push((port.clone(), value.clone()));
        }
    }
    for (node, selection) in &b.selections {
        merged.selections.insert(*node, selection.clone());
    }
    Ok(merged)
}
