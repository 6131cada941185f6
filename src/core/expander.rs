/// The story expander: logical story graph × typed state → physical graph.
///
/// Breadth-first traversal of `(logical node, state snapshot)` pairs
/// reachable from the start. Each distinct pair becomes exactly one
/// physical node; ids are handed out in discovery order, so a given
/// document always expands to the same ids and the same edge order.

use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::core::effect::{EffectApplier, EffectError};
use crate::core::guard::{GuardError, GuardEvaluator};
use crate::core::initial::build_initial_state;
use crate::schema::snapshot::StateSnapshot;
use crate::schema::state::SchemaError;
use crate::schema::story::{NodeKind, NodeKindTag, StoryDocument, StoryNode};

pub const DEFAULT_MAX_STATES: usize = 5000;

#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("start node '{0}' does not exist")]
    InvalidStart(String),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("guard error in node '{node}', choice '{choice}' ({expression}): {source}")]
    Guard {
        node: String,
        choice: String,
        expression: String,
        #[source]
        source: GuardError,
    },
    #[error("effect error in node '{node}', choice '{choice}': {source}")]
    Effect {
        node: String,
        choice: String,
        #[source]
        source: EffectError,
    },
    #[error("node '{node}' references unknown target '{target}'")]
    UnknownTarget { node: String, target: String },
    #[error("random node '{node}' has no options")]
    NoRandomOptions { node: String },
    #[error("expansion reached the cap of {cap} physical nodes")]
    StateCapExceeded { cap: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Expansion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    /// Hard ceiling on materialized physical nodes.
    pub max_states: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            max_states: DEFAULT_MAX_STATES,
        }
    }
}

impl ExpansionConfig {
    pub fn with_max_states(max_states: usize) -> Self {
        Self { max_states }
    }

    pub fn load_from_ron(path: &Path) -> Result<ExpansionConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<ExpansionConfig, ConfigError> {
        Ok(ron::from_str(input)?)
    }
}

/// Newtype wrapper for physical node ids. Ids are dense and start at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhysicalId(pub usize);

impl fmt::Display for PhysicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What an edge was produced by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeLabel {
    /// The id of the choice taken.
    Choice(String),
    /// One option of a random node.
    Random,
}

impl EdgeLabel {
    pub fn as_str(&self) -> &str {
        match self {
            EdgeLabel::Choice(id) => id,
            EdgeLabel::Random => "random",
        }
    }
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete, state-specific materialization of a logical node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalNode {
    pub physical_id: PhysicalId,
    pub logical_id: String,
    pub kind: NodeKindTag,
    pub state: StateSnapshot,
    /// Targets in transition-emission order.
    pub outgoing: Vec<PhysicalId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: PhysicalId,
    pub target: PhysicalId,
    pub label: Option<EdgeLabel>,
}

/// Summary counts over an [`ExpansionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExpansionStats {
    pub physical_nodes: usize,
    pub edges: usize,
    pub dead_ends: usize,
    pub unreachable: usize,
    /// Physical node count per logical id.
    pub per_logical: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionResult {
    /// Ordered by ascending physical id; `physical_nodes[i].physical_id == PhysicalId(i)`.
    pub physical_nodes: Vec<PhysicalNode>,
    pub edges: Vec<Edge>,
    /// Declared logical nodes never materialized, in declaration order.
    pub unreachable_logical_ids: Vec<String>,
    /// Physical nodes without outgoing edges, ascending.
    pub dead_end_physical_ids: Vec<PhysicalId>,
}

impl ExpansionResult {
    pub fn start(&self) -> Option<&PhysicalNode> {
        self.physical_nodes.first()
    }

    pub fn node(&self, id: PhysicalId) -> Option<&PhysicalNode> {
        self.physical_nodes.get(id.0)
    }

    /// All physical materializations of one logical node.
    pub fn nodes_for<'r>(&'r self, logical_id: &'r str) -> impl Iterator<Item = &'r PhysicalNode> + 'r {
        self.physical_nodes
            .iter()
            .filter(move |n| n.logical_id == logical_id)
    }

    /// Outgoing edges of `id`, in emission order.
    pub fn edges_from(&self, id: PhysicalId) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.iter().filter(move |e| e.source == id)
    }

    pub fn is_dead_end(&self, id: PhysicalId) -> bool {
        self.node(id).is_some_and(|n| n.outgoing.is_empty())
    }

    pub fn stats(&self) -> ExpansionStats {
        let mut per_logical = BTreeMap::new();
        for node in &self.physical_nodes {
            *per_logical.entry(node.logical_id.clone()).or_insert(0) += 1;
        }
        ExpansionStats {
            physical_nodes: self.physical_nodes.len(),
            edges: self.edges.len(),
            dead_ends: self.dead_end_physical_ids.len(),
            unreachable: self.unreachable_logical_ids.len(),
            per_logical,
        }
    }
}

/// A transition out of one physical node, before its target is resolved.
struct Transition<'a> {
    target: &'a str,
    label: Option<EdgeLabel>,
    state: StateSnapshot,
}

/// Expands one story document. Holds only borrowed, read-only data; all
/// per-run state lives inside [`Expander::expand`].
pub struct Expander<'a> {
    doc: &'a StoryDocument,
    config: ExpansionConfig,
    nodes: FxHashMap<&'a str, &'a StoryNode>,
}

impl<'a> Expander<'a> {
    pub fn new(doc: &'a StoryDocument, config: ExpansionConfig) -> Self {
        let nodes = doc.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        Self { doc, config, nodes }
    }

    pub fn expand(&self) -> Result<ExpansionResult, ExpansionError> {
        let start_id = self.doc.story.start_node.as_str();
        let start = self
            .nodes
            .get(start_id)
            .copied()
            .ok_or_else(|| ExpansionError::InvalidStart(start_id.to_string()))?;

        let initial = build_initial_state(&self.doc.state, self.doc.story.default_override.as_ref())?;
        debug!(
            "expanding story '{}' from '{}' (max_states = {})",
            self.doc.story.id, start.id, self.config.max_states
        );

        let mut guards = GuardEvaluator::new();
        let effects = EffectApplier::new(&self.doc.state);

        let mut assigned: FxHashMap<(&'a str, StateSnapshot), PhysicalId> = FxHashMap::default();
        let mut queue: VecDeque<(&'a StoryNode, StateSnapshot, PhysicalId)> = VecDeque::new();
        let mut physical: Vec<PhysicalNode> = Vec::new();
        let mut edges: Vec<Edge> = Vec::new();

        assigned.insert((start.id.as_str(), initial.clone()), PhysicalId(0));
        queue.push_back((start, initial, PhysicalId(0)));
        let mut next_id = 1;

        while let Some((node, state, pid)) = queue.pop_front() {
            if pid.0 < physical.len() {
                continue;
            }
            if physical.len() >= self.config.max_states {
                return Err(ExpansionError::StateCapExceeded {
                    cap: self.config.max_states,
                });
            }

            trace!("materialize {} = ({}, {})", pid, node.id, state);

            let transitions = self.transitions(node, &state, &mut guards, &effects)?;
            let mut outgoing = Vec::with_capacity(transitions.len());

            for transition in transitions {
                let target = self.nodes.get(transition.target).copied().ok_or_else(|| {
                    ExpansionError::UnknownTarget {
                        node: node.id.clone(),
                        target: transition.target.to_string(),
                    }
                })?;

                let target_pid = match assigned.entry((target.id.as_str(), transition.state)) {
                    Entry::Occupied(entry) => *entry.get(),
                    Entry::Vacant(entry) => {
                        let id = PhysicalId(next_id);
                        next_id += 1;
                        queue.push_back((target, entry.key().1.clone(), id));
                        entry.insert(id);
                        id
                    }
                };

                edges.push(Edge {
                    source: pid,
                    target: target_pid,
                    label: transition.label,
                });
                outgoing.push(target_pid);
            }

            physical.push(PhysicalNode {
                physical_id: pid,
                logical_id: node.id.clone(),
                kind: node.kind.tag(),
                state,
                outgoing,
            });
        }

        let reached: FxHashSet<&str> = physical.iter().map(|n| n.logical_id.as_str()).collect();
        let mut listed = FxHashSet::default();
        let unreachable_logical_ids: Vec<String> = self
            .doc
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| !reached.contains(id) && listed.insert(*id))
            .map(|id| id.to_string())
            .collect();
        let dead_end_physical_ids: Vec<PhysicalId> = physical
            .iter()
            .filter(|n| n.outgoing.is_empty())
            .map(|n| n.physical_id)
            .collect();

        debug!(
            "expanded '{}': {} physical nodes, {} edges, {} dead ends, {} unreachable ({} guards parsed)",
            self.doc.story.id,
            physical.len(),
            edges.len(),
            dead_end_physical_ids.len(),
            unreachable_logical_ids.len(),
            guards.cached()
        );
        for id in &unreachable_logical_ids {
            debug!("unreachable logical node '{}'", id);
        }

        Ok(ExpansionResult {
            physical_nodes: physical,
            edges,
            unreachable_logical_ids,
            dead_end_physical_ids,
        })
    }

    fn transitions(
        &self,
        node: &'a StoryNode,
        state: &StateSnapshot,
        guards: &mut GuardEvaluator,
        effects: &EffectApplier<'_>,
    ) -> Result<Vec<Transition<'a>>, ExpansionError> {
        match &node.kind {
            NodeKind::Linear { target } => Ok(target
                .iter()
                .map(|t| Transition {
                    target: t.as_str(),
                    label: None,
                    state: state.clone(),
                })
                .collect()),
            NodeKind::Choice { choices } => {
                let mut out = Vec::with_capacity(choices.len());
                for choice in choices {
                    let open = guards
                        .evaluate(choice.guard.as_deref(), state)
                        .map_err(|source| ExpansionError::Guard {
                            node: node.id.clone(),
                            choice: choice.id.clone(),
                            expression: choice.guard.clone().unwrap_or_default(),
                            source,
                        })?;
                    if !open {
                        continue;
                    }
                    let next = effects
                        .apply(&choice.effects, state)
                        .map_err(|source| ExpansionError::Effect {
                            node: node.id.clone(),
                            choice: choice.id.clone(),
                            source,
                        })?;
                    out.push(Transition {
                        target: choice.target.as_str(),
                        label: Some(EdgeLabel::Choice(choice.id.clone())),
                        state: next,
                    });
                }
                Ok(out)
            }
            NodeKind::Random { options } => {
                if options.is_empty() {
                    return Err(ExpansionError::NoRandomOptions {
                        node: node.id.clone(),
                    });
                }
                Ok(options
                    .iter()
                    .map(|o| Transition {
                        target: o.target.as_str(),
                        label: Some(EdgeLabel::Random),
                        state: state.clone(),
                    })
                    .collect())
            }
        }
    }
}

/// Expand `doc` with `config`. All-or-nothing: any error means no result.
pub fn expand_story(doc: &StoryDocument, config: ExpansionConfig) -> Result<ExpansionResult, ExpansionError> {
    Expander::new(doc, config).expand()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::state::{StateSchema, Value, VariableDecl};
    use crate::schema::story::{Choice, Effect};

    fn expand(doc: &StoryDocument) -> Result<ExpansionResult, ExpansionError> {
        expand_story(doc, ExpansionConfig::default())
    }

    #[test]
    fn linear_two_nodes() {
        let doc = StoryDocument::new("linear", "a")
            .with_node(StoryNode::linear("a", Some("b")))
            .with_node(StoryNode::linear("b", None));
        let result = expand(&doc).unwrap();

        assert_eq!(result.physical_nodes.len(), 2);
        assert_eq!(
            result.edges,
            vec![Edge { source: PhysicalId(0), target: PhysicalId(1), label: None }]
        );
        assert_eq!(result.dead_end_physical_ids, vec![PhysicalId(1)]);
        assert!(result.unreachable_logical_ids.is_empty());
        assert_eq!(result.physical_nodes[1].logical_id, "b");
    }

    #[test]
    fn closed_guard_leaves_target_unreachable() {
        let doc = StoryDocument::new("guarded", "a")
            .with_state(StateSchema::new().with("key", VariableDecl::Bool))
            .with_node(StoryNode::choice(
                "a",
                vec![Choice::new("go", "b").with_guard("key == true")],
            ))
            .with_node(StoryNode::linear("b", None));
        let result = expand(&doc).unwrap();

        assert_eq!(result.physical_nodes.len(), 1);
        assert!(result.physical_nodes[0].outgoing.is_empty());
        assert!(result.edges.is_empty());
        assert_eq!(result.unreachable_logical_ids, vec!["b".to_string()]);
        assert_eq!(result.dead_end_physical_ids, vec![PhysicalId(0)]);
    }

    #[test]
    fn random_options_all_taken() {
        let doc = StoryDocument::new("random", "a")
            .with_node(StoryNode::random("a", &["b", "c", "d"]))
            .with_node(StoryNode::linear("b", None))
            .with_node(StoryNode::linear("c", None))
            .with_node(StoryNode::linear("d", None));
        let result = expand(&doc).unwrap();

        assert_eq!(result.physical_nodes.len(), 4);
        assert_eq!(result.edges.len(), 3);
        assert!(result
            .edges
            .iter()
            .all(|e| e.source == PhysicalId(0) && e.label == Some(EdgeLabel::Random)));
        assert_eq!(
            result.physical_nodes[0].outgoing,
            vec![PhysicalId(1), PhysicalId(2), PhysicalId(3)]
        );
    }

    #[test]
    fn same_state_paths_collapse() {
        // a -> {left, right} -> join, with no state change: one join node
        let doc = StoryDocument::new("diamond", "a")
            .with_node(StoryNode::choice(
                "a",
                vec![Choice::new("l", "left"), Choice::new("r", "right")],
            ))
            .with_node(StoryNode::linear("left", Some("join")))
            .with_node(StoryNode::linear("right", Some("join")))
            .with_node(StoryNode::linear("join", None));
        let result = expand(&doc).unwrap();

        let joins: Vec<_> = result.nodes_for("join").collect();
        assert_eq!(joins.len(), 1);
        let join = joins[0].physical_id;
        assert_eq!(result.node(PhysicalId(1)).unwrap().outgoing, vec![join]);
        assert_eq!(result.node(PhysicalId(2)).unwrap().outgoing, vec![join]);
    }

    #[test]
    fn cycle_with_same_state_terminates() {
        let doc = StoryDocument::new("loop", "a")
            .with_node(StoryNode::linear("a", Some("b")))
            .with_node(StoryNode::linear("b", Some("a")));
        let result = expand(&doc).unwrap();
        assert_eq!(result.physical_nodes.len(), 2);
        assert_eq!(result.physical_nodes[1].outgoing, vec![PhysicalId(0)]);
        assert!(result.dead_end_physical_ids.is_empty());
    }

    #[test]
    fn distinct_states_make_distinct_physical_nodes() {
        let doc = StoryDocument::new("keys", "hall")
            .with_state(StateSchema::new().with("key", VariableDecl::Bool))
            .with_node(StoryNode::choice(
                "hall",
                vec![
                    Choice::new("take", "hall")
                        .with_guard("not key")
                        .with_effect(Effect::assign("key", true)),
                    Choice::new("open", "end").with_guard("key"),
                ],
            ))
            .with_node(StoryNode::linear("end", None));
        let result = expand(&doc).unwrap();

        let halls: Vec<_> = result.nodes_for("hall").collect();
        assert_eq!(halls.len(), 2);
        assert_eq!(halls[0].state.get("key"), Some(&Value::Bool(false)));
        assert_eq!(halls[1].state.get("key"), Some(&Value::Bool(true)));
        assert_eq!(result.nodes_for("end").count(), 1);
    }

    #[test]
    fn choice_order_is_emission_order() {
        let doc = StoryDocument::new("order", "a")
            .with_node(StoryNode::choice(
                "a",
                vec![Choice::new("z", "c"), Choice::new("y", "b")],
            ))
            .with_node(StoryNode::linear("b", None))
            .with_node(StoryNode::linear("c", None));
        let result = expand(&doc).unwrap();
        let labels: Vec<_> = result
            .edges_from(PhysicalId(0))
            .map(|e| e.label.as_ref().map(|l| l.as_str().to_string()))
            .collect();
        assert_eq!(labels, vec![Some("z".to_string()), Some("y".to_string())]);
        assert_eq!(result.node(PhysicalId(1)).unwrap().logical_id, "c");
    }

    #[test]
    fn invalid_start() {
        let doc = StoryDocument::new("bad", "nowhere").with_node(StoryNode::linear("a", None));
        assert!(matches!(expand(&doc), Err(ExpansionError::InvalidStart(s)) if s == "nowhere"));
    }

    #[test]
    fn unknown_target_aborts() {
        let doc = StoryDocument::new("bad", "a").with_node(StoryNode::linear("a", Some("ghost")));
        assert!(matches!(
            expand(&doc),
            Err(ExpansionError::UnknownTarget { node, target }) if node == "a" && target == "ghost"
        ));
    }

    #[test]
    fn empty_random_aborts() {
        let doc = StoryDocument::new("bad", "a").with_node(StoryNode::random("a", &[]));
        assert!(matches!(
            expand(&doc),
            Err(ExpansionError::NoRandomOptions { node }) if node == "a"
        ));
    }

    #[test]
    fn guard_error_names_node_and_choice() {
        let doc = StoryDocument::new("bad", "a")
            .with_node(StoryNode::choice(
                "a",
                vec![Choice::new("go", "b").with_guard("missing > 0")],
            ))
            .with_node(StoryNode::linear("b", None));
        match expand(&doc) {
            Err(ExpansionError::Guard { node, choice, expression, source }) => {
                assert_eq!(node, "a");
                assert_eq!(choice, "go");
                assert_eq!(expression, "missing > 0");
                assert_eq!(source, GuardError::UnknownVariable("missing".to_string()));
            }
            other => panic!("expected guard error, got {:?}", other),
        }
    }

    #[test]
    fn effect_error_aborts() {
        let doc = StoryDocument::new("bad", "a")
            .with_state(StateSchema::new().with("hp", VariableDecl::Int { min: 0, max: 3, default: Some(3) }))
            .with_node(StoryNode::choice(
                "a",
                vec![Choice::new("hurt", "b").with_effect(Effect::decrement("hp", 10))],
            ))
            .with_node(StoryNode::linear("b", None));
        assert!(matches!(
            expand(&doc),
            Err(ExpansionError::Effect { source: EffectError::OutOfBounds { .. }, .. })
        ));
    }

    #[test]
    fn cap_is_a_hard_failure() {
        let doc = StoryDocument::new("counter", "a")
            .with_state(StateSchema::new().with("n", VariableDecl::Int { min: 0, max: 100, default: None }))
            .with_node(StoryNode::choice(
                "a",
                vec![Choice::new("tick", "a")
                    .with_guard("n < 100")
                    .with_effect(Effect::increment("n", 1))],
            ));
        assert!(matches!(
            expand_story(&doc, ExpansionConfig::with_max_states(10)),
            Err(ExpansionError::StateCapExceeded { cap: 10 })
        ));
        // n = 0..=100, the last one a dead end
        let result = expand(&doc).unwrap();
        assert_eq!(result.physical_nodes.len(), 101);
        assert_eq!(result.dead_end_physical_ids, vec![PhysicalId(100)]);
    }

    #[test]
    fn stats_count_per_logical() {
        let doc = StoryDocument::new("keys", "a")
            .with_state(StateSchema::new().with("key", VariableDecl::Bool))
            .with_node(StoryNode::choice(
                "a",
                vec![
                    Choice::new("with", "b").with_effect(Effect::assign("key", true)),
                    Choice::new("without", "b"),
                ],
            ))
            .with_node(StoryNode::linear("b", None));
        let stats = expand(&doc).unwrap().stats();
        assert_eq!(stats.physical_nodes, 3);
        assert_eq!(stats.edges, 2);
        assert_eq!(stats.dead_ends, 2);
        assert_eq!(stats.per_logical.get("b"), Some(&2));
    }

    #[test]
    fn config_from_ron() {
        assert_eq!(
            ExpansionConfig::parse_ron("(max_states: 12)").unwrap(),
            ExpansionConfig::with_max_states(12)
        );
        assert_eq!(ExpansionConfig::parse_ron("()").unwrap(), ExpansionConfig::default());
    }
}
