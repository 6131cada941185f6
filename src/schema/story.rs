/// Story document — logical nodes, choices, effects, and document loading.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::core::effect::{check_effect, EffectError};
use crate::core::guard::{Guard, GuardError};
use crate::schema::state::{SchemaError, StateSchema, Value};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),
    #[error("node '{node}' has duplicate choice id '{choice}'")]
    DuplicateChoice { node: String, choice: String },
    #[error("node '{node}' references unknown target '{target}'")]
    UnknownTarget { node: String, target: String },
    #[error("start node '{0}' is not declared")]
    UnknownStart(String),
    #[error("choice node '{0}' must define at least one choice")]
    EmptyChoices(String),
    #[error("random node '{0}' must define at least one option")]
    NoRandomOptions(String),
    #[error("node '{node}', choice '{choice}': {source}")]
    InvalidGuard {
        node: String,
        choice: String,
        #[source]
        source: GuardError,
    },
    #[error("node '{node}', choice '{choice}': {source}")]
    InvalidEffect {
        node: String,
        choice: String,
        #[source]
        source: EffectError,
    },
}

/// How an effect mutates its variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectOp {
    Assign,
    Increment,
    Decrement,
}

impl fmt::Display for EffectOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            EffectOp::Assign => "=",
            EffectOp::Increment => "+=",
            EffectOp::Decrement => "-=",
        };
        f.write_str(symbol)
    }
}

/// A typed mutation applied when a choice is taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effect {
    pub variable: String,
    pub op: EffectOp,
    pub value: Value,
}

impl Effect {
    pub fn assign(variable: &str, value: impl Into<Value>) -> Self {
        Self {
            variable: variable.to_string(),
            op: EffectOp::Assign,
            value: value.into(),
        }
    }

    pub fn increment(variable: &str, by: i64) -> Self {
        Self {
            variable: variable.to_string(),
            op: EffectOp::Increment,
            value: Value::Int(by),
        }
    }

    pub fn decrement(variable: &str, by: i64) -> Self {
        Self {
            variable: variable.to_string(),
            op: EffectOp::Decrement,
            value: Value::Int(by),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.variable, self.op, self.value)
    }
}

/// One selectable option of a choice node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub target: String,
    /// Display text for the option, if the author provided one.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub guard: Option<String>,
    #[serde(default)]
    pub effects: Vec<Effect>,
}

impl Choice {
    pub fn new(id: &str, target: &str) -> Self {
        Self {
            id: id.to_string(),
            target: target.to_string(),
            label: None,
            guard: None,
            effects: Vec::new(),
        }
    }

    pub fn with_guard(mut self, guard: &str) -> Self {
        self.guard = Some(guard.to_string());
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomOption {
    pub target: String,
}

/// The behavior of a logical node.
///
/// `Menu` and `Branch` in story files both load as [`NodeKind::Choice`];
/// the difference between them is presentational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(alias = "Story")]
    Linear {
        #[serde(default)]
        target: Option<String>,
    },
    #[serde(alias = "Menu", alias = "Branch")]
    Choice { choices: Vec<Choice> },
    Random { options: Vec<RandomOption> },
}

/// Field-less tag of a [`NodeKind`], carried by physical nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKindTag {
    Linear,
    Choice,
    Random,
}

impl NodeKind {
    pub fn tag(&self) -> NodeKindTag {
        match self {
            NodeKind::Linear { .. } => NodeKindTag::Linear,
            NodeKind::Choice { .. } => NodeKindTag::Choice,
            NodeKind::Random { .. } => NodeKindTag::Random,
        }
    }

    /// Every target id this node can lead to, in declared order.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            NodeKind::Linear { target } => target.iter().map(|t| t.as_str()).collect(),
            NodeKind::Choice { choices } => choices.iter().map(|c| c.target.as_str()).collect(),
            NodeKind::Random { options } => options.iter().map(|o| o.target.as_str()).collect(),
        }
    }
}

impl fmt::Display for NodeKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKindTag::Linear => "linear",
            NodeKindTag::Choice => "choice",
            NodeKindTag::Random => "random",
        };
        f.write_str(name)
    }
}

/// An author-declared narrative unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryNode {
    pub id: String,
    pub kind: NodeKind,
    /// Narration shown or read at this node.
    #[serde(default)]
    pub text: Option<String>,
}

impl StoryNode {
    pub fn linear(id: &str, target: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            kind: NodeKind::Linear {
                target: target.map(|t| t.to_string()),
            },
            text: None,
        }
    }

    pub fn choice(id: &str, choices: Vec<Choice>) -> Self {
        Self {
            id: id.to_string(),
            kind: NodeKind::Choice { choices },
            text: None,
        }
    }

    pub fn random(id: &str, targets: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            kind: NodeKind::Random {
                options: targets
                    .iter()
                    .map(|t| RandomOption {
                        target: t.to_string(),
                    })
                    .collect(),
            },
            text: None,
        }
    }
}

/// Document-level starting value for one integer variable that has no
/// declared default of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultOverride {
    pub variable: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryMetadata {
    pub id: String,
    pub start_node: String,
    /// Titles keyed by language code.
    #[serde(default)]
    pub title: BTreeMap<String, String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub default_override: Option<DefaultOverride>,
}

/// A complete branching story: metadata, typed state, and logical nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryDocument {
    pub story: StoryMetadata,
    #[serde(default)]
    pub state: StateSchema,
    pub nodes: Vec<StoryNode>,
}

impl StoryDocument {
    pub fn new(id: &str, start_node: &str) -> Self {
        Self {
            story: StoryMetadata {
                id: id.to_string(),
                start_node: start_node.to_string(),
                title: BTreeMap::new(),
                version: None,
                default_override: None,
            },
            state: StateSchema::new(),
            nodes: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: StateSchema) -> Self {
        self.state = state;
        self
    }

    pub fn with_node(mut self, node: StoryNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Load and validate a story from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<StoryDocument, DocumentError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse and validate a story from a RON string.
    pub fn parse_ron(input: &str) -> Result<StoryDocument, DocumentError> {
        let doc: StoryDocument = ron::from_str(input)?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn node(&self, id: &str) -> Option<&StoryNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// First title in language-code order, falling back to the story id.
    pub fn primary_title(&self) -> &str {
        self.story
            .title
            .values()
            .next()
            .map(|t| t.as_str())
            .unwrap_or(&self.story.id)
    }

    /// Structural validation: declarations, node and choice identity,
    /// references, and static guard/effect checks against the schema.
    pub fn validate(&self) -> Result<(), DocumentError> {
        self.state.validate()?;
        if let Some(ov) = &self.story.default_override {
            crate::core::initial::check_override(&self.state, ov)?;
        }

        let mut ids = FxHashSet::default();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(DocumentError::DuplicateNode(node.id.clone()));
            }
        }

        for node in &self.nodes {
            match &node.kind {
                NodeKind::Choice { choices } => {
                    if choices.is_empty() {
                        return Err(DocumentError::EmptyChoices(node.id.clone()));
                    }
                    let mut choice_ids = FxHashSet::default();
                    for choice in choices {
                        if !choice_ids.insert(choice.id.as_str()) {
                            return Err(DocumentError::DuplicateChoice {
                                node: node.id.clone(),
                                choice: choice.id.clone(),
                            });
                        }
                        self.validate_choice(node, choice)?;
                    }
                }
                NodeKind::Random { options } if options.is_empty() => {
                    return Err(DocumentError::NoRandomOptions(node.id.clone()));
                }
                _ => {}
            }

            for target in node.kind.targets() {
                if !ids.contains(target) {
                    return Err(DocumentError::UnknownTarget {
                        node: node.id.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        if !ids.contains(self.story.start_node.as_str()) {
            return Err(DocumentError::UnknownStart(self.story.start_node.clone()));
        }

        Ok(())
    }

    fn validate_choice(&self, node: &StoryNode, choice: &Choice) -> Result<(), DocumentError> {
        let guard_error = |source: GuardError| DocumentError::InvalidGuard {
            node: node.id.clone(),
            choice: choice.id.clone(),
            source,
        };
        if let Some(expr) = choice.guard.as_deref().filter(|g| !g.trim().is_empty()) {
            let guard = Guard::parse(expr).map_err(guard_error)?;
            guard.check_variables(&self.state).map_err(guard_error)?;
        }

        for effect in &choice.effects {
            check_effect(&self.state, effect).map_err(|source| DocumentError::InvalidEffect {
                node: node.id.clone(),
                choice: choice.id.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::state::VariableDecl;

    fn base() -> StoryDocument {
        StoryDocument::new("test", "start")
            .with_state(StateSchema::new().with("key", VariableDecl::Bool))
            .with_node(StoryNode::choice(
                "start",
                vec![Choice::new("go", "end").with_guard("key == true")],
            ))
            .with_node(StoryNode::linear("end", None))
    }

    #[test]
    fn valid_document_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn duplicate_node_rejected() {
        let doc = base().with_node(StoryNode::linear("end", None));
        assert!(matches!(doc.validate(), Err(DocumentError::DuplicateNode(id)) if id == "end"));
    }

    #[test]
    fn duplicate_choice_rejected() {
        let doc = StoryDocument::new("test", "start")
            .with_node(StoryNode::choice(
                "start",
                vec![Choice::new("go", "end"), Choice::new("go", "end")],
            ))
            .with_node(StoryNode::linear("end", None));
        assert!(matches!(
            doc.validate(),
            Err(DocumentError::DuplicateChoice { choice, .. }) if choice == "go"
        ));
    }

    #[test]
    fn unknown_target_rejected() {
        let doc = StoryDocument::new("test", "start")
            .with_node(StoryNode::linear("start", Some("missing")));
        assert!(matches!(
            doc.validate(),
            Err(DocumentError::UnknownTarget { target, .. }) if target == "missing"
        ));
    }

    #[test]
    fn unknown_start_rejected() {
        let doc = StoryDocument::new("test", "nowhere").with_node(StoryNode::linear("a", None));
        assert!(matches!(doc.validate(), Err(DocumentError::UnknownStart(_))));
    }

    #[test]
    fn empty_choices_and_options_rejected() {
        let doc = StoryDocument::new("test", "a").with_node(StoryNode::choice("a", vec![]));
        assert!(matches!(doc.validate(), Err(DocumentError::EmptyChoices(_))));

        let doc = StoryDocument::new("test", "a").with_node(StoryNode::random("a", &[]));
        assert!(matches!(doc.validate(), Err(DocumentError::NoRandomOptions(_))));
    }

    #[test]
    fn guard_with_undeclared_variable_rejected() {
        let doc = StoryDocument::new("test", "start")
            .with_node(StoryNode::choice(
                "start",
                vec![Choice::new("go", "end").with_guard("missing > 0")],
            ))
            .with_node(StoryNode::linear("end", None));
        assert!(matches!(
            doc.validate(),
            Err(DocumentError::InvalidGuard {
                source: GuardError::UnknownVariable(_),
                ..
            })
        ));
    }

    #[test]
    fn effect_on_bool_with_increment_rejected() {
        let doc = StoryDocument::new("test", "start")
            .with_state(StateSchema::new().with("key", VariableDecl::Bool))
            .with_node(StoryNode::choice(
                "start",
                vec![Choice::new("go", "end").with_effect(Effect::increment("key", 1))],
            ))
            .with_node(StoryNode::linear("end", None));
        assert!(matches!(
            doc.validate(),
            Err(DocumentError::InvalidEffect {
                source: EffectError::TypeMismatch { .. },
                ..
            })
        ));
    }

    #[test]
    fn menu_and_branch_load_as_choice() {
        let input = r#"
            #![enable(implicit_some)]
            (
                story: (id: "aliases", start_node: "a"),
                nodes: [
                    (id: "a", kind: Menu(choices: [(id: "x", target: "b")])),
                    (id: "b", kind: Branch(choices: [(id: "y", target: "c")])),
                    (id: "c", kind: Story(target: None)),
                ],
            )
        "#;
        let doc = StoryDocument::parse_ron(input).unwrap();
        assert_eq!(doc.nodes[0].kind.tag(), NodeKindTag::Choice);
        assert_eq!(doc.nodes[1].kind.tag(), NodeKindTag::Choice);
        assert_eq!(doc.nodes[2].kind.tag(), NodeKindTag::Linear);
    }

    #[test]
    fn primary_title_falls_back_to_id() {
        let mut doc = base();
        assert_eq!(doc.primary_title(), "test");
        doc.story.title.insert("en".to_string(), "The Door".to_string());
        assert_eq!(doc.primary_title(), "The Door");
    }
}
