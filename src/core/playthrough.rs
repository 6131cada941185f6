/// Playthrough sampling — seeded walks over an expanded story graph.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core::expander::{Edge, EdgeLabel, ExpansionResult, PhysicalId};

/// One visited physical node and the edge label that led to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayStep {
    pub node: PhysicalId,
    /// `None` for the start node and for linear transitions.
    pub via: Option<EdgeLabel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayEnd {
    /// Reached a physical node with no outgoing edges.
    DeadEnd,
    /// Stopped after the step limit.
    StepLimit,
    /// The starting node does not exist.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playthrough {
    pub steps: Vec<PlayStep>,
    pub end: PlayEnd,
}

impl Playthrough {
    pub fn last(&self) -> Option<PhysicalId> {
        self.steps.last().map(|s| s.node)
    }

    /// Logical ids along the path, for display.
    pub fn logical_path<'r>(&self, result: &'r ExpansionResult) -> Vec<&'r str> {
        self.steps
            .iter()
            .filter_map(|s| result.node(s.node))
            .map(|n| n.logical_id.as_str())
            .collect()
    }
}

/// Pick one outgoing edge of `from` uniformly, as a playback device does
/// at random nodes.
pub fn pick_edge<'r, R: Rng + ?Sized>(
    result: &'r ExpansionResult,
    from: PhysicalId,
    rng: &mut R,
) -> Option<&'r Edge> {
    let edges: Vec<&Edge> = result.edges_from(from).collect();
    edges.choose(rng).copied()
}

/// Walk from physical node 0, choosing uniformly among outgoing edges,
/// for at most `max_steps` transitions.
pub fn play<R: Rng + ?Sized>(result: &ExpansionResult, rng: &mut R, max_steps: usize) -> Playthrough {
    match result.start() {
        Some(node) => play_from(result, node.physical_id, rng, max_steps),
        None => Playthrough {
            steps: Vec::new(),
            end: PlayEnd::Empty,
        },
    }
}

/// Like [`play`], but starting at an arbitrary physical node.
pub fn play_from<R: Rng + ?Sized>(
    result: &ExpansionResult,
    from: PhysicalId,
    rng: &mut R,
    max_steps: usize,
) -> Playthrough {
    if result.node(from).is_none() {
        return Playthrough {
            steps: Vec::new(),
            end: PlayEnd::Empty,
        };
    }

    let mut steps = vec![PlayStep {
        node: from,
        via: None,
    }];
    let mut current = from;

    for _ in 0..max_steps {
        match pick_edge(result, current, rng) {
            Some(edge) => {
                current = edge.target;
                steps.push(PlayStep {
                    node: current,
                    via: edge.label.clone(),
                });
            }
            None => {
                return Playthrough {
                    steps,
                    end: PlayEnd::DeadEnd,
                }
            }
        }
    }

    let end = if result.is_dead_end(current) {
        PlayEnd::DeadEnd
    } else {
        PlayEnd::StepLimit
    };
    Playthrough { steps, end }
}

/// [`play`] with a `StdRng` seeded from `seed`; same seed, same path.
pub fn play_seeded(result: &ExpansionResult, seed: u64, max_steps: usize) -> Playthrough {
    let mut rng = StdRng::seed_from_u64(seed);
    play(result, &mut rng, max_steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expander::{expand_story, ExpansionConfig};
    use crate::schema::story::{StoryDocument, StoryNode};

    fn fork() -> ExpansionResult {
        let doc = StoryDocument::new("fork", "a")
            .with_node(StoryNode::linear("a", Some("r")))
            .with_node(StoryNode::random("r", &["b", "c"]))
            .with_node(StoryNode::linear("b", None))
            .with_node(StoryNode::linear("c", None));
        expand_story(&doc, ExpansionConfig::default()).unwrap()
    }

    #[test]
    fn walk_ends_at_dead_end() {
        let result = fork();
        let p = play_seeded(&result, 7, 10);
        assert_eq!(p.end, PlayEnd::DeadEnd);
        assert_eq!(p.steps.len(), 3);
        assert_eq!(p.steps[0].via, None);
        assert_eq!(p.steps[2].via, Some(EdgeLabel::Random));
        let path = p.logical_path(&result);
        assert_eq!(&path[..2], &["a", "r"]);
        assert!(path[2] == "b" || path[2] == "c");
    }

    #[test]
    fn same_seed_same_path() {
        let result = fork();
        assert_eq!(play_seeded(&result, 42, 10), play_seeded(&result, 42, 10));
    }

    #[test]
    fn step_limit_on_cycles() {
        let doc = StoryDocument::new("loop", "a")
            .with_node(StoryNode::linear("a", Some("b")))
            .with_node(StoryNode::linear("b", Some("a")));
        let result = expand_story(&doc, ExpansionConfig::default()).unwrap();
        let p = play_seeded(&result, 1, 5);
        assert_eq!(p.end, PlayEnd::StepLimit);
        assert_eq!(p.steps.len(), 6);
        assert_eq!(p.last(), Some(PhysicalId(1)));
    }

    #[test]
    fn empty_result() {
        let result = ExpansionResult {
            physical_nodes: Vec::new(),
            edges: Vec::new(),
            unreachable_logical_ids: Vec::new(),
            dead_end_physical_ids: Vec::new(),
        };
        assert_eq!(play_seeded(&result, 0, 3).end, PlayEnd::Empty);
    }

    #[test]
    fn play_from_mid_graph() {
        let result = fork();
        let mut rng = StdRng::seed_from_u64(3);
        let p = play_from(&result, PhysicalId(1), &mut rng, 10);
        assert_eq!(p.steps[0].node, PhysicalId(1));
        assert_eq!(p.steps.len(), 2);
        assert_eq!(p.end, PlayEnd::DeadEnd);

        let p = play_from(&result, PhysicalId(99), &mut rng, 10);
        assert_eq!(p.end, PlayEnd::Empty);
    }
}
