/// Lantern Cave example — a small stateful adventure expanded into an
/// explicit story graph.
///
/// State: lamp oil (0..=3), whether the lantern is lit, and the
/// explorer's mood. The cave fork offers different exits depending on
/// the lantern; wandering in the dark is a random node.
///
/// Run with: cargo run --example lantern_cave

use story_expander::core::expander::{expand_story, ExpansionConfig};
use story_expander::core::playthrough::play_seeded;
use story_expander::schema::story::StoryDocument;

const STORY: &str = r#"
#![enable(implicit_some)]
(
    story: (
        id: "lantern_cave",
        start_node: "mouth",
        title: { "en": "The Lantern Cave" },
        version: "1.0",
    ),
    state: {
        "oil": Int(min: 0, max: 3, default: 2),
        "lantern": Bool,
        "mood": Enum(values: ["calm", "uneasy", "panicked"]),
    },
    nodes: [
        (
            id: "mouth",
            kind: Story(target: "fork"),
            text: "Cold air breathes out of the cave mouth.",
        ),
        (
            id: "fork",
            kind: Menu(choices: [
                (
                    id: "light",
                    target: "fork",
                    label: "Light the lantern",
                    guard: "not lantern and oil > 0",
                    effects: [
                        (variable: "lantern", op: Assign, value: true),
                        (variable: "oil", op: Decrement, value: 1),
                    ],
                ),
                (id: "descend", target: "depths", label: "Climb down", guard: "lantern"),
                (id: "wander", target: "dark", label: "Feel your way along the wall", guard: "not lantern"),
                (id: "leave", target: "outside", label: "Go back out"),
            ]),
            text: "The passage splits around a fallen stalactite.",
        ),
        (
            id: "dark",
            kind: Random(options: [(target: "fork"), (target: "echo")]),
        ),
        (
            id: "echo",
            kind: Branch(choices: [
                (
                    id: "steady",
                    target: "fork",
                    effects: [(variable: "mood", op: Assign, value: "uneasy")],
                ),
                (
                    id: "flee",
                    target: "mouth",
                    guard: "mood == 'uneasy'",
                    effects: [(variable: "mood", op: Assign, value: "panicked")],
                ),
            ]),
            text: "Something answers your footsteps.",
        ),
        (
            id: "depths",
            kind: Menu(choices: [
                (
                    id: "refill",
                    target: "depths",
                    label: "Refill from the old oil cask",
                    guard: "oil < 3",
                    effects: [(variable: "oil", op: Increment, value: 1)],
                ),
                (id: "onward", target: "chamber", label: "Press on"),
            ]),
        ),
        (id: "chamber", kind: Linear(target: None), text: "Crystals throw your light back a thousandfold."),
        (id: "outside", kind: Linear(target: None), text: "Daylight. Maybe another time."),
        (id: "sealed_door", kind: Linear(target: None), text: "Nobody has opened this in a century."),
    ],
)
"#;

fn main() {
    env_logger::init();

    let doc = StoryDocument::parse_ron(STORY).expect("Failed to parse lantern cave story");
    let result = expand_story(&doc, ExpansionConfig::default()).expect("Failed to expand story");

    println!("=== {} ===\n", doc.primary_title());

    let stats = result.stats();
    println!(
        "{} logical nodes -> {} physical nodes, {} edges\n",
        doc.nodes.len(),
        stats.physical_nodes,
        stats.edges
    );

    for node in &result.physical_nodes {
        let exits: Vec<String> = result
            .edges_from(node.physical_id)
            .map(|e| match &e.label {
                Some(label) => format!("{}:{}", label, e.target),
                None => e.target.to_string(),
            })
            .collect();
        println!(
            "{:>4} {:<8} {:<7} {}  -> [{}]",
            node.physical_id.to_string(),
            node.logical_id,
            node.kind.to_string(),
            node.state,
            exits.join(", ")
        );
    }

    println!("\nUnreachable: {:?}", result.unreachable_logical_ids);
    let endings: Vec<String> = result
        .dead_end_physical_ids
        .iter()
        .filter_map(|id| result.node(*id))
        .map(|n| format!("{} {}", n.physical_id, n.logical_id))
        .collect();
    println!("Endings:     {}", endings.join(", "));

    println!("\n--- Sample playthroughs ---");
    for seed in [1, 7, 1993] {
        let walk = play_seeded(&result, seed, 25);
        println!("seed {:>4}: {} ({:?})", seed, walk.logical_path(&result).join(" > "), walk.end);
    }
}
