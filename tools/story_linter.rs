/// Story Linter — validates and expands story files, reporting dead ends
/// and unreachable nodes.
///
/// Usage: story_linter <story.ron | story_dir> [--config <expansion.ron>] [--max-states <n>]

use story_expander::core::expander::{expand_story, ExpansionConfig, ExpansionResult};
use story_expander::schema::story::StoryDocument;
use std::path::{Path, PathBuf};
use std::process;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: story_linter <story.ron | story_dir> [--config <expansion.ron>] [--max-states <n>]");
        process::exit(0);
    }

    let story_path = Path::new(&args[1]);
    let mut config = ExpansionConfig::default();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                i += 1;
                match ExpansionConfig::load_from_ron(Path::new(&args[i])) {
                    Ok(c) => config = c,
                    Err(e) => {
                        eprintln!("ERROR: Failed to load config '{}': {}", args[i], e);
                        process::exit(1);
                    }
                }
            }
            "--max-states" if i + 1 < args.len() => {
                i += 1;
                match args[i].parse() {
                    Ok(n) => config.max_states = n,
                    Err(_) => {
                        eprintln!("ERROR: --max-states expects a number, got '{}'", args[i]);
                        process::exit(1);
                    }
                }
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                process::exit(1);
            }
        }
        i += 1;
    }

    let mut files = Vec::new();
    if story_path.is_file() {
        files.push(story_path.to_path_buf());
    } else if story_path.is_dir() {
        collect_stories(story_path, &mut files);
        files.sort();
    } else {
        eprintln!("ERROR: Path '{}' does not exist", story_path.display());
        process::exit(1);
    }

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for file in &files {
        lint_file(file, &config, &mut errors, &mut warnings);
    }

    println!("\n=== Story Lint Report ===\n");

    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &warnings {
        println!("WARNING: {}", warning);
    }

    for error in &errors {
        println!("ERROR: {}", error);
    }

    println!(
        "\nSummary: {} files, {} errors, {} warnings",
        files.len(),
        errors.len(),
        warnings.len()
    );

    if !errors.is_empty() {
        process::exit(1);
    }
}

fn collect_stories(dir: &Path, files: &mut Vec<PathBuf>) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                collect_stories(&path, files);
            } else if path.extension().and_then(|s| s.to_str()) == Some("ron") {
                files.push(path);
            }
        }
    }
}

fn lint_file(path: &Path, config: &ExpansionConfig, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let name = path.display();

    let doc = match StoryDocument::load_from_ron(path) {
        Ok(doc) => doc,
        Err(e) => {
            errors.push(format!("{}: {}", name, e));
            return;
        }
    };

    let result = match expand_story(&doc, config.clone()) {
        Ok(result) => result,
        Err(e) => {
            errors.push(format!("{}: {}", name, e));
            return;
        }
    };

    let stats = result.stats();
    println!(
        "  {} '{}': {} logical -> {} physical nodes, {} edges",
        name,
        doc.primary_title(),
        doc.nodes.len(),
        stats.physical_nodes,
        stats.edges
    );

    for id in &result.unreachable_logical_ids {
        warnings.push(format!("{}: node '{}' is unreachable", name, id));
    }

    for line in dead_end_report(&result) {
        warnings.push(format!("{}: {}", name, line));
    }
}

/// Dead ends at nodes authored with an exit are worth flagging; terminal
/// linear nodes are intended endings.
fn dead_end_report(result: &ExpansionResult) -> Vec<String> {
    result
        .dead_end_physical_ids
        .iter()
        .filter_map(|id| result.node(*id))
        .filter(|node| node.kind != story_expander::schema::story::NodeKindTag::Linear)
        .map(|node| {
            format!(
                "node '{}' is a dead end in state {} (all choices closed)",
                node.logical_id, node.state
            )
        })
        .collect()
}
