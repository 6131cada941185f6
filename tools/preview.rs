/// Preview — interactive shell for stepping through an expanded story the
/// way a stateless playback device would.
///
/// Usage: preview <story.ron> [--seed <n>] [--max-states <n>]
///
/// Commands:
///   show      — current physical node, its state and exits
///   go <n>    — follow exit number n
///   random    — follow a uniformly chosen exit
///   walk <n>  — take up to n random steps
///   seed <n>  — reseed the RNG
///   reset     — back to the start node
///   stats     — expansion summary
///   help      — list commands
///   quit      — exit

use rand::rngs::StdRng;
use rand::SeedableRng;
use story_expander::core::expander::{expand_story, ExpansionConfig, ExpansionResult, PhysicalId};
use story_expander::core::playthrough::{pick_edge, play_from, PlayEnd};
use story_expander::schema::story::StoryDocument;
use std::io::{self, BufRead, Write};
use std::path::Path;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let story_path = args[1].clone();
    let mut seed: u64 = 42;
    let mut config = ExpansionConfig::default();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" if i + 1 < args.len() => {
                i += 1;
                seed = args[i].parse().unwrap_or(42);
            }
            "--max-states" if i + 1 < args.len() => {
                i += 1;
                config.max_states = args[i].parse().unwrap_or(config.max_states);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let doc = match StoryDocument::load_from_ron(Path::new(&story_path)) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("ERROR: Failed to load story: {}", e);
            std::process::exit(1);
        }
    };

    let result = match expand_story(&doc, config) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("ERROR: Expansion failed: {}", e);
            std::process::exit(1);
        }
    };

    let start = match result.start() {
        Some(node) => node.physical_id,
        None => {
            eprintln!("ERROR: Expansion produced no nodes");
            std::process::exit(1);
        }
    };

    println!("Loaded '{}'", doc.primary_title());
    print_stats(&result);
    println!("Seed: {}", seed);
    println!("Type 'help' for commands.\n");

    let mut rng = StdRng::seed_from_u64(seed);
    let mut current = start;
    show(&doc, &result, current);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("preview> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let cmd = parts[0].to_lowercase();

        match cmd.as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => print_help(),
            "show" | "s" => show(&doc, &result, current),
            "go" | "g" => {
                let n: usize = match parts.get(1).and_then(|s| s.parse().ok()) {
                    Some(n) => n,
                    None => {
                        println!("Usage: go <n>");
                        continue;
                    }
                };
                match result.edges_from(current).nth(n) {
                    Some(edge) => {
                        current = edge.target;
                        show(&doc, &result, current);
                    }
                    None => println!("No exit {} here.", n),
                }
            }
            "random" | "r" => match pick_edge(&result, current, &mut rng) {
                Some(edge) => {
                    current = edge.target;
                    show(&doc, &result, current);
                }
                None => println!("Dead end; 'reset' to start over."),
            },
            "walk" | "w" => {
                let steps: usize = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(10);
                let walk = play_from(&result, current, &mut rng, steps);
                for step in walk.steps.iter().skip(1) {
                    if let Some(node) = result.node(step.node) {
                        let via = step.via.as_ref().map(|l| l.as_str()).unwrap_or("next");
                        println!("  {} -> {} {}", via, step.node, node.logical_id);
                    }
                }
                if let Some(last) = walk.last() {
                    current = last;
                }
                match walk.end {
                    PlayEnd::DeadEnd => println!("(reached a dead end)"),
                    PlayEnd::StepLimit => println!("(stopped after {} steps)", steps),
                    PlayEnd::Empty => {}
                }
            }
            "seed" => {
                if let Some(n) = parts.get(1).and_then(|s| s.parse().ok()) {
                    seed = n;
                    rng = StdRng::seed_from_u64(seed);
                    println!("Seed set to {}", seed);
                } else {
                    println!("Usage: seed <n> (current: {})", seed);
                }
            }
            "reset" => {
                current = start;
                show(&doc, &result, current);
            }
            "stats" => print_stats(&result),
            _ => println!("Unknown command '{}'. Type 'help' for commands.", cmd),
        }
    }
}

fn show(doc: &StoryDocument, result: &ExpansionResult, id: PhysicalId) {
    let node = match result.node(id) {
        Some(node) => node,
        None => return,
    };
    println!("\n{} {} [{}]", id, node.logical_id, node.kind);
    if let Some(text) = doc.node(&node.logical_id).and_then(|n| n.text.as_deref()) {
        println!("  {}", text);
    }
    println!("  state: {}", node.state);

    let exits: Vec<_> = result.edges_from(id).collect();
    if exits.is_empty() {
        println!("  (dead end)");
    }
    for (n, edge) in exits.iter().enumerate() {
        let label = edge.label.as_ref().map(|l| l.as_str()).unwrap_or("next");
        let target = result.node(edge.target).map(|t| t.logical_id.as_str()).unwrap_or("?");
        println!("  [{}] {} -> {} {}", n, label, edge.target, target);
    }
    println!();
}

fn print_stats(result: &ExpansionResult) {
    let stats = result.stats();
    println!(
        "{} physical nodes, {} edges, {} dead ends, {} unreachable",
        stats.physical_nodes, stats.edges, stats.dead_ends, stats.unreachable
    );
    for (logical, count) in &stats.per_logical {
        println!("  {:<20} {}", logical, count);
    }
    for id in &result.unreachable_logical_ids {
        println!("  unreachable: {}", id);
    }
}

fn print_usage() {
    println!("Usage: preview <story.ron> [--seed <n>] [--max-states <n>]");
}

fn print_help() {
    println!("Commands:");
    println!("  show      current node, its state and exits");
    println!("  go <n>    follow exit number n");
    println!("  random    follow a uniformly chosen exit");
    println!("  walk <n>  take up to n random steps (default 10)");
    println!("  seed <n>  reseed the RNG");
    println!("  reset     back to the start node");
    println!("  stats     expansion summary");
    println!("  quit      exit");
}
