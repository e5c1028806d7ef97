// Scenario Runner - Load and execute relay scenario YAML files
//
// Usage:
//   cargo run --bin scenario_runner scenarios/flood.yaml
//   cargo run --bin scenario_runner scenarios/  (runs all .yaml files in directory)
//   cargo run --bin scenario_runner scenarios/flood.yaml --seed 0x1234...

mod relay;

use log::LevelFilter;
use relay::{RelaySimConfig, RelaySimRunner};
use simple_logger::SimpleLogger;
use std::env;
use std::fs;
use std::path::Path;

/// Scenario file format
#[derive(Debug, serde::Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    meta: ScenarioMeta,

    /// Everything not given keeps its default
    #[serde(default)]
    config: RelaySimConfig,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ScenarioMeta {
    name: Option<String>,
    description: Option<String>,
    hypothesis: Option<String>,
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <scenario.yaml | directory/> [--seed SEED_HEX]", args[0]);
        eprintln!("\nExamples:");
        eprintln!("  {} scenarios/flood.yaml", args[0]);
        eprintln!("  {} scenarios/", args[0]);
        eprintln!("  {} scenarios/flood.yaml --seed 0x123456...", args[0]);
        std::process::exit(1);
    }

    if let Err(e) = SimpleLogger::new().with_level(LevelFilter::Warn).init() {
        eprintln!("Logger init failed: {}", e);
    }

    let path = Path::new(&args[1]);

    let seed: Option<[u8; 32]> = if args.len() >= 4 && args[2] == "--seed" {
        match parse_seed_hex(&args[3]) {
            Ok(seed) => Some(seed),
            Err(e) => {
                eprintln!("Invalid hex seed: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    if path.is_file() {
        run_scenario_file(path, seed);
    } else if path.is_dir() {
        run_scenario_directory(path, seed);
    } else {
        eprintln!("Error: Path does not exist: {}", path.display());
        std::process::exit(1);
    }
}

fn run_scenario_directory(dir: &Path, seed: Option<[u8; 32]>) {
    let mut scenarios = Vec::new();

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|s| s.to_str());
            if ext == Some("yaml") || ext == Some("yml") {
                scenarios.push(path);
            }
        }
    }

    scenarios.sort();

    if scenarios.is_empty() {
        eprintln!("No .yaml files found in {}", dir.display());
        std::process::exit(1);
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  SCENARIO RUNNER - Multiple Scenarios                  ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
    println!("Found {} scenario(s) to run\n", scenarios.len());

    for (i, scenario_path) in scenarios.iter().enumerate() {
        println!("\n{}/{} Running: {}\n", i + 1, scenarios.len(), scenario_path.display());
        run_scenario_file(scenario_path, seed);
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  All scenarios complete!                               ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
}

fn run_scenario_file(path: &Path, seed: Option<[u8; 32]>) {
    println!("Loading scenario from: {}", path.display());

    let yaml_content = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", path.display(), e);
        std::process::exit(1);
    });

    let scenario: ScenarioFile = serde_yaml::from_str(&yaml_content).unwrap_or_else(|e| {
        eprintln!("Failed to parse {}: {}", path.display(), e);
        std::process::exit(1);
    });

    let title = scenario
        .meta
        .name
        .clone()
        .or_else(|| path.file_stem().and_then(|s| s.to_str()).map(|s| format!("Scenario: {}", s)))
        .unwrap_or_else(|| "Scenario".to_string());

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  {}{}║", title, " ".repeat(54_usize.saturating_sub(title.len())));
    println!("╚════════════════════════════════════════════════════════╝\n");

    if let Some(ref desc) = scenario.meta.description {
        println!("{}\n", desc);
    }

    if let Some(ref hypothesis) = scenario.meta.hypothesis {
        println!("Hypothesis:");
        println!("  {}\n", hypothesis);
    }

    let mut config = scenario.config;
    config.seed = seed;
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration in {}: {}", path.display(), e);
        std::process::exit(1);
    }

    println!("Configuration:");
    println!("  Protocol: {:?}", config.settings.protocol);
    println!("  Reconciliation: {:?}", config.settings.reconciliation_mode);
    println!("  Nodes: {} (out degree {})", config.num_nodes, config.out_degree);
    println!(
        "  Roles: {} emitters, {} black holes, {} spies",
        config.roles.emitters, config.roles.black_holes, config.roles.spies
    );
    println!("  Time to run: {}s (+{}s drain)", config.time_to_run_seconds, config.drain_seconds);
    println!("\nStarting simulation...\n");

    let result = RelaySimRunner::new(config).run();
    result.print_summary();

    println!("\n✓ Scenario complete!\n");
}

fn parse_seed_hex(hex: &str) -> Result<[u8; 32], std::num::ParseIntError> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    let mut seed = [0u8; 32];

    for (i, chunk) in hex.as_bytes().chunks(2).take(32).enumerate() {
        let byte_str = String::from_utf8_lossy(chunk);
        seed[i] = u8::from_str_radix(&byte_str, 16)?;
    }

    Ok(seed)
}
