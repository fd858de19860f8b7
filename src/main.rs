//! Rule Atlas CLI - Run discovery iterations from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use rule_atlas::{
    compute::{
        LifeEvaluator,
        discovery::{DiscoveryLoop, JsonFileRepository},
    },
    schema::DiscoveryConfig,
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [iterations]", args[0]);
        eprintln!();
        eprintln!("Run the rule discovery loop from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to discovery configuration file");
        eprintln!("  iterations   Number of iterations to run (default: 1)");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let iterations: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1);

    // Load configuration
    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let config: DiscoveryConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    println!("Rule Atlas Discovery");
    println!("====================");
    println!("Storage: {}", config.storage.root.display());
    println!(
        "Batch: {} of {} (strategy: {:?})",
        config.search.batch_size, config.search.pool_size, config.search.strategy
    );
    println!(
        "Evaluation: {}x{} grid, {} steps, {} seeds",
        config.evaluation.grid_size,
        config.evaluation.grid_size,
        config.evaluation.steps,
        config.evaluation.seeds
    );
    println!("Iterations: {}", iterations);
    println!();

    let repo = JsonFileRepository::new(&config.storage.root);
    let mut discovery =
        DiscoveryLoop::new(config, Box::new(repo), LifeEvaluator::new()).unwrap_or_else(|e| {
            eprintln!("Error starting discovery: {}", e);
            std::process::exit(1);
        });

    let start = Instant::now();
    let mut last_hof = None;

    for i in 0..iterations {
        let summary = discovery.run_iteration().unwrap_or_else(|e| {
            eprintln!("Iteration {} failed: {}", i + 1, e);
            std::process::exit(1);
        });

        let stagnant = last_hof == Some(summary.total_hof_rules);
        last_hof = Some(summary.total_hof_rules);

        println!(
            "  Iteration {}/{} [{}]: tested={}, filtered={}, evaluated={}, failed={}, promoted={}{}, removed={}",
            i + 1,
            iterations,
            summary.strategy_used,
            summary.candidates_tested,
            summary.filtered_out,
            summary.results_obtained,
            summary.evaluation_failures,
            summary.new_rules_added,
            if summary.bootstrapped > 0 { " (+bootstrap)" } else { "" },
            summary.removed_rules,
        );
        println!(
            "    memory={}, hall of fame={}{}, meta accuracy={:.3}",
            summary.total_memory_rules,
            summary.total_hof_rules,
            if stagnant { " (unchanged)" } else { "" },
            summary.meta_model_accuracy,
        );
        println!("    log: {}", summary.log_location);
    }

    let elapsed = start.elapsed();
    let hof = discovery.store().hall_of_fame();

    println!();
    println!("Hall of Fame ({} / {}):", hof.len(), hof.max_size());
    for entry in hof.top_n(10) {
        println!(
            "  {:<16} {:<18} composite={:.3}  {}",
            entry.notation.to_string(),
            entry.module_profile.to_string(),
            entry.composite_score,
            entry.tier
        );
    }
    println!();
    println!(
        "Time: {:.2}s ({:.2}s/iteration)",
        elapsed.as_secs_f32(),
        elapsed.as_secs_f32() / iterations.max(1) as f32
    );
}

fn print_example_config() {
    let config = DiscoveryConfig::default();

    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing config: {}", e),
    }
}
