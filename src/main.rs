//! dae-emu: cycle-driven stream engine emulator

use std::env;
use std::path::Path;

use anyhow::{bail, Context};
use dae_emu::config::EngineConfig;
use dae_emu::emu::Cluster;
use dae_emu::testing::Scenario;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") || args.len() < 2 {
        print_usage();
        return Ok(());
    }
    if args.iter().any(|a| a == "--sample-config") {
        print!("{}", EngineConfig::sample_config());
        return Ok(());
    }
    if args.iter().any(|a| a == "--show-config") {
        return show_config();
    }

    let quiet = args.iter().any(|a| a == "--quiet" || a == "-q");
    let paths: Vec<&str> = args[1..]
        .iter()
        .filter(|a| !a.starts_with('-'))
        .map(|s| s.as_str())
        .collect();
    if paths.is_empty() {
        bail!("no scenario file given");
    }

    let mut failed = 0;
    for path in &paths {
        if !run_scenario(Path::new(path), quiet)? {
            failed += 1;
        }
    }

    if paths.len() > 1 {
        println!();
        println!("{} passed, {} failed", paths.len() - failed, failed);
    }
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn print_usage() {
    println!("Usage: dae-emu [options] <scenario.toml>...");
    println!();
    println!("Options:");
    println!("  -q, --quiet       Only print pass/fail per scenario");
    println!("  --show-config     Print the effective engine configuration");
    println!("  --sample-config   Print a sample config file");
    println!("  -h, --help        Show this message");
}

fn show_config() -> anyhow::Result<()> {
    let config = EngineConfig::get();
    if let Some(path) = EngineConfig::user_config_path() {
        println!("# user config: {}", path.display());
    }
    let text = toml::to_string_pretty(config).context("failed to serialize config")?;
    print!("{}", text);
    Ok(())
}

/// Run one scenario file. Returns whether it passed.
fn run_scenario(path: &Path, quiet: bool) -> anyhow::Result<bool> {
    let mut scenario = Scenario::from_file(path)?;

    // Scenario settings take priority over the environment and config files
    let mut config = EngineConfig::get().clone();
    config.merge(scenario.config.clone());
    scenario.config = config;

    let (cluster, outcome) = scenario.execute();

    println!(
        "{}: {} ({} cycles, {} checks)",
        outcome.name,
        if outcome.passed() { "PASS" } else { "FAIL" },
        outcome.cycles,
        outcome.checks
    );
    if let Some(err) = &outcome.error {
        println!("  error: {}", err);
    }
    for mismatch in &outcome.mismatches {
        println!("  mismatch: {}", mismatch);
    }

    if !quiet {
        if !scenario.scenario.description.is_empty() {
            println!("  {}", scenario.scenario.description);
        }
        if let Some(cluster) = &cluster {
            print_ports(cluster);
        }
        for (core, stats) in outcome.stats.iter().enumerate() {
            println!();
            println!("core{} statistics", core);
            println!("================");
            println!("{}", stats);
        }
    }

    Ok(outcome.passed())
}

/// Print every nonempty port of every core.
fn print_ports(cluster: &Cluster) {
    for core in 0..cluster.num_cores() {
        let Some(engine) = cluster.engine(core as u8) else {
            continue;
        };
        let ports = engine.inputs().iter().chain(engine.outputs().iter());
        for port in ports.filter(|p| !p.is_empty()) {
            let words: Vec<String> = port.words().map(|w| format!("{:#x}", w)).collect();
            println!(
                "  core{} {} port {:2} [{:?}] {}",
                core,
                port.direction(),
                port.id(),
                port.status(),
                words.join(" ")
            );
        }
    }
}
