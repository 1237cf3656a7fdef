//! Social ring refinement runner
//!
//! Loads a social graph edge list, builds a Symphony overlay, places the
//! graph on it and runs gossip refinement rounds.

use rand::rngs::StdRng;
use rand::SeedableRng;
use social_ring::config::SimulationConfig;
use social_ring::graph::load_edge_list;
use social_ring::overlay::Overlay;
use social_ring::placement::{assign_identifiers, link_overlay};
use social_ring::refinement::Refiner;
use social_ring::selection::FriendIndex;
use social_ring::telemetry::{init_tracing, MetricsSnapshot, RunReport};
use std::error::Error;
use std::path::PathBuf;
use tracing::info;

struct Args {
    graph: Option<PathBuf>,
    config: Option<PathBuf>,
    report: Option<PathBuf>,
    overrides: Vec<(String, String)>,
}

fn print_usage() {
    println!("Usage: refine --graph FILE [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -g, --graph FILE     Edge list, one `u v` pair per line (required)");
    println!("  -c, --config FILE    JSON configuration file");
    println!("  -n, --peers NUM      Overlay size (default: 10000)");
    println!("  -k, --links NUM      Long links per peer (default: floor(ln N))");
    println!("  -r, --rounds NUM     Refinement rounds (default: 10)");
    println!("      --scheme NAME    direct | greedy | smart | random (default: direct)");
    println!("      --metric NAME    euclidean | hop | absolute | wrap-penalized");
    println!("      --order NAME     natural | ascending | descending | shuffled");
    println!("      --friends NUM    Friend list length for the smart scheme");
    println!("      --placement NAME random | hashed (default: random)");
    println!("  -s, --seed NUM       Random seed (default: 42)");
    println!("      --track          Record cost and hops after every round");
    println!("  -o, --report FILE    Write a JSON run report");
    println!("      --log-level LVL  Log filter when RUST_LOG is unset (default: info)");
    println!("      --json-logs      Emit JSON log lines");
    println!("      --log-dir DIR    Write rotated log files instead of stderr");
    println!("  -h, --help           Show this help");
}

/// `None` means help was requested.
fn parse_args() -> Result<Option<Args>, Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        graph: None,
        config: None,
        report: None,
        overrides: Vec::new(),
    };

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--help" | "-h" => return Ok(None),
            "--track" | "--json-logs" => {
                parsed.overrides.push((flag.to_string(), String::new()));
            }
            _ => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| format!("missing value for {flag}"))?
                    .clone();
                match flag {
                    "--graph" | "-g" => parsed.graph = Some(PathBuf::from(value)),
                    "--config" | "-c" => parsed.config = Some(PathBuf::from(value)),
                    "--report" | "-o" => parsed.report = Some(PathBuf::from(value)),
                    "--peers" | "-n" | "--links" | "-k" | "--rounds" | "-r" | "--scheme"
                    | "--metric" | "--order" | "--friends" | "--placement" | "--seed" | "-s"
                    | "--log-level" | "--log-dir" => {
                        parsed.overrides.push((flag.to_string(), value));
                    }
                    _ => return Err(format!("unknown option: {flag}").into()),
                }
                i += 1;
            }
        }
        i += 1;
    }
    Ok(Some(parsed))
}

/// Apply command line flags on top of the file configuration.
fn apply_overrides(
    config: &mut SimulationConfig,
    overrides: &[(String, String)],
) -> Result<(), Box<dyn Error>> {
    for (flag, value) in overrides {
        match flag.as_str() {
            "--peers" | "-n" => config.peers = value.parse()?,
            "--links" | "-k" => config.links_per_peer = Some(value.parse()?),
            "--rounds" | "-r" => config.refinement.rounds = value.parse()?,
            "--scheme" => config.refinement.scheme = value.parse()?,
            "--metric" => config.refinement.metric = value.parse()?,
            "--order" => config.refinement.order = value.parse()?,
            "--friends" => config.friends_per_node = Some(value.parse()?),
            "--placement" => config.placement = value.parse()?,
            "--seed" | "-s" => config.seed = value.parse()?,
            "--track" => config.refinement.track_metrics = true,
            "--log-level" => config.log.level = value.clone(),
            "--json-logs" => config.log.json = true,
            "--log-dir" => config.log.directory = Some(PathBuf::from(value)),
            _ => {}
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let Some(args) = parse_args()? else {
        print_usage();
        return Ok(());
    };
    let Some(graph_path) = args.graph else {
        print_usage();
        return Err("--graph is required".into());
    };

    let mut config = match &args.config {
        Some(path) => SimulationConfig::from_json_file(path)?,
        None => SimulationConfig::default(),
    };
    apply_overrides(&mut config, &args.overrides)?;
    config.validate()?;

    let _guard = init_tracing(&config.log)?;

    println!("Social Ring Refinement");
    println!("======================\n");
    println!("Configuration:");
    println!("  Graph:      {}", graph_path.display());
    println!("  Peers:      {}", config.peers);
    println!("  Links:      {}", config.links_per_peer());
    println!("  Rounds:     {}", config.refinement.rounds);
    println!("  Scheme:     {}", config.refinement.scheme);
    println!("  Metric:     {}", config.refinement.metric);
    println!("  Seed:       {}", config.seed);
    println!();

    let started_at = chrono::Utc::now();
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut graph = load_edge_list(&graph_path)?;
    info!(nodes = graph.node_count(), edges = graph.edge_count(), "graph loaded");

    let mut overlay = Overlay::build_with_budget(
        config.peers,
        config.links_per_peer(),
        config.max_link_draws,
        &mut rng,
    )?;
    assign_identifiers(&mut graph, config.placement, &mut rng);
    link_overlay(&graph, &mut overlay);

    let friends = config
        .refinement
        .scheme
        .needs_friend_index()
        .then(|| FriendIndex::build(&graph, config.friends_per_node()));

    let initial = MetricsSnapshot::capture(&graph, &overlay, &config);
    let mut refiner = Refiner::new(config.refinement.clone(), rng);
    let refinement = refiner.run(&mut graph, &mut overlay, friends.as_ref())?;
    let final_metrics = MetricsSnapshot::capture(&graph, &overlay, &config);

    let report = RunReport {
        nodes: graph.node_count(),
        edges: graph.edge_count(),
        started_at,
        finished_at: chrono::Utc::now(),
        overlay: overlay.build_stats().clone(),
        initial,
        final_metrics,
        refinement,
        config,
    };
    println!("{report}");

    if let Some(path) = &args.report {
        report.write_json(path)?;
        println!("\nReport written to {}", path.display());
    }
    Ok(())
}
