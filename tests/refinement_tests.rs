//! End-to-end refinement runs driven from files on disk

use rand::rngs::StdRng;
use rand::SeedableRng;
use social_ring::config::{ConfigError, SimulationConfig};
use social_ring::graph::{load_edge_list, GraphError, SocialGraph};
use social_ring::overlay::Overlay;
use social_ring::placement::{assign_identifiers, link_overlay, Placement};
use social_ring::refinement::Refiner;
use social_ring::selection::{FriendIndex, SelectionScheme};
use social_ring::telemetry::{MetricsSnapshot, RunReport};
use std::io::Write;
use tempfile::NamedTempFile;

/// Ring of 6 communities of 8 nodes, each community a clique minus a few
/// edges, neighbouring communities joined by one bridge.
fn write_edge_list() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "# communities").unwrap();
    writeln!(file, "% konect style comment").unwrap();
    for c in 0..6u64 {
        let base = c * 8 + 100;
        for a in 0..8 {
            for b in (a + 1)..8 {
                if (a + b) % 5 != 0 {
                    writeln!(file, "{} {} 1", base + a, base + b).unwrap();
                }
            }
        }
        let next = ((c + 1) % 6) * 8 + 100;
        writeln!(file, "{}\t{}", base, next + 4).unwrap();
        writeln!(file).unwrap();
    }
    file.flush().unwrap();
    file
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

struct Outcome {
    identifiers: Vec<f64>,
    report: RunReport,
}

fn run(config: SimulationConfig, graph: SocialGraph) -> Outcome {
    let started_at = chrono::Utc::now();
    let mut graph = graph;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut overlay =
        Overlay::build_with_budget(config.peers, config.links_per_peer(), config.max_link_draws, &mut rng)
            .unwrap();
    assign_identifiers(&mut graph, config.placement, &mut rng);
    link_overlay(&graph, &mut overlay);

    let friends = config
        .refinement
        .scheme
        .needs_friend_index()
        .then(|| FriendIndex::build(&graph, config.friends_per_node()));
    let initial = MetricsSnapshot::capture(&graph, &overlay, &config);
    let refinement = Refiner::new(config.refinement.clone(), rng)
        .run(&mut graph, &mut overlay, friends.as_ref())
        .unwrap();
    let final_metrics = MetricsSnapshot::capture(&graph, &overlay, &config);

    overlay.validate().unwrap();
    assert_eq!(overlay.resident_count(), graph.node_count());

    Outcome {
        identifiers: graph.node_ids().map(|id| graph.identifier(id)).collect(),
        report: RunReport {
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            started_at,
            finished_at: chrono::Utc::now(),
            overlay: overlay.build_stats().clone(),
            initial,
            final_metrics,
            refinement,
            config,
        },
    }
}

#[test]
fn test_edge_list_loading() {
    let file = write_edge_list();
    let graph = load_edge_list(file.path()).unwrap();
    assert_eq!(graph.node_count(), 48);
    assert!(graph.id_of(100).is_some());
    assert!(graph.contains_edge(graph.id_of(100).unwrap(), graph.id_of(112).unwrap()));
}

#[test]
fn test_malformed_edge_list() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "1 2").unwrap();
    writeln!(file, "3 x").unwrap();
    file.flush().unwrap();
    assert!(matches!(
        load_edge_list(file.path()),
        Err(GraphError::MalformedEdge { line: 2, .. })
    ));
}

#[test]
fn test_full_run_from_config_file() {
    let graph = load_edge_list(write_edge_list().path()).unwrap();
    let config_file = write_config(
        r#"{
            "peers": 256,
            "seed": 9,
            "refinement": {"rounds": 6, "scheme": "direct", "track_metrics": true}
        }"#,
    );
    let config = SimulationConfig::from_json_file(config_file.path()).unwrap();
    assert_eq!(config.links_per_peer(), 5);

    let outcome = run(config, graph);
    let report = &outcome.report;
    assert_eq!(report.refinement.rounds.len(), 6);
    assert!(report.refinement.total_swaps() > 0);
    assert!(report.refinement.total_draws() >= report.refinement.total_swaps());
    for round in &report.refinement.rounds {
        assert!(round.total_cost.is_some());
        assert!(round.mean_lookup_hops.is_some());
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.json");
    report.write_json(&path).unwrap();
    let loaded = RunReport::from_json_file(&path).unwrap();
    assert_eq!(loaded.refinement.total_swaps(), report.refinement.total_swaps());
    assert_eq!(loaded.config.peers, 256);
}

#[test]
fn test_every_scheme_runs() {
    for scheme in [
        SelectionScheme::Direct,
        SelectionScheme::Greedy,
        SelectionScheme::Smart,
        SelectionScheme::Random,
    ] {
        let graph = load_edge_list(write_edge_list().path()).unwrap();
        let mut config = SimulationConfig {
            peers: 128,
            ..SimulationConfig::default()
        };
        config.refinement.scheme = scheme;
        config.refinement.rounds = 3;
        let outcome = run(config, graph);
        assert_eq!(outcome.report.refinement.rounds.len(), 3, "{scheme}");
    }
}

#[test]
fn test_fixed_seed_is_reproducible() {
    let make = || {
        let graph = load_edge_list(write_edge_list().path()).unwrap();
        let mut config = SimulationConfig {
            peers: 200,
            seed: 1234,
            ..SimulationConfig::default()
        };
        config.refinement.rounds = 4;
        run(config, graph)
    };
    let (a, b) = (make(), make());
    assert_eq!(a.identifiers, b.identifiers);
    assert_eq!(
        a.report.refinement.total_draws(),
        b.report.refinement.total_draws()
    );
    assert_eq!(a.report.overlay.draws, b.report.overlay.draws);
}

#[test]
fn test_hashed_placement_ignores_seed() {
    let place = |seed| {
        let mut graph = load_edge_list(write_edge_list().path()).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        assign_identifiers(&mut graph, Placement::Hashed, &mut rng);
        graph.node_ids().map(|id| graph.identifier(id)).collect::<Vec<_>>()
    };
    assert_eq!(place(1), place(2));
}

#[test]
fn test_unknown_config_values_rejected() {
    let file = write_config(r#"{"refinement": {"order": "zigzag"}}"#);
    assert!(matches!(
        SimulationConfig::from_json_file(file.path()),
        Err(ConfigError::Json(_))
    ));
    assert!(matches!(
        "telepathy".parse::<SelectionScheme>(),
        Err(ConfigError::UnknownScheme(_))
    ));
    assert!(matches!(
        SimulationConfig::from_json_file("/nonexistent/config.json"),
        Err(ConfigError::Io(_))
    ));
}
