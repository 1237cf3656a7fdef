//! Lookup hop scaling on Symphony rings
//!
//! Builds overlays of increasing size and measures the mean greedy hop
//! count between uniformly sampled peers, next to `ln^2 N / k` for reference.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use social_ring::config::default_links_per_peer;
use social_ring::overlay::Overlay;
use social_ring::routing::sample_mean_hops;
use std::error::Error;
use std::time::Instant;

#[derive(Debug, Clone)]
struct ScalingConfig {
    sizes: Vec<usize>,
    /// Fixed `k`; `floor(ln N)` per size when unset
    links_per_peer: Option<usize>,
    samples: usize,
    seed: u64,
    output_file: Option<String>,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            sizes: vec![256, 1024, 4096, 16384, 65536],
            links_per_peer: None,
            samples: 5000,
            seed: 42,
            output_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScalingResult {
    peers: usize,
    links_per_peer: usize,
    mean_hops: f64,
    /// `ln^2 N / k`
    reference: f64,
    rewires: usize,
    scan_fallbacks: usize,
    build_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScalingSummary {
    results: Vec<ScalingResult>,
    samples: usize,
    seed: u64,
    timestamp: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ScalingConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--sizes" => {
                if i + 1 < args.len() {
                    config.sizes = args[i + 1]
                        .split(',')
                        .map(|s| s.trim().parse())
                        .collect::<Result<_, _>>()?;
                    i += 1;
                }
            }
            "--links" | "-k" => {
                if i + 1 < args.len() {
                    config.links_per_peer = Some(args[i + 1].parse()?);
                    i += 1;
                }
            }
            "--samples" => {
                if i + 1 < args.len() {
                    config.samples = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--seed" | "-s" => {
                if i + 1 < args.len() {
                    config.seed = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    config.output_file = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Usage: hop_scaling [OPTIONS]");
                println!();
                println!("Options:");
                println!("      --sizes LIST     Comma separated ring sizes");
                println!("  -k, --links NUM      Long links per peer (default: floor(ln N))");
                println!("      --samples NUM    Lookups per size (default: 5000)");
                println!("  -s, --seed NUM       Random seed (default: 42)");
                println!("  -o, --output FILE    Write results as JSON");
                println!("  -h, --help           Show this help");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Symphony Hop Scaling");
    println!("====================\n");
    println!(
        "{:>8} {:>4} {:>10} {:>10} {:>8} {:>9}",
        "N", "k", "mean hops", "ln²N/k", "rewires", "build ms"
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut results = Vec::with_capacity(config.sizes.len());
    for &peers in &config.sizes {
        let k = config
            .links_per_peer
            .unwrap_or_else(|| default_links_per_peer(peers));

        let start = Instant::now();
        let overlay = Overlay::build(peers, k, &mut rng)?;
        let build_ms = start.elapsed().as_millis() as u64;

        let mean_hops = sample_mean_hops(&overlay, config.samples, &mut rng);
        let ln = (peers as f64).ln();
        let result = ScalingResult {
            peers,
            links_per_peer: k,
            mean_hops,
            reference: ln * ln / k as f64,
            rewires: overlay.build_stats().rewires,
            scan_fallbacks: overlay.build_stats().scan_fallbacks,
            build_ms,
        };
        println!(
            "{:>8} {:>4} {:>10.3} {:>10.3} {:>8} {:>9}",
            result.peers,
            result.links_per_peer,
            result.mean_hops,
            result.reference,
            result.rewires,
            result.build_ms
        );
        results.push(result);
    }

    if let Some(path) = &config.output_file {
        let summary = ScalingSummary {
            results,
            samples: config.samples,
            seed: config.seed,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &summary)?;
        println!("\nResults saved to: {path}");
    }
    Ok(())
}
