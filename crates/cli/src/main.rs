//! Sliver CLI - merge small polygons into their neighbours

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use sliver_algorithms::vector::{
    adjacency, annotate_area, area_km2, bounding_box, merge_small, AdjacencyEntry, MergeParams,
    DEFAULT_AREA_KEY, DEFAULT_SNAP_GRID, DEFAULT_THRESHOLD_KM2,
};
use sliver_core::io::{read_geojson, write_geojson};
use sliver_core::FeatureCollection;

/// Property set on orphans written back with `--keep-orphans`
const ORPHAN_KEY: &str = "_orphan";

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "sliver")]
#[command(author, version, about = "Merge small polygons into their neighbours", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge every polygon below the threshold into a neighbour
    Merge {
        /// Input GeoJSON FeatureCollection
        input: PathBuf,
        /// Output GeoJSON file
        output: PathBuf,
        /// Minimum area in km²
        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD_KM2)]
        threshold: f64,
        /// Snapping grid (degrees) for the fallback union
        #[arg(long, default_value_t = DEFAULT_SNAP_GRID)]
        snap_grid: f64,
        /// Write orphans to the output, flagged with `_orphan: true`
        #[arg(long)]
        keep_orphans: bool,
        /// Pretty-print the output JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Add each feature's area (km²) as a property
    Area {
        /// Input GeoJSON FeatureCollection
        input: PathBuf,
        /// Output GeoJSON file
        output: PathBuf,
        /// Property name for the area
        #[arg(short, long, default_value = DEFAULT_AREA_KEY)]
        key: String,
    },
    /// List touching features as a JSON object of label -> labels
    Neighbors {
        /// Input GeoJSON FeatureCollection
        input: PathBuf,
        /// Output JSON file
        output: PathBuf,
    },
    /// Show information about a feature collection
    Info {
        /// Input GeoJSON FeatureCollection
        input: PathBuf,
        /// Report how many features fall below this area (km²)
        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD_KM2)]
        threshold: f64,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read_features(path: &Path) -> Result<FeatureCollection> {
    let pb = spinner("Reading features...");
    let features = read_geojson(path)
        .with_context(|| format!("Failed to read features from {}", path.display()))?;
    pb.finish_and_clear();
    info!("Input: {} features", features.len());
    Ok(features)
}

fn write_features(features: &FeatureCollection, path: &Path, pretty: bool) -> Result<()> {
    let pb = spinner("Writing output...");
    write_geojson(features, path, pretty)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    pb.finish_and_clear();
    Ok(())
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

/// Write adjacency as a JSON object of label -> neighbour labels.
fn write_neighbours(entries: &[AdjacencyEntry], path: &Path) -> Result<()> {
    let mut map = Map::new();
    for entry in entries {
        let labels = entry
            .neighbors
            .iter()
            .map(|&j| Value::String(entries[j].label.clone()))
            .collect();
        if map.insert(entry.label.clone(), Value::Array(labels)).is_some() {
            warn!("duplicate label '{}', keeping the last entry", entry.label);
        }
    }

    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &Value::Object(map))
        .context("Failed to write neighbours")?;
    writer.flush().context("Failed to write neighbours")?;
    Ok(())
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Merge {
            input,
            output,
            threshold,
            snap_grid,
            keep_orphans,
            pretty,
        } => {
            let features = read_features(&input)?;
            let params = MergeParams {
                threshold_km2: threshold,
                snap_grid,
            };

            let start = Instant::now();
            let pb = spinner("Merging small polygons...");
            let result = merge_small(features, params);
            pb.finish_and_clear();
            let out = result.context("Merge failed")?;
            let elapsed = start.elapsed();

            for orphan in &out.report.orphans {
                warn!(
                    "orphan {} '{}' ({:.1} km²): {}",
                    orphan.id,
                    orphan.feature.label(orphan.id),
                    orphan.area_km2,
                    orphan.reason
                );
            }

            let mut features = out.features;
            if keep_orphans {
                for orphan in out.report.orphans.iter() {
                    let mut feature = orphan.feature.clone();
                    feature.set_property(ORPHAN_KEY, true);
                    features.push(feature);
                }
            }

            write_features(&features, &output, pretty)?;
            println!(
                "{} -> {} features ({} merges, {} orphans, threshold {} km²)",
                out.report.initial_count,
                features.len(),
                out.report.merges.len(),
                out.report.orphans.len(),
                out.report.threshold_km2
            );
            done("Merged features", &output, elapsed);
        }

        Commands::Area { input, output, key } => {
            let mut features = read_features(&input)?;
            let start = Instant::now();
            annotate_area(&mut features, &key);
            let elapsed = start.elapsed();
            write_features(&features, &output, false)?;
            done("Annotated features", &output, elapsed);
        }

        Commands::Neighbors { input, output } => {
            let features = read_features(&input)?;
            let start = Instant::now();
            let entries = adjacency(&features);
            let elapsed = start.elapsed();

            write_neighbours(&entries, &output)?;
            done("Neighbours", &output, elapsed);
        }

        Commands::Info { input, threshold } => {
            let features = read_features(&input)?;
            let areas: Vec<f64> = features.iter().map(|f| area_km2(&f.geometry)).collect();
            let total: f64 = areas.iter().sum();
            let min = areas.iter().copied().fold(f64::INFINITY, f64::min);
            let max = areas.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let below = areas.iter().filter(|&&a| a < threshold).count();
            let extent = features
                .iter()
                .filter_map(|f| bounding_box(&f.geometry))
                .reduce(|a, b| a.union(&b));

            println!("File: {}", input.display());
            println!("Features: {}", features.len());
            if let Some(b) = extent {
                println!(
                    "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                    b.min_x, b.min_y, b.max_x, b.max_y
                );
            }
            if !areas.is_empty() {
                println!("\nArea (km²):");
                println!("  Total: {:.1}", total);
                println!("  Min:   {:.1}", min);
                println!("  Max:   {:.1}", max);
                println!("  Mean:  {:.1}", total / areas.len() as f64);
            }
            println!("Below {} km²: {}", threshold, below);
        }
    }

    Ok(())
}
