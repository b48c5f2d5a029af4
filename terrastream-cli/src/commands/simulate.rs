//! Simulate command - drive a synthetic quadtree through the frame loop.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use terrastream::coord::TileKey;
use terrastream::logging::{init_logging, DEFAULT_LOG_FILE};
use terrastream::map::{ImageLayerInfo, Map};
use terrastream::terrain::{
    ManualProvider, ServiceProvider, SyntheticFactory, TerrainContext, TerrainRegistry,
    WorkerPoolProvider,
};
use tracing::info;

use super::common::{load_config, ModeArg};
use crate::error::CliError;

/// Deepest quadtree the simulation will build.
const MAX_DEPTH: u8 = 7;

/// Frames between progress lines.
const REPORT_INTERVAL: u32 = 10;

/// Arguments for the simulate command.
pub struct SimulateArgs {
    pub depth: u8,
    pub layers: u32,
    pub frames: u32,
    pub mode: Option<ModeArg>,
    pub config: Option<PathBuf>,
    pub failure_rate: f64,
    pub deterministic: bool,
    pub frame_ms: u64,
    pub stop_when_converged: bool,
    pub log_dir: PathBuf,
}

/// Run the simulate command.
pub fn run(args: SimulateArgs) -> Result<(), CliError> {
    if args.depth > MAX_DEPTH {
        return Err(CliError::InvalidArgument(format!(
            "--depth {} exceeds the maximum of {}",
            args.depth, MAX_DEPTH
        )));
    }
    if !(0.0..=1.0).contains(&args.failure_rate) {
        return Err(CliError::InvalidArgument(format!(
            "--failure-rate {} must be between 0 and 1",
            args.failure_rate
        )));
    }

    let _logging = init_logging(&args.log_dir, DEFAULT_LOG_FILE)
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

    let mut config = load_config(args.config.as_deref())?;
    if let Some(mode) = args.mode {
        config = config.with_loading_mode(mode.into());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    let map = Arc::new(Map::new());
    for uid in 1..=args.layers {
        map.add_image_layer(ImageLayerInfo::new(uid, format!("layer-{}", uid)));
    }

    let factory = Arc::new(SyntheticFactory::new().with_failure_rate(args.failure_rate));
    let manual = args.deterministic.then(|| Arc::new(ManualProvider::new()));
    let provider: Arc<dyn ServiceProvider> = match &manual {
        Some(manual) => manual.clone(),
        None => Arc::new(WorkerPoolProvider::new(
            runtime.handle().clone(),
            config.clone(),
        )),
    };

    let terrain = TerrainRegistry::builder(Arc::clone(&map), factory.clone())
        .config(config.clone())
        .provider(provider)
        .build()?;

    for key in quadtree(args.depth) {
        terrain.add_tile(key)?;
    }

    println!("terrastream {}", terrastream::VERSION);
    println!("  Tiles:        {} (LOD 0-{})", terrain.tile_count(), args.depth);
    println!("  Layers:       {}", args.layers);
    println!("  Mode:         {}", config.loading_mode);
    println!(
        "  Execution:    {}",
        if manual.is_some() { "deterministic" } else { "worker pools" }
    );
    println!("  Failure rate: {:.0}%", args.failure_rate * 100.0);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CliError::Signal(e.to_string()))?;

    let started = Instant::now();
    let frame_interval = Duration::from_millis(args.frame_ms);
    let mut converged_at = None;

    for frame in 1..=args.frames {
        if shutdown.load(Ordering::SeqCst) {
            println!("Received shutdown signal, stopping...");
            break;
        }

        let report = terrain.frame();
        match &manual {
            Some(manual) => {
                manual.run_all();
            }
            None => std::thread::sleep(frame_interval),
        }

        let convergence = terrain.convergence();
        if frame % REPORT_INTERVAL == 0 || convergence.is_complete() {
            println!(
                "{} | elevation {}/{} | imagery {}/{} | geometry {}",
                report,
                convergence.elevation_final,
                convergence.tiles,
                convergence.imagery_final,
                convergence.imagery_expected,
                convergence.with_geometry
            );
        }

        if convergence.is_complete() && convergence.with_geometry == convergence.tiles {
            if converged_at.is_none() {
                converged_at = Some(frame);
                info!(frame, "All tiles at full resolution");
            }
            if args.stop_when_converged {
                break;
            }
        }
    }

    terrain.shutdown();

    println!();
    match converged_at {
        Some(frame) => println!(
            "Converged after {} frames ({:.2}s)",
            frame,
            started.elapsed().as_secs_f64()
        ),
        None => println!("Did not converge within {} frames", args.frames),
    }
    println!();
    print_lod_table(&terrain, args.layers);
    println!();
    println!("{}", terrain.metrics().snapshot());
    println!(
        "Factory:               {} heightfields, {} images, {} injected failures",
        factory.heightfields_created(),
        factory.images_created(),
        factory.failures()
    );

    drop(terrain);
    runtime.shutdown_timeout(Duration::from_secs(5));
    Ok(())
}

/// Every key from LOD 0 down to `depth`.
fn quadtree(depth: u8) -> Vec<TileKey> {
    let mut keys = Vec::new();
    for lod in 0..=depth {
        let n = 1u32 << lod;
        for row in 0..n {
            for col in 0..n {
                keys.push(TileKey::new(row, col, lod));
            }
        }
    }
    keys
}

#[derive(Default)]
struct LodRow {
    tiles: usize,
    elevation_final: usize,
    imagery_final: usize,
}

fn print_lod_table(terrain: &TerrainRegistry, layers: u32) {
    let mut rows: BTreeMap<u8, LodRow> = BTreeMap::new();
    for tile in terrain.tiles() {
        let key = tile.key();
        let row = rows.entry(key.lod).or_default();
        row.tiles += 1;
        if tile.elevation_lod() >= key.level() {
            row.elevation_final += 1;
        }
        row.imagery_final += (1..=layers)
            .filter(|uid| tile.color_lod(*uid) >= key.level())
            .count();
    }

    println!("LOD  Tiles  Elevation  Imagery");
    for (lod, row) in rows {
        println!(
            "{:>3}  {:>5}  {:>9}  {:>7}",
            lod,
            row.tiles,
            format!("{}/{}", row.elevation_final, row.tiles),
            format!("{}/{}", row.imagery_final, row.tiles * layers as usize)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadtree_counts() {
        assert_eq!(quadtree(0), vec![TileKey::root()]);
        assert_eq!(quadtree(2).len(), 1 + 4 + 16);
        assert!(quadtree(3).iter().all(|k| k.is_valid()));
    }
}
