use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pathpilot_core::analysis::feature_importance;
use pathpilot_core::codec::{self, ModelFormat};
use pathpilot_core::dataset::{self, DEFAULT_KEEP_INTERVAL, DEFAULT_MAX_IDLE_RUN};
use pathpilot_core::raycast::PERCEPTION_RAYS_PER_QUADRANT;
use pathpilot_core::training::{self, Episode, Trainer};
use pathpilot_core::{
    InferenceController, RayCaster, TileGrid, Topology, TrainingConfig, Vec2, WorldState,
};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser)]
#[command(name = "pathpilot", version, about = "Train and inspect the platformer agent model")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a model from recorded play.
    Train(TrainArgs),
    /// Print the topology and format of a model file.
    Inspect {
        model: PathBuf,
    },
    /// Thin long idle stretches out of a recorded CSV.
    Reduce {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_IDLE_RUN)]
        max_run: usize,
        #[arg(long, default_value_t = DEFAULT_KEEP_INTERVAL)]
        keep_interval: usize,
    },
    /// Rank features by correlation with the recorded move direction.
    Importance {
        data: PathBuf,
        #[arg(long, default_value_t = 20)]
        top: usize,
        #[arg(long)]
        json: bool,
    },
    /// Cast the perception rays at a point of a level and report the decision.
    Scan(ScanArgs),
}

#[derive(clap::Args)]
struct TrainArgs {
    /// Recorded CSV files; each becomes one episode.
    #[arg(required = true)]
    data: Vec<PathBuf>,
    #[arg(long, short)]
    out: PathBuf,
    /// JSON training config; missing keys take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    learning_rate: Option<f32>,
    #[arg(long)]
    validation_split: Option<f32>,
    #[arg(long)]
    patience: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
    /// Continue from an existing model instead of a fresh initialization.
    #[arg(long)]
    resume: Option<PathBuf>,
    /// Drop idle runs before training.
    #[arg(long)]
    reduce: bool,
    /// Write the headerless raw layout older readers expect.
    #[arg(long)]
    legacy_format: bool,
    /// Write training statistics as JSON.
    #[arg(long)]
    stats_out: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ScanArgs {
    #[arg(long)]
    level: PathBuf,
    #[arg(long)]
    x: f32,
    #[arg(long)]
    y: f32,
    #[arg(long, default_value_t = 0.0)]
    vx: f32,
    #[arg(long, default_value_t = 0.0)]
    vy: f32,
    #[arg(long, default_value_t = 150.0)]
    energy: f32,
    #[arg(long)]
    airborne: bool,
    #[arg(long)]
    model: Option<PathBuf>,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Train(args) => train(args),
        Command::Inspect { model } => inspect(&model),
        Command::Reduce {
            input,
            output,
            max_run,
            keep_interval,
        } => reduce(&input, &output, max_run, keep_interval),
        Command::Importance { data, top, json } => importance(&data, top, json),
        Command::Scan(args) => scan(args),
    }
}

fn load_config(args: &TrainArgs) -> Result<TrainingConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => TrainingConfig::behavior_cloning(),
    };
    if let Some(v) = args.epochs {
        config.epochs = v;
    }
    if let Some(v) = args.batch_size {
        config.batch_size = v;
    }
    if let Some(v) = args.learning_rate {
        config.learning_rate = v;
    }
    if let Some(v) = args.validation_split {
        config.validation_split = v;
    }
    if let Some(v) = args.patience {
        config.early_stopping_patience = v;
    }
    if let Some(v) = args.seed {
        config.seed = v;
    }
    if args.checkpoint_dir.is_some() {
        config.checkpoint_dir = args.checkpoint_dir.clone();
    }
    config.validate().context("invalid training config")?;
    Ok(config)
}

fn train(args: TrainArgs) -> Result<()> {
    let config = load_config(&args)?;

    let mut episodes: Vec<Episode> = Vec::with_capacity(args.data.len());
    for path in &args.data {
        let mut frames = dataset::read_csv_file(path)?;
        if args.reduce {
            let before = frames.len();
            frames = dataset::reduce_idle_runs(&frames, DEFAULT_MAX_IDLE_RUN, DEFAULT_KEEP_INTERVAL);
            info!(path = %path.display(), before, after = frames.len(), "reduced idle runs");
        }
        episodes.push(dataset::frames_to_episode(&frames, true)?);
    }
    let total: usize = episodes.iter().map(|e| e.samples.len()).sum();
    info!(files = episodes.len(), samples = total, "loaded training data");

    let mut trainer = match &args.resume {
        Some(path) => {
            let network = codec::load_file(path, &Topology::standard())
                .with_context(|| format!("loading {}", path.display()))?;
            info!(path = %path.display(), "resuming from existing model");
            Trainer::with_network(config, network)?
        }
        None => Trainer::new(config, Topology::standard())?,
    };
    let outcome = trainer.train(&episodes)?;

    let format = if args.legacy_format {
        ModelFormat::Raw
    } else {
        ModelFormat::Versioned
    };
    if let Some(parent) = args.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    codec::save_file(&args.out, &outcome.network, format)?;

    let stats = &outcome.stats;
    println!(
        "trained {} epochs (best {} at val loss {:.6}), saved {}",
        stats.epochs_completed,
        stats.best_epoch,
        stats.best_validation_loss,
        args.out.display()
    );
    if let Some(acc) = stats.validation_accuracy {
        println!("validation action accuracy: {:.1}%", acc * 100.0);
    }
    if let Some(path) = &args.stats_out {
        fs::write(path, serde_json::to_string_pretty(stats)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let summary = codec::inspect(&bytes)?;
    let standard = summary.topology == Topology::standard();
    let report = json!({
        "path": path.display().to_string(),
        "format": format!("{:?}", summary.format),
        "topology": summary.topology.sizes(),
        "parameters": summary.parameter_count,
        "bytes": bytes.len(),
        "standard_topology": standard,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn reduce(input: &Path, output: &Path, max_run: usize, keep_interval: usize) -> Result<()> {
    if keep_interval == 0 {
        bail!("--keep-interval must be positive");
    }
    let frames = dataset::read_csv_file(input)?;
    let reduced = dataset::reduce_idle_runs(&frames, max_run, keep_interval);
    dataset::write_csv_file(output, &reduced)?;
    let removed = frames.len() - reduced.len();
    let pct = if frames.is_empty() {
        0.0
    } else {
        removed as f64 * 100.0 / frames.len() as f64
    };
    println!(
        "{} -> {} rows ({} removed, {:.2}%)",
        frames.len(),
        reduced.len(),
        removed,
        pct
    );
    Ok(())
}

fn importance(path: &Path, top: usize, as_json: bool) -> Result<()> {
    let frames = dataset::read_csv_file(path)?;
    let episode = dataset::frames_to_episode(&frames, true)?;
    let ranked = feature_importance(&training::flatten(&[episode]));
    let shown = &ranked[..top.min(ranked.len())];
    if as_json {
        println!("{}", serde_json::to_string_pretty(shown)?);
        return Ok(());
    }
    println!("{:>4}  {:<14} {:>10}", "rank", "feature", "corr");
    for (rank, f) in shown.iter().enumerate() {
        println!("{:>4}  {:<14} {:>10.4}", rank + 1, f.name, f.correlation);
    }
    Ok(())
}

fn scan(args: ScanArgs) -> Result<()> {
    let text = fs::read_to_string(&args.level)
        .with_context(|| format!("reading level {}", args.level.display()))?;
    let grid = TileGrid::parse(&text);
    let target = grid
        .target()
        .with_context(|| format!("level {} has no target tile", args.level.display()))?;
    let state = WorldState {
        player_position: Vec2::new(args.x, args.y),
        player_velocity: Vec2::new(args.vx, args.vy),
        energy: args.energy,
        grounded: !args.airborne,
        target,
    };

    let rays = RayCaster::default().cast(state.player_center(), &grid, PERCEPTION_RAYS_PER_QUADRANT);
    let hits = rays.iter().filter(|r| r.hit).count();
    let nearest = rays
        .iter()
        .filter(|r| r.hit)
        .map(|r| r.distance)
        .fold(f32::INFINITY, f32::min);
    println!("{} rays, {} hits, nearest obstacle {:.1}px", rays.len(), hits, nearest);

    let mut controller = InferenceController::new(args.seed);
    if let Some(model) = &args.model {
        controller.load_model(model)?;
    }
    match controller.try_decide(&state, &grid) {
        Ok(d) => println!(
            "model: raw [{:.3}, {:.3}] -> move_x {} use_energy {}",
            d.raw[0], d.raw[1], d.action.move_x, d.action.use_energy
        ),
        Err(e) => {
            let a = controller.decide(&state, &grid);
            println!("{e}; fallback move_x {} use_energy {}", a.move_x, a.use_energy);
        }
    }
    Ok(())
}
