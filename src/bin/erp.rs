/// erp: average a recording around event markers and write the averages.
///
/// The input is read and searched for all requested labels. If `--highpass`
/// or `--lowpass` is given each epoch is filtered with a zero-phase
/// Butterworth filter of `--filter-order`. Windows of `--left-padding` /
/// `--right-padding` seconds are cut around every matching event; with
/// `--artifact-detection` windows in which any channel exceeds the
/// peak-to-peak criterion are dropped. Averaging is per label, followed by
/// an optional average reference.
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use evoked::io::{write_averages, AveragesMeta, EventTable, Recording};
use evoked::{run_erp, ErpConfig, RecordingReader};

#[derive(Parser, Debug)]
#[command(name = "erp", about = "Event-related averaging of continuous EEG")]
struct Args {
    /// Recording (.safetensors with `data`, `sfreq`, `epochs`).
    input: PathBuf,

    /// Event table (.json list of {"code", "time"}).
    events: PathBuf,

    /// Output averages (.safetensors); must not exist.
    output: PathBuf,

    /// JSON file with an `ErpConfig`; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated event labels.
    #[arg(long, short = 'l', value_delimiter = ',')]
    labels: Vec<String>,

    /// Comma-separated category names, one per label.
    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,

    /// Padding before each event in seconds (default 1.0).
    #[arg(long)]
    left_padding: Option<f64>,

    /// Padding after each event in seconds (default 1.0).
    #[arg(long)]
    right_padding: Option<f64>,

    /// Highpass cutoff (Hz).
    #[arg(long)]
    highpass: Option<f64>,

    /// Lowpass cutoff (Hz).
    #[arg(long)]
    lowpass: Option<f64>,

    /// Butterworth order (default 4). Filtering runs forward and backward,
    /// doubling the effective order.
    #[arg(long)]
    filter_order: Option<usize>,

    /// Peak-to-peak criterion for dropping segments.
    #[arg(long)]
    artifact_detection: Option<f64>,

    /// Re-reference averages to the mean of good channels.
    #[arg(long)]
    average_ref: bool,

    /// Extra bad channels, 1-based, comma-separated.
    #[arg(long, value_delimiter = ',')]
    bad_channels: Vec<usize>,

    /// Device name written to the output (default: taken from the input).
    #[arg(long)]
    device: Option<String>,

    /// Print settings and results of each step; debug logging.
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn build_config(args: &Args) -> Result<ErpConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            ErpConfig::from_json(&text)?
        }
        None => ErpConfig::default(),
    };

    let labels: Vec<String> = args
        .labels
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if !labels.is_empty() {
        cfg.labels = labels;
    }
    if !args.categories.is_empty() {
        cfg.categories = Some(args.categories.iter().map(|s| s.trim().to_string()).collect());
    }
    if let Some(v) = args.left_padding {
        cfg.left_padding = v;
    }
    if let Some(v) = args.right_padding {
        cfg.right_padding = v;
    }
    if args.highpass.is_some() {
        cfg.highpass = args.highpass;
    }
    if args.lowpass.is_some() {
        cfg.lowpass = args.lowpass;
    }
    if let Some(v) = args.filter_order {
        cfg.filter_order = v;
    }
    if args.artifact_detection.is_some() {
        cfg.artifact_criterion = args.artifact_detection;
    }
    cfg.average_reference |= args.average_ref;
    cfg.bad_channels.extend(args.bad_channels.iter().copied());
    if let Some(d) = &args.device {
        cfg.device = d.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if args.output.exists() {
        bail!("file exists: '{}'", args.output.display());
    }
    let cfg = build_config(&args)?;

    let mut rec = Recording::load(&args.input)?;
    eprintln!(
        "Loaded {} ch @ {} Hz, {} epochs",
        rec.n_channels(),
        rec.sampling_rate(),
        rec.epochs().len()
    );
    let events = EventTable::load(&args.events)?;

    let mut history = rec.history()?;
    let mut out = run_erp(&mut rec, &events, &cfg)?;
    out.set_source_file(&args.input.display().to_string());

    for (category, times) in &out.out_of_range {
        eprintln!("  {category}: {} segment(s) extended beyond data range", times.len());
    }
    if args.verbose {
        for entry in &out.history {
            eprintln!("{}", serde_json::to_string_pretty(entry)?);
        }
    }

    let device = if cfg.device.is_empty() {
        rec.device().unwrap_or_default().to_string()
    } else {
        cfg.device.clone()
    };
    history.extend(out.history);
    let meta = AveragesMeta { start_time: rec.start_time(), device, history };

    eprintln!("\nWriting averaged data to {} ...", args.output.display());
    write_averages(&args.output, &out.averages, &meta)?;
    for avg in out.averages.iter() {
        eprintln!("  {}: {} segments", avg.label, avg.num_segments);
    }
    Ok(())
}
