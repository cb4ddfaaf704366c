use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Args, Parser, Subcommand};
use jumpbeat_core::{
    AppConfig, DisplayState, Engine, HttpTransport, InferenceTransport, JumpDetector,
    OfflineTransport, SyntheticMotion, TelemetryBatch, TracingSink,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> jumpbeat_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_client(args).await,
        Commands::Estimate { input, span_seconds } => run_estimate(&input, span_seconds),
        Commands::Config { output } => write_default_config(output.as_ref()),
    }
}

async fn run_client(args: RunArgs) -> jumpbeat_core::Result<()> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_json_file(path)?,
        None if args.offline => AppConfig::offline_defaults(),
        None => AppConfig::default(),
    };
    if let Some(server) = &args.server {
        config.network.base_url = server.clone();
    }
    if args.muted {
        config.playback.start_muted = true;
    }
    config.validate()?;

    if args.offline {
        tracing::info!("running without a server, estimating cadence locally");
        let transport = OfflineTransport::new(JumpDetector::default(), config.window.duration());
        drive(config, Arc::new(transport), &args).await
    } else {
        tracing::info!(server = %config.network.base_url, "connecting to inference service");
        let transport = HttpTransport::new(&config.network)?;
        drive(config, Arc::new(transport), &args).await
    }
}

async fn drive<T: InferenceTransport>(
    config: AppConfig,
    transport: Arc<T>,
    args: &RunArgs,
) -> jumpbeat_core::Result<()> {
    let engine = Engine::spawn(&config, transport, TracingSink::default())?;
    let motion = SyntheticMotion::new(args.cadence, config.motion.sample_interval()?);
    let motion = tokio::spawn(motion.drive(engine.handle()));

    let mut display = engine.handle().subscribe();
    let deadline = async {
        match args.seconds {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            changed = display.changed() => {
                if changed.is_err() {
                    break;
                }
                report(&display.borrow_and_update());
            }
            _ = &mut deadline => {
                tracing::info!("run time elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    motion.abort();
    engine.shutdown().await;
    Ok(())
}

fn report(state: &DisplayState) {
    tracing::info!(
        tempo = state.tempo,
        track = %state.track_name,
        artist = %state.track_artist,
        cover_bytes = state.cover_image.as_ref().map(Vec::len).unwrap_or(0),
        "display updated"
    );
}

fn run_estimate(input: &PathBuf, span_seconds: f64) -> jumpbeat_core::Result<()> {
    tracing::info!(?input, span_seconds, "estimating cadence for recorded window");

    let raw = std::fs::read(input)?;
    let batch: TelemetryBatch = serde_json::from_slice(&raw)?;
    let span = Duration::try_from_secs_f64(span_seconds)
        .map_err(|err| jumpbeat_core::JumpBeatError::msg(format!("invalid span: {err}")))?;
    let detector = JumpDetector::default();

    println!(
        "{} samples, {} jumps, {:.1} jumps per minute",
        batch.len(),
        detector.count(&batch),
        detector.jumps_per_minute(&batch, span)
    );
    Ok(())
}

fn write_default_config(output: Option<&PathBuf>) -> jumpbeat_core::Result<()> {
    let json = serde_json::to_string_pretty(&AppConfig::default())?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            tracing::info!(?path, "wrote default configuration");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Jump cadence client with matched music", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sample motion, upload windows and follow the server's recommendations.
    Run(RunArgs),
    /// Count jumps in a recorded telemetry window without a server.
    Estimate {
        /// JSON array of `{x, y, z}` readings.
        input: PathBuf,
        /// Wall time covered by the recording.
        #[arg(long, default_value_t = 5.0)]
        span_seconds: f64,
    },
    /// Print or write the default configuration.
    Config {
        /// Destination file; printed to stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Inference service base URL, overrides the configuration.
    #[arg(long)]
    server: Option<String>,
    /// Estimate cadence locally instead of calling a server.
    #[arg(long)]
    offline: bool,
    /// Jump cadence of the simulated motion source, in jumps per minute.
    #[arg(long, default_value_t = 120.0)]
    cadence: f64,
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    seconds: Option<u64>,
    /// Start with audio output muted.
    #[arg(long)]
    muted: bool,
}
