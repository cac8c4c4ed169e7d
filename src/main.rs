//! Detector entry point: replay event streams through the pipeline and
//! verify a stored evidence chain.

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sentinel_vnc::detection::DetectionConfig;
use sentinel_vnc::forensic::{
    seed_from_hex, verify_store, AnchorConfig, AnchorKeyring, AnchorService, JsonlForensicStore,
};
use sentinel_vnc::pipeline::{DetectionEngine, EventBus, LoggingSubscriber};
use sentinel_vnc::Event;

#[derive(Parser)]
#[command(name = "sentinel-detector")]
#[command(about = "Hybrid exfiltration detector with Merkle-anchored forensics")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSONL event stream through the detection pipeline
    Replay(ReplayArgs),
    /// Verify the evidence chain in an output directory
    Verify(VerifyArgs),
}

#[derive(ClapArgs)]
struct ReplayArgs {
    /// Newline-delimited JSON event file
    #[arg(long)]
    events: PathBuf,
    /// Directory for forensic records and anchors
    #[arg(long)]
    out_dir: PathBuf,
    /// Optional detection config JSON; defaults apply when absent
    #[arg(long)]
    config: Option<PathBuf>,
    /// 32-byte hex signing-key seed; a random key is generated when absent
    #[arg(long)]
    key_seed: Option<String>,
}

#[derive(ClapArgs)]
struct VerifyArgs {
    /// Directory holding records.jsonl and anchors/
    #[arg(long)]
    out_dir: PathBuf,
    /// 32-byte hex seed of the signing key the anchors were made with
    #[arg(long)]
    key_seed: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging()?;

    match args.command {
        Commands::Replay(replay_args) => replay(replay_args).await,
        Commands::Verify(verify_args) => verify(verify_args),
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn replay(args: ReplayArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => DetectionConfig::from_file(path)
            .map_err(|e| anyhow!("loading {}: {}", path.display(), e))?,
        None => DetectionConfig::default(),
    };
    config.validate()?;

    let keyring = match &args.key_seed {
        Some(seed) => AnchorKeyring::from_seed(seed_from_hex(seed)?),
        None => AnchorKeyring::generate(),
    };

    let store = Arc::new(JsonlForensicStore::open(&args.out_dir)?);
    let bus = Arc::new(EventBus::default());
    bus.subscribe(Box::new(LoggingSubscriber))
        .map_err(|e| anyhow!("{}", e))?;
    let anchors = Arc::new(AnchorService::new(
        AnchorConfig::default(),
        keyring,
        store,
        bus.clone(),
    )?);
    let engine = DetectionEngine::new(config, anchors.clone(), bus)?;

    let cancel = CancellationToken::new();
    let anchor_task = tokio::spawn(anchors.clone().run(cancel.clone()));

    let text = std::fs::read_to_string(&args.events)
        .with_context(|| format!("reading {}", args.events.display()))?;

    let mut alerts = 0usize;
    let mut rejected = 0usize;
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                warn!(line = index + 1, error = %err, "skipping malformed event line");
                rejected += 1;
                continue;
            }
        };
        match engine.submit(event) {
            Ok(Some(_)) => alerts += 1,
            Ok(None) => {}
            Err(err) if err.is_per_event() => rejected += 1,
            Err(err) => return Err(err.into()),
        }
    }

    // Final flush happens inside the anchor task on cancellation.
    cancel.cancel();
    anchor_task.await?;

    info!(
        alerts,
        rejected,
        out_dir = %args.out_dir.display(),
        "replay complete"
    );
    Ok(())
}

fn verify(args: VerifyArgs) -> Result<()> {
    let keyring = AnchorKeyring::from_seed(seed_from_hex(&args.key_seed)?);
    let store = JsonlForensicStore::open(&args.out_dir)?;
    let report = verify_store(&store, &keyring)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.is_clean() {
        info!(
            anchors = report.anchors_valid,
            records = report.records_anchored,
            "evidence chain verified"
        );
        Ok(())
    } else {
        Err(anyhow!(
            "evidence chain verification failed: {} issue(s)",
            report.failures.len()
        ))
    }
}
