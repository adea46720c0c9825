use chrono::Utc;
use chrono_tz::Tz;
use clap::Parser;
use headway::pipeline::run_batch;
use headway::postgres_tools::make_async_pool;
use headway::sources::JsonLinesSource;
use headway::static_load::{StaticSnapshot, load_static_snapshot};
use log::{error, info};
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[derive(Parser)]
#[command(name = "tamarack", about = "transit performance reconciliation batch loop")]
struct Args {
    /// local directory holding flattened source files
    #[arg(long, default_value = "./data")]
    source_root: String,

    /// seconds between batch cycles
    #[arg(long, default_value_t = 60)]
    interval_seconds: u64,

    /// feed timezone
    #[arg(long, default_value = "America/New_York")]
    timezone: String,

    /// load a static schedule snapshot from this subdirectory of
    /// source-root, then exit
    #[arg(long)]
    load_static: Option<String>,

    /// run a single batch cycle, then exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    env_logger::init();

    let args = Args::parse();

    let tz: Tz = args
        .timezone
        .parse()
        .map_err(|err| format!("bad timezone {}: {}", args.timezone, err))?;

    let pool = make_async_pool().await?;
    let source = JsonLinesSource::new(&args.source_root);

    if let Some(prefix) = args.load_static {
        let mut conn = pool.get().await?;
        let snapshot = StaticSnapshot::read(&source, &prefix)?;
        let static_version_key = load_static_snapshot(&mut conn, &snapshot, Utc::now()).await?;
        info!(
            "loaded static snapshot {} as version {}",
            prefix, static_version_key
        );
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing the in-flight group");
            shutdown_flag.store(true, Ordering::Relaxed);
        }
    });

    let mut interval = tokio::time::interval(Duration::from_secs(args.interval_seconds));
    // a long batch blocks the loop; missed ticks are skipped, not queued
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match run_batch(&pool, &source, tz, &shutdown).await {
            Ok(summary) => info!(
                "cycle complete groups={} failed={} staged={} inserted={} updated={}",
                summary.groups_processed,
                summary.groups_failed,
                summary.events_staged,
                summary.events_inserted,
                summary.events_updated
            ),
            Err(err) => error!("cycle failed: {}", err),
        }

        if args.once || shutdown.load(Ordering::Relaxed) {
            break;
        }
    }

    Ok(())
}
