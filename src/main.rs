//! entry-guard - tailgating detection at an access-controlled door
//!
//! A badge scan (POST /scan) opens a short window; if a second person stays
//! in the entry zone for longer than the tolerance, the scan is flagged, the
//! buffered footage is exported and an UNAUTHORIZED event is published.
//!
//! Module structure:
//! - `domain/` - Core types (frames, detections, scan results and events)
//! - `io/` - External interfaces (frame source, clip and event sinks, HTTP)
//! - `services/` - Pipeline (zone filter, scan state machine, workers)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use entry_guard::infra::{Config, Metrics};
use entry_guard::io::{
    create_clip_sink, create_event_sinks, start_control_server, ControlContext, EventSink,
    FanoutSink, FrameSource, MqttEventSink, ReplayFeed,
};
use entry_guard::services::{
    create_clip_exporter, create_event_publisher, FrameLoop, FrameLoopOutputs, RetryPolicy,
    ScanStatusBoard, TriggerSlot,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Pending clip jobs; each holds a full buffer snapshot
const CLIP_QUEUE_SIZE: usize = 4;

/// entry-guard - tailgating detection service
#[derive(Parser, Debug)]
#[command(name = "entry-guard", version, about)]
struct Args {
    /// Path to TOML configuration file (else CONFIG_FILE, else config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Replay capture to run instead of `replay.path` from the config
    #[arg(long)]
    replay: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the level, default INFO
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "entry-guard starting");

    let args = Args::parse();
    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        camera_id = %config.camera_id(),
        window_ms = %config.scan_window_ms(),
        tolerance_ms = %config.tolerance_ms(),
        buffer_seconds = %config.buffer_seconds(),
        zone = ?config.zone(),
        zone_units = ?config.zone_units(),
        clip_dir = %config.clip_dir(),
        clip_encoder = ?config.clip_encoder(),
        events_file = %config.events_file(),
        events_http = %config.events_http_url().is_some(),
        mqtt_enabled = %config.mqtt_enabled(),
        http_port = %config.http_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let metrics = Arc::new(Metrics::new());

    // Event sinks and publisher
    let mut sinks = create_event_sinks(&config).context("failed to build event sinks")?;
    if config.mqtt_enabled() {
        sinks.push(Box::new(MqttEventSink::new(&config)));
    }
    let sink: Box<dyn EventSink> = if sinks.len() == 1 {
        sinks.remove(0)
    } else {
        Box::new(FanoutSink::new(sinks))
    };
    let (publisher, publisher_worker) = create_event_publisher(
        sink,
        RetryPolicy::from_config(&config),
        metrics.clone(),
        config.events_queue_size(),
    );
    let publisher_task = tokio::spawn(publisher_worker.run());

    // Clip exporter
    let clip_sink = Arc::from(create_clip_sink(&config));
    let (clip_queue, exporter) =
        create_clip_exporter(clip_sink, publisher.clone(), metrics.clone(), CLIP_QUEUE_SIZE);
    let exporter_task = tokio::spawn(exporter.run());

    let trigger = TriggerSlot::new();
    let status = Arc::new(ScanStatusBoard::new());

    // Control endpoint (if port > 0)
    let http_port = config.http_port();
    if http_port > 0 {
        let ctx = Arc::new(ControlContext {
            trigger: trigger.clone(),
            status: status.clone(),
            metrics: metrics.clone(),
            camera_id: config.camera_id().to_string(),
            events_file: PathBuf::from(config.events_file()),
            clip_dir: PathBuf::from(config.clip_dir()),
        });
        let bind_address = config.http_bind_address().to_string();
        let server_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_control_server(&bind_address, http_port, ctx, server_shutdown).await
            {
                error!(error = %e, "control_server_error");
            }
        });
    }

    // Periodic metrics summary
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Frame source
    let replay_path = args
        .replay
        .or_else(|| config.replay_path().map(str::to_string))
        .context("no frame source configured: set replay.path or pass --replay")?;
    let feed = ReplayFeed::load(&replay_path)?;
    let (source, mut tracker) = feed.split(trigger.clone(), config.replay_realtime());
    let mut source = source.with_metrics(metrics.clone());

    let outputs = FrameLoopOutputs { clips: clip_queue, publisher, status };
    let mut frame_loop =
        FrameLoop::new(&config, source.frame_rate(), trigger, outputs, metrics.clone());

    // Handle shutdown on Ctrl+C
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = signal_tx.send(true);
    });

    let outcome = frame_loop.run(&mut source, &mut tracker, shutdown_rx).await;

    // Closing the queues lets the workers drain and exit
    drop(frame_loop);
    if let Err(e) = exporter_task.await {
        error!(error = %e, "clip_exporter_join_error");
    }
    if let Err(e) = publisher_task.await {
        error!(error = %e, "event_publisher_join_error");
    }
    let _ = shutdown_tx.send(true);

    metrics.report().log();
    let frames = outcome.context("frame source failed")?;
    info!(frames = %frames, "entry-guard shutdown complete");
    Ok(())
}
