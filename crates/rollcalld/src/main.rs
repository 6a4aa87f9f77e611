use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod enroll;
mod frame_loop;
mod ledger;
mod roster;

use config::Config;
use dbus_interface::AttendanceService;
use enroll::Enrollment;
use frame_loop::{FrameLoop, LoopHandle, SessionState};
use ledger::{AttendanceLedger, JsonFileStore};
use roster::RosterClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");
    let config = Config::from_env();

    // Camera and models are non-negotiable: fail fast so a permission
    // problem surfaces once at startup instead of once per tick.
    let recognizer = rollcall_core::OnnxRecognizer::load(
        &config.detect_model_path(),
        &config.embed_model_path(),
    )
    .context("failed to load recognizer models")?;
    let engine = engine::spawn_engine(
        &config.camera_device,
        Box::new(recognizer),
        config.warmup_frames,
    )
    .context("failed to start capture engine")?;

    let roster_client = RosterClient::new(config.roster_url.clone());
    let roster = match roster::load_roster(&roster_client, &engine).await {
        Ok(roster) => roster,
        Err(e) => {
            tracing::warn!(error = %e, "roster load failed; starting with empty roster");
            Vec::new()
        }
    };

    let mut ledger = AttendanceLedger::new(Box::new(JsonFileStore::new(
        config.ledger_path.clone(),
    )));
    ledger.sync_from_store();

    let session = SessionState {
        roster,
        ledger,
        enrollment: Enrollment::new(Some(config.preview_path())),
    };

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (ann_tx, ann_rx) = watch::channel(Vec::new());
    let frame_loop = FrameLoop::new(
        session,
        engine,
        roster_client,
        ann_tx,
        config.match_threshold,
        Duration::from_millis(config.debounce_ms),
    );
    tokio::spawn(frame_loop.run(cmd_rx, Duration::from_millis(config.poll_interval_ms)));

    let _conn = zbus::connection::Builder::session()?
        .name("org.rollcall.Attendance1")?
        .serve_at(
            "/org/rollcall/Attendance1",
            AttendanceService {
                handle: LoopHandle::new(cmd_tx),
                annotations: ann_rx,
            },
        )?
        .build()
        .await
        .context("failed to register D-Bus service")?;

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
