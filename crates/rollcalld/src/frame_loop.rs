//! Frame loop orchestrator.
//!
//! One task drives everything: a polling interval requests observations
//! from the engine, matches each detection against the roster, marks
//! attendance, and feeds the enrollment workflow; operator commands arrive
//! on an mpsc channel and interleave with ticks on the same task. The
//! enrollment phase is the sole guard against double captures — nothing
//! here assumes ticks are serialized with respect to the engine's async
//! work.
//!
//! Tick order matters: known faces are matched and marked before the
//! unknown-face check, so one stray unknown face in a crowd never
//! interrupts ongoing recognition with a prompt.

use crate::engine::{EngineHandle, Observation};
use crate::enroll::Enrollment;
use crate::ledger::AttendanceLedger;
use crate::roster::{self, RosterClient};
use rollcall_core::{best_match, BoundingBox, MatchOutcome, RosterEntry};
use rollcall_hw::Frame;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};

/// Overlay annotation for one detected face, republished every tick.
#[derive(Debug, Clone, Serialize)]
pub struct Annotation {
    pub bbox: BoundingBox,
    pub label: String,
    pub known: bool,
}

/// Everything the loop mutates, gathered in one place — no ambient
/// globals. The ledger's name set and the enrollment phase are the only
/// cross-tick state.
pub struct SessionState {
    pub roster: Vec<RosterEntry>,
    pub ledger: AttendanceLedger,
    pub enrollment: Enrollment,
}

/// Operator actions, forwarded from the D-Bus interface.
pub enum OperatorCommand {
    SubmitEnrollment {
        name: String,
        reply: oneshot::Sender<Result<(), String>>,
    },
    CancelEnrollment {
        reply: oneshot::Sender<bool>,
    },
    ClearAttendance {
        reply: oneshot::Sender<Result<(), String>>,
    },
    ListAbsent {
        reply: oneshot::Sender<Vec<String>>,
    },
    ExportReport {
        reply: oneshot::Sender<String>,
    },
    Status {
        reply: oneshot::Sender<String>,
    },
}

/// Clone-safe handle used by the D-Bus layer to reach the loop task.
#[derive(Clone)]
pub struct LoopHandle {
    tx: mpsc::Sender<OperatorCommand>,
}

impl LoopHandle {
    pub fn new(tx: mpsc::Sender<OperatorCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> OperatorCommand,
    ) -> Result<T, String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| "frame loop exited".to_string())?;
        reply_rx.await.map_err(|_| "frame loop exited".to_string())
    }

    pub async fn submit_enrollment(&self, name: String) -> Result<(), String> {
        self.request(|reply| OperatorCommand::SubmitEnrollment { name, reply })
            .await?
    }

    pub async fn cancel_enrollment(&self) -> Result<bool, String> {
        self.request(|reply| OperatorCommand::CancelEnrollment { reply })
            .await
    }

    pub async fn clear_attendance(&self) -> Result<(), String> {
        self.request(|reply| OperatorCommand::ClearAttendance { reply })
            .await?
    }

    pub async fn list_absent(&self) -> Result<Vec<String>, String> {
        self.request(|reply| OperatorCommand::ListAbsent { reply })
            .await
    }

    pub async fn export_report(&self) -> Result<String, String> {
        self.request(|reply| OperatorCommand::ExportReport { reply })
            .await
    }

    pub async fn status(&self) -> Result<String, String> {
        self.request(|reply| OperatorCommand::Status { reply }).await
    }
}

pub struct FrameLoop {
    session: SessionState,
    engine: EngineHandle,
    roster_client: RosterClient,
    annotations: watch::Sender<Vec<Annotation>>,
    match_threshold: f32,
    debounce: Duration,
    /// Most recent frame, kept so a debounced capture crops from the
    /// freshest image rather than the one that triggered it.
    last_frame: Option<Frame>,
}

impl FrameLoop {
    pub fn new(
        session: SessionState,
        engine: EngineHandle,
        roster_client: RosterClient,
        annotations: watch::Sender<Vec<Annotation>>,
        match_threshold: f32,
        debounce: Duration,
    ) -> Self {
        Self {
            session,
            engine,
            roster_client,
            annotations,
            match_threshold,
            debounce,
            last_frame: None,
        }
    }

    /// Run until every command sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<OperatorCommand>, poll: Duration) {
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
            }
        }
        tracing::info!("frame loop exiting");
    }

    /// One polling tick. Engine failures abort this tick only — no error
    /// here may ever take the loop down.
    async fn tick(&mut self) {
        match self.engine.observe().await {
            Ok(obs) => self.process_observation(obs, Instant::now()),
            Err(e) => tracing::warn!(error = %e, "observation failed; skipping tick"),
        }
    }

    /// Core per-tick pipeline, separated from the engine call so tests can
    /// feed scripted observations with a controlled clock.
    fn process_observation(&mut self, obs: Observation, now: Instant) {
        let detections = obs.detections;
        self.last_frame = Some(obs.frame);

        // Nothing can match before the roster is loaded; publish a cleared
        // overlay and skip matching and enrollment entirely.
        if self.session.roster.is_empty() {
            let _ = self.annotations.send(Vec::new());
            return;
        }

        let mut annotations = Vec::with_capacity(detections.len());
        let mut any_known = false;

        for det in &detections {
            match best_match(&det.embedding, &self.session.roster, self.match_threshold) {
                MatchOutcome::Known { name, distance } => {
                    any_known = true;
                    if self.session.ledger.mark_present(&name) {
                        tracing::info!(name = %name, distance, "marked present");
                    }
                    annotations.push(Annotation {
                        bbox: det.bbox.clone(),
                        label: name,
                        known: true,
                    });
                }
                MatchOutcome::Unknown { best_distance } => {
                    tracing::debug!(best_distance, "unmatched face");
                    annotations.push(Annotation {
                        bbox: det.bbox.clone(),
                        label: "unknown".to_string(),
                        known: false,
                    });
                }
            }
        }

        // Cleared and redrawn every tick, matched or not.
        let _ = self.annotations.send(annotations);

        // Enrollment triggers only when the whole frame is unrecognized:
        // faces were present and none of them matched.
        if !any_known && self.session.enrollment.is_idle() {
            let largest = detections.iter().max_by(|a, b| {
                a.bbox
                    .area()
                    .partial_cmp(&b.bbox.area())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            if let Some(largest) = largest {
                if self
                    .session
                    .enrollment
                    .begin_capture(largest.bbox.clone(), now, self.debounce)
                {
                    tracing::info!("unknown face: enrollment capture scheduled");
                }
            }
        }

        // Finalize a capture whose debounce has elapsed, cropping from the
        // freshest frame.
        if let Some(frame) = &self.last_frame {
            match self.session.enrollment.poll_debounce(frame, now) {
                Ok(true) => tracing::info!("enrollment prompt opened"),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "capture finalize failed; enrollment reset");
                    self.session.enrollment.cancel();
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: OperatorCommand) {
        match cmd {
            OperatorCommand::SubmitEnrollment { name, reply } => {
                let _ = reply.send(self.submit_enrollment(&name).await);
            }
            OperatorCommand::CancelEnrollment { reply } => {
                let cancelled = self.session.enrollment.cancel();
                if cancelled {
                    tracing::info!("enrollment cancelled by operator");
                }
                let _ = reply.send(cancelled);
            }
            OperatorCommand::ClearAttendance { reply } => {
                let result = self
                    .session
                    .ledger
                    .clear()
                    .map_err(|e| format!("clear failed: {e}"));
                if result.is_ok() {
                    tracing::info!("attendance cleared");
                }
                let _ = reply.send(result);
            }
            OperatorCommand::ListAbsent { reply } => {
                let _ = reply.send(self.session.ledger.list_absent(&self.roster_names()));
            }
            OperatorCommand::ExportReport { reply } => {
                let _ = reply.send(self.session.ledger.export_report(&self.roster_names()));
            }
            OperatorCommand::Status { reply } => {
                let _ = reply.send(self.status_json());
            }
        }
    }

    /// `AwaitingInput → Submitting → Idle`. On store acknowledgment the
    /// session re-initializes: a brand-new identity changes the matching
    /// universe, so the roster is reloaded and the ledger re-synced.
    async fn submit_enrollment(&mut self, name: &str) -> Result<(), String> {
        let (name, jpeg) = self
            .session
            .enrollment
            .submit(name)
            .map_err(|e| e.to_string())?;

        match self.roster_client.register(&name, jpeg).await {
            Ok(()) => {
                self.session.enrollment.complete();
                tracing::info!(name = %name, "enrolled");

                match roster::load_roster(&self.roster_client, &self.engine).await {
                    Ok(roster) => self.session.roster = roster,
                    Err(e) => {
                        tracing::warn!(error = %e, "roster reload failed; keeping previous roster");
                    }
                }
                self.session.ledger.sync_from_store();
                Ok(())
            }
            Err(e) => {
                self.session.enrollment.fail();
                tracing::warn!(name = %name, error = %e, "enrollment failed");
                Err(format!("enrollment failed: {e}"))
            }
        }
    }

    fn roster_names(&self) -> Vec<String> {
        self.session.roster.iter().map(|e| e.name.clone()).collect()
    }

    fn status_json(&self) -> String {
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "roster_size": self.session.roster.len(),
            "present_count": self.session.ledger.present_count(),
            "enrollment": self.session.enrollment.phase_label(),
            "pending_preview": self.session.enrollment.preview_path()
                .map(|p| p.display().to_string()),
        })
        .to_string()
    }
}
