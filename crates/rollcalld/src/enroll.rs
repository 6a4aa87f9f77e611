//! Enrollment workflow — capture an unknown face, ask for a name, store it.
//!
//! Explicit state machine: `Idle → Capturing → AwaitingInput → Submitting
//! → Idle`, with cancel and failure edges back to `Idle`. The phase field
//! is the single guard that keeps at most one enrollment in flight; the
//! frame loop must only call [`Enrollment::begin_capture`] when
//! [`Enrollment::is_idle`] holds, and the transition happens synchronously
//! inside that call so overlapping ticks cannot both start a capture.

use image::codecs::jpeg::JpegEncoder;
use rollcall_core::BoundingBox;
use rollcall_hw::Frame;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("no enrollment awaiting input")]
    NotAwaitingInput,
    #[error("frame buffer does not match its dimensions")]
    BadFrame,
    #[error("image encode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// The captured unknown face, held while the operator types a name.
/// Discarded on cancel and on submission failure.
#[derive(Debug, Clone)]
pub struct PendingCapture {
    pub id: Uuid,
    pub jpeg: Vec<u8>,
    pub bbox: BoundingBox,
}

#[derive(Debug)]
enum Phase {
    Idle,
    /// Debouncing: an unknown face was seen; wait out the delay before
    /// committing to a capture, so a transient misdetection does not
    /// spam the operator with prompts.
    Capturing { bbox: BoundingBox, deadline: Instant },
    AwaitingInput { capture: PendingCapture },
    Submitting { capture: PendingCapture },
}

pub struct Enrollment {
    phase: Phase,
    /// Where the pending crop is spooled so the operator can look at the
    /// face they are naming. Best-effort; failures only log.
    preview_path: Option<PathBuf>,
}

impl Enrollment {
    pub fn new(preview_path: Option<PathBuf>) -> Self {
        Self {
            phase: Phase::Idle,
            preview_path,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    pub fn is_awaiting_input(&self) -> bool {
        matches!(self.phase, Phase::AwaitingInput { .. })
    }

    /// Spool path of the pending crop, when one is awaiting a name.
    pub fn preview_path(&self) -> Option<&std::path::Path> {
        if self.is_awaiting_input() {
            self.preview_path.as_deref()
        } else {
            None
        }
    }

    pub fn phase_label(&self) -> &'static str {
        match self.phase {
            Phase::Idle => "idle",
            Phase::Capturing { .. } => "capturing",
            Phase::AwaitingInput { .. } => "awaiting-input",
            Phase::Submitting { .. } => "submitting",
        }
    }

    /// `Idle → Capturing`. Returns false (and does nothing) when an
    /// enrollment is already in flight.
    pub fn begin_capture(&mut self, bbox: BoundingBox, now: Instant, debounce: Duration) -> bool {
        if !self.is_idle() {
            return false;
        }
        self.phase = Phase::Capturing {
            bbox,
            deadline: now + debounce,
        };
        true
    }

    /// Drive the debounce: once the deadline has passed, crop the recorded
    /// box out of the most recent frame and move to `AwaitingInput`.
    ///
    /// The face may have moved or left since the capture was scheduled;
    /// the crop is clamped to frame bounds and taken best-effort.
    /// Returns true when the prompt was opened on this call.
    pub fn poll_debounce(&mut self, frame: &Frame, now: Instant) -> Result<bool, EnrollError> {
        let Phase::Capturing { bbox, deadline } = &self.phase else {
            return Ok(false);
        };
        if now < *deadline {
            return Ok(false);
        }

        let bbox = bbox.clone();
        let jpeg = crop_to_jpeg(frame, &bbox)?;
        let capture = PendingCapture {
            id: Uuid::new_v4(),
            jpeg,
            bbox,
        };

        if let Some(path) = &self.preview_path {
            if let Err(e) = std::fs::write(path, &capture.jpeg) {
                tracing::warn!(path = %path.display(), error = %e, "preview spool failed");
            }
        }

        tracing::info!(capture = %capture.id, "enrollment awaiting operator input");
        self.phase = Phase::AwaitingInput { capture };
        Ok(true)
    }

    /// `AwaitingInput → Submitting`. Rejects an empty (after trim) name
    /// without changing state; the caller performs the store upload and
    /// then resolves with [`Enrollment::complete`] or [`Enrollment::fail`].
    pub fn submit(&mut self, name: &str) -> Result<(String, Vec<u8>), EnrollError> {
        let Phase::AwaitingInput { capture } = &self.phase else {
            return Err(EnrollError::NotAwaitingInput);
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(EnrollError::EmptyName);
        }

        let capture = capture.clone();
        let jpeg = capture.jpeg.clone();
        self.phase = Phase::Submitting { capture };
        Ok((name.to_string(), jpeg))
    }

    /// `Submitting → Idle` on store acknowledgment.
    pub fn complete(&mut self) {
        self.discard();
    }

    /// `Submitting → Idle` on store failure. The capture is discarded;
    /// the roster is untouched.
    pub fn fail(&mut self) {
        self.discard();
    }

    /// Operator closed the prompt: interrupt `Capturing` or
    /// `AwaitingInput` and return to `Idle`. Returns false when there was
    /// nothing to cancel (`Idle`, or an upload already in flight).
    pub fn cancel(&mut self) -> bool {
        match self.phase {
            Phase::Capturing { .. } | Phase::AwaitingInput { .. } => {
                self.discard();
                true
            }
            _ => false,
        }
    }

    /// Bounding box of the capture awaiting input, for assertions.
    #[cfg(test)]
    pub(crate) fn pending_bbox(&self) -> Option<BoundingBox> {
        match &self.phase {
            Phase::AwaitingInput { capture } => Some(capture.bbox.clone()),
            _ => None,
        }
    }

    fn discard(&mut self) {
        if let Some(path) = &self.preview_path {
            let _ = std::fs::remove_file(path);
        }
        self.phase = Phase::Idle;
    }
}

/// Crop `bbox` (clamped to frame bounds) out of a grayscale frame and
/// encode it as JPEG.
fn crop_to_jpeg(frame: &Frame, bbox: &BoundingBox) -> Result<Vec<u8>, EnrollError> {
    let img = image::GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
        .ok_or(EnrollError::BadFrame)?;

    let x = (bbox.x.max(0.0) as u32).min(frame.width.saturating_sub(1));
    let y = (bbox.y.max(0.0) as u32).min(frame.height.saturating_sub(1));
    let w = (bbox.width.max(1.0) as u32).min(frame.width - x);
    let h = (bbox.height.max(1.0) as u32).min(frame.height - y);

    let crop = image::imageops::crop_imm(&img, x, y, w, h).to_image();

    let mut jpeg = Vec::new();
    JpegEncoder::new(&mut jpeg).encode_image(&crop)?;
    Ok(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(width: u32, height: u32) -> Frame {
        Frame {
            data: vec![120u8; (width * height) as usize],
            width,
            height,
            timestamp: Instant::now(),
            sequence: 0,
            is_dark: false,
        }
    }

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_begin_capture_only_from_idle() {
        let mut e = Enrollment::new(None);
        let now = Instant::now();
        assert!(e.begin_capture(bbox(0.0, 0.0, 10.0, 10.0), now, Duration::from_secs(2)));
        // Second trigger while capturing must be refused.
        assert!(!e.begin_capture(bbox(5.0, 5.0, 10.0, 10.0), now, Duration::from_secs(2)));
        assert_eq!(e.phase_label(), "capturing");
    }

    #[test]
    fn test_debounce_holds_until_deadline() {
        let mut e = Enrollment::new(None);
        let now = Instant::now();
        e.begin_capture(bbox(2.0, 2.0, 8.0, 8.0), now, Duration::from_secs(2));

        let frame = test_frame(32, 32);
        assert!(!e.poll_debounce(&frame, now + Duration::from_millis(500)).unwrap());
        assert_eq!(e.phase_label(), "capturing");

        assert!(e.poll_debounce(&frame, now + Duration::from_millis(2100)).unwrap());
        assert!(e.is_awaiting_input());
    }

    #[test]
    fn test_debounce_capture_has_image() {
        let mut e = Enrollment::new(None);
        let now = Instant::now();
        e.begin_capture(bbox(0.0, 0.0, 16.0, 16.0), now, Duration::ZERO);
        e.poll_debounce(&test_frame(32, 32), now).unwrap();

        let (_, jpeg) = e.submit("dana").unwrap();
        assert!(!jpeg.is_empty());
    }

    #[test]
    fn test_debounce_survives_departed_face() {
        // Box recorded far outside the current frame: crop is clamped,
        // never a panic.
        let mut e = Enrollment::new(None);
        let now = Instant::now();
        e.begin_capture(bbox(500.0, 500.0, 40.0, 40.0), now, Duration::ZERO);
        assert!(e.poll_debounce(&test_frame(32, 32), now).unwrap());
        assert!(e.is_awaiting_input());
    }

    #[test]
    fn test_submit_empty_name_rejected_state_unchanged() {
        let mut e = Enrollment::new(None);
        let now = Instant::now();
        e.begin_capture(bbox(0.0, 0.0, 10.0, 10.0), now, Duration::ZERO);
        e.poll_debounce(&test_frame(32, 32), now).unwrap();

        assert!(matches!(e.submit(""), Err(EnrollError::EmptyName)));
        assert!(matches!(e.submit("   "), Err(EnrollError::EmptyName)));
        assert!(e.is_awaiting_input());

        // A real name still goes through afterwards.
        let (name, _) = e.submit("  dana ").unwrap();
        assert_eq!(name, "dana");
        assert_eq!(e.phase_label(), "submitting");
    }

    #[test]
    fn test_submit_without_pending_capture() {
        let mut e = Enrollment::new(None);
        assert!(matches!(e.submit("dana"), Err(EnrollError::NotAwaitingInput)));
    }

    #[test]
    fn test_complete_returns_to_idle() {
        let mut e = Enrollment::new(None);
        let now = Instant::now();
        e.begin_capture(bbox(0.0, 0.0, 10.0, 10.0), now, Duration::ZERO);
        e.poll_debounce(&test_frame(32, 32), now).unwrap();
        e.submit("dana").unwrap();
        e.complete();
        assert!(e.is_idle());
    }

    #[test]
    fn test_fail_discards_and_returns_to_idle() {
        let mut e = Enrollment::new(None);
        let now = Instant::now();
        e.begin_capture(bbox(0.0, 0.0, 10.0, 10.0), now, Duration::ZERO);
        e.poll_debounce(&test_frame(32, 32), now).unwrap();
        e.submit("dana").unwrap();
        e.fail();
        assert!(e.is_idle());
        // Capture was discarded: nothing to submit anymore.
        assert!(e.submit("dana").is_err());
    }

    #[test]
    fn test_cancel_during_capturing_and_awaiting() {
        let mut e = Enrollment::new(None);
        let now = Instant::now();

        e.begin_capture(bbox(0.0, 0.0, 10.0, 10.0), now, Duration::from_secs(2));
        assert!(e.cancel());
        assert!(e.is_idle());

        e.begin_capture(bbox(0.0, 0.0, 10.0, 10.0), now, Duration::ZERO);
        e.poll_debounce(&test_frame(32, 32), now).unwrap();
        assert!(e.cancel());
        assert!(e.is_idle());

        // Nothing left to cancel.
        assert!(!e.cancel());
    }

    #[test]
    fn test_preview_spooled_and_removed() {
        let path = std::env::temp_dir().join(format!("rollcall-preview-{}.jpg", Uuid::new_v4()));
        let mut e = Enrollment::new(Some(path.clone()));
        let now = Instant::now();
        e.begin_capture(bbox(0.0, 0.0, 10.0, 10.0), now, Duration::ZERO);
        e.poll_debounce(&test_frame(32, 32), now).unwrap();
        assert!(path.exists());

        e.cancel();
        assert!(!path.exists());
    }
}
