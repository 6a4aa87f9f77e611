//! Capture/inference engine on a dedicated OS thread.
//!
//! The camera and the ONNX recognizer are not async-friendly, so they live
//! on their own thread behind an mpsc request channel. The frame loop and
//! roster loader talk to it through the clone-safe [`EngineHandle`].

use rollcall_core::{Detection, Embedding, Recognizer};
use rollcall_hw::{Camera, Frame};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] rollcall_hw::CameraError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] rollcall_core::RecognizerError),
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// One frame's worth of observation: the frame itself plus every face
/// detected in it. A dark frame yields zero detections.
pub struct Observation {
    pub frame: Frame,
    pub detections: Vec<Detection>,
}

/// Messages sent from async tasks to the engine thread.
enum EngineRequest {
    Observe {
        reply: oneshot::Sender<Result<Observation, EngineError>>,
    },
    EmbedImage {
        jpeg: Vec<u8>,
        reply: oneshot::Sender<Result<Option<Embedding>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Capture one frame and detect every face in it.
    pub async fn observe(&self) -> Result<Observation, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Observe { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Build a reference embedding from a JPEG enrollment image.
    /// `None` when the image contains no usable face.
    pub async fn embed_image(&self, jpeg: Vec<u8>) -> Result<Option<Embedding>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::EmbedImage {
                jpeg,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Handle not backed by a running thread. Requests fail with
    /// `ChannelClosed`; only useful for orchestrator tests.
    #[cfg(test)]
    pub(crate) fn disconnected() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the camera, loads the recognizer, and discards warmup frames
/// before entering the request loop. Fails fast if the camera or a model
/// is unavailable — there is no point running the daemon without them.
pub fn spawn_engine(
    camera_device: &str,
    recognizer: Box<dyn Recognizer>,
    warmup_frames: usize,
) -> Result<EngineHandle, EngineError> {
    let camera = Camera::open(camera_device)?;
    tracing::info!(
        device = camera_device,
        width = camera.width,
        height = camera.height,
        "camera opened"
    );

    if warmup_frames > 0 {
        tracing::info!(count = warmup_frames, "discarding warmup frames");
        camera.discard_warmup_frames(warmup_frames);
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            let mut recognizer = recognizer;
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Observe { reply } => {
                        let _ = reply.send(run_observe(&camera, recognizer.as_mut()));
                    }
                    EngineRequest::EmbedImage { jpeg, reply } => {
                        let _ = reply.send(run_embed_image(recognizer.as_mut(), &jpeg));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

fn run_observe(
    camera: &Camera,
    recognizer: &mut dyn Recognizer,
) -> Result<Observation, EngineError> {
    let frame = camera.capture_frame()?;

    // Covered lens or lights-out: skip inference, report an empty frame.
    if frame.is_dark {
        tracing::debug!(seq = frame.sequence, "dark frame, skipping detection");
        return Ok(Observation {
            frame,
            detections: Vec::new(),
        });
    }

    let detections = recognizer.detect_all(&frame.data, frame.width, frame.height)?;
    Ok(Observation { frame, detections })
}

fn run_embed_image(
    recognizer: &mut dyn Recognizer,
    jpeg: &[u8],
) -> Result<Option<Embedding>, EngineError> {
    let gray = image::load_from_memory(jpeg)?.to_luma8();
    Ok(recognizer.embed_reference(&gray)?)
}
