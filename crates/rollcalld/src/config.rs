use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Base URL of the roster store HTTP service.
    pub roster_url: String,
    /// Path to the attendance ledger JSON document.
    pub ledger_path: PathBuf,
    /// Euclidean distance threshold for a positive match.
    pub match_threshold: f32,
    /// Frame loop polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Delay before an unknown face finalizes an enrollment capture.
    pub debounce_ms: u64,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let ledger_path = std::env::var("ROLLCALL_LEDGER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.json"));

        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            roster_url: std::env::var("ROLLCALL_ROSTER_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            ledger_path,
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", 0.6),
            poll_interval_ms: env_u64("ROLLCALL_POLL_INTERVAL_MS", 200),
            debounce_ms: env_u64("ROLLCALL_DEBOUNCE_MS", 2000),
            warmup_frames: env_usize("ROLLCALL_WARMUP_FRAMES", 4),
        }
    }

    /// Path to the face detection model.
    pub fn detect_model_path(&self) -> String {
        self.model_dir.join("det.onnx").to_string_lossy().into_owned()
    }

    /// Path to the embedding model.
    pub fn embed_model_path(&self) -> String {
        self.model_dir.join("embed.onnx").to_string_lossy().into_owned()
    }

    /// Where the pending unknown-face crop is spooled for operator preview.
    pub fn preview_path(&self) -> PathBuf {
        self.ledger_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(std::env::temp_dir)
            .join("pending-face.jpg")
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
