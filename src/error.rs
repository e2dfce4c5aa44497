use thiserror::Error;

/// Errors produced by the capture backends and the acquisition task.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No device connected.")]
    NoDevice,

    #[error("compiled without device support")]
    Unsupported,

    #[error("stream error: {0}")]
    Stream(String),

    #[error("device disconnected")]
    Disconnected,

    #[error("option error: {0}")]
    Option(String),

    #[error("initialization failed: {0}")]
    Init(String),

    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[from] std::io::Error),
}
