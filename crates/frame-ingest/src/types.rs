use thiserror::Error;

/// Decoded RGB frame produced by a frame source.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy)]
pub enum FrameFormat {
    Rgb8,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open frame source {uri:?}")]
    Open { uri: String },
    #[error("no readable images under {uri:?}")]
    Empty { uri: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
