// THEORY:
// A single error type for the whole engine. Most per-frame problems (a missed
// ellipse, a contour that cannot be fitted) are recovered locally and never reach
// this enum; what remains are the conditions a caller must see: a sampling region
// with no pixels, buffers of the wrong shape, a frame source that broke, and bad
// configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// The sampling mask selected zero pixels, so no mean can be computed.
    #[error("sampling region is empty: mask selects zero pixels")]
    EmptyRegion,

    /// The mask and the frame it is applied to disagree on size.
    #[error("mask is {mask_width}x{mask_height} but frame is {frame_width}x{frame_height}")]
    MaskSizeMismatch {
        mask_width: u32,
        mask_height: u32,
        frame_width: u32,
        frame_height: u32,
    },

    /// A raw pixel buffer does not match the declared frame shape.
    #[error("frame buffer holds {got} bytes, expected {expected}")]
    FrameSizeMismatch { expected: usize, got: usize },

    /// Every recent frame produced an empty sampling region.
    #[error("sampling region has been empty for {frames} consecutive frames")]
    PersistentEmptyRegion { frames: u32 },

    #[error("frame source failed: {0}")]
    FrameSource(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    /// A capture or analysis task panicked or was cancelled.
    #[error("stream task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
