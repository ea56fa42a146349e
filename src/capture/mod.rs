//! Screen Capture Layer
//!
//! Acquires full-window frames of the tracked target. The pipeline only sees
//! the [`FrameSource`] contract; [`window::WindowSource`] is the xcap-backed
//! implementation used by the binary.

pub mod frame;
pub mod geometry;
pub mod window;

use thiserror::Error;

pub use frame::Frame;
pub use geometry::{InvalidGeometry, RelativeRect, ScreenRect};
pub use window::{list_window_titles, WindowSource};

/// Errors reported by a frame source
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Target window is missing, minimized or has no visible area
    #[error("capture target unavailable: {0}")]
    Unavailable(String),
    /// The platform capture call itself failed
    #[error("capture backend failed: {0}")]
    Backend(String),
}

/// Window bounds in screen space: (x, y, width, height)
pub type WindowBounds = (i32, i32, u32, u32);

/// Produces full frames of the capture target.
///
/// Implementations must report a missing or minimized target as
/// [`CaptureError::Unavailable`] rather than failing in any other way.
pub trait FrameSource: Send {
    /// Capture one full frame together with the target's screen origin and size
    fn capture(&mut self) -> Result<Frame, CaptureError>;

    /// Current screen-space bounds of the target
    fn target_bounds(&mut self) -> Result<WindowBounds, CaptureError>;

    /// Short description for logging
    fn describe(&self) -> String {
        "frame source".to_string()
    }
}
