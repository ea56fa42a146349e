//! Window capture via the xcap crate
//!
//! Finds the target window by title on every call, so a game that restarts
//! or changes its window handle is picked up again without reconfiguration.

use image::DynamicImage;
use tracing::debug;
use xcap::Window;

use super::{CaptureError, Frame, FrameSource, WindowBounds};

/// Captures a top-level window matched by title
pub struct WindowSource {
    title: String,
}

impl WindowSource {
    /// Track the window whose title equals (or else contains) `title`
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    fn find_window(&self) -> Result<Window, CaptureError> {
        let windows = Window::all().map_err(|e| CaptureError::Backend(e.to_string()))?;

        let mut partial = None;
        for window in windows {
            let Ok(title) = window.title() else {
                continue;
            };
            if title == self.title {
                return Ok(window);
            }
            if partial.is_none() && title.contains(&self.title) {
                partial = Some(window);
            }
        }

        partial.ok_or_else(|| {
            CaptureError::Unavailable(format!("no window titled '{}'", self.title))
        })
    }

    fn bounds_of(window: &Window) -> Result<WindowBounds, CaptureError> {
        if window.is_minimized().unwrap_or(false) {
            return Err(CaptureError::Unavailable("window is minimized".to_string()));
        }

        let backend = |e: xcap::XCapError| CaptureError::Backend(e.to_string());
        let x = window.x().map_err(backend)?;
        let y = window.y().map_err(backend)?;
        let width = window.width().map_err(backend)?;
        let height = window.height().map_err(backend)?;

        if width == 0 || height == 0 {
            return Err(CaptureError::Unavailable(format!(
                "window has no visible area ({width}x{height})"
            )));
        }

        Ok((x, y, width, height))
    }
}

impl FrameSource for WindowSource {
    fn capture(&mut self) -> Result<Frame, CaptureError> {
        let window = self.find_window()?;
        let (x, y, width, height) = Self::bounds_of(&window)?;

        let image = window
            .capture_image()
            .map_err(|e| CaptureError::Backend(e.to_string()))?;

        if image.width() == 0 || image.height() == 0 {
            return Err(CaptureError::Unavailable("captured an empty image".to_string()));
        }

        debug!(
            "Captured '{}' {}x{} at ({}, {})",
            self.title,
            image.width(),
            image.height(),
            x,
            y
        );

        Ok(Frame::new(
            DynamicImage::ImageRgba8(image),
            (x, y),
            (width, height),
        ))
    }

    fn target_bounds(&mut self) -> Result<WindowBounds, CaptureError> {
        let window = self.find_window()?;
        Self::bounds_of(&window)
    }

    fn describe(&self) -> String {
        format!("window '{}'", self.title)
    }
}

/// Titles of all capturable, non-minimized windows
pub fn list_window_titles() -> Result<Vec<String>, CaptureError> {
    let windows = Window::all().map_err(|e| CaptureError::Backend(e.to_string()))?;

    Ok(windows
        .iter()
        .filter(|w| !w.is_minimized().unwrap_or(false))
        .filter_map(|w| w.title().ok())
        .filter(|t| !t.trim().is_empty())
        .collect())
}
