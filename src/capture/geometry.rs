//! Screen and frame-relative rectangles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest accepted region side, in pixels
pub const MAX_REGION_SIDE: u32 = 10_000;

/// Rejected region geometry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid region geometry: {0}")]
pub struct InvalidGeometry(pub String);

/// A rectangle in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenRect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl ScreenRect {
    /// Create a validated rectangle (`left >= 0`, `top >= 0`, `0 < size <= 10000`)
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Result<Self, InvalidGeometry> {
        let rect = Self {
            left,
            top,
            width,
            height,
        };
        rect.validate()?;
        Ok(rect)
    }

    /// Check the selection invariants
    pub fn validate(&self) -> Result<(), InvalidGeometry> {
        if self.left < 0 || self.top < 0 {
            return Err(InvalidGeometry(format!(
                "origin ({}, {}) is negative",
                self.left, self.top
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(InvalidGeometry(format!(
                "size {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.width > MAX_REGION_SIDE || self.height > MAX_REGION_SIDE {
            return Err(InvalidGeometry(format!(
                "size {}x{} exceeds {MAX_REGION_SIDE}px",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Translate into the coordinate space of a frame whose origin is `origin`
    pub fn relative_to(&self, origin: (i32, i32)) -> RelativeRect {
        RelativeRect {
            x: i64::from(self.left) - i64::from(origin.0),
            y: i64::from(self.top) - i64::from(origin.1),
            width: self.width,
            height: self.height,
        }
    }
}

impl fmt::Display for ScreenRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{} {}x{}",
            self.left, self.top, self.width, self.height
        )
    }
}

/// Parses `x,y,w,h`
impl FromStr for ScreenRect {
    type Err = InvalidGeometry;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
        if parts.len() != 4 {
            return Err(InvalidGeometry(format!(
                "expected 'x,y,width,height', got '{s}'"
            )));
        }
        let bad = |p: &str| InvalidGeometry(format!("'{p}' is not a valid coordinate"));
        let left = parts[0].parse::<i32>().map_err(|_| bad(parts[0]))?;
        let top = parts[1].parse::<i32>().map_err(|_| bad(parts[1]))?;
        let width = parts[2].parse::<u32>().map_err(|_| bad(parts[2]))?;
        let height = parts[3].parse::<u32>().map_err(|_| bad(parts[3]))?;
        Self::new(left, top, width, height)
    }
}

/// A rectangle relative to a frame's top-left corner. May lie outside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl RelativeRect {
    /// True when the rectangle is non-empty and entirely inside `width` x `height`
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x >= 0
            && self.y >= 0
            && self.x + i64::from(self.width) <= i64::from(width)
            && self.y + i64::from(self.height) <= i64::from(height)
    }
}
