//! Tracked screen regions
//!
//! A region owns its display sink and the last image that was accepted for
//! recognition. Regions are kept in insertion order.

use image::DynamicImage;
use std::fmt;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::capture::{InvalidGeometry, ScreenRect};
use crate::display::DisplaySink;

#[derive(Debug, Error)]
pub enum RegionError {
    #[error(transparent)]
    InvalidGeometry(#[from] InvalidGeometry),

    #[error("region '{0}' not found")]
    NotFound(RegionId),
}

/// Short opaque region identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(String);

impl RegionId {
    /// Fresh 8-character id
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

pub struct Region {
    id: RegionId,
    rect: ScreenRect,
    enabled: bool,
    last_image: Option<DynamicImage>,
    last_text: Option<String>,
    sink: Box<dyn DisplaySink>,
}

impl Region {
    pub fn id(&self) -> &RegionId {
        &self.id
    }

    pub fn rect(&self) -> ScreenRect {
        self.rect
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Last image accepted for recognition
    pub fn last_image(&self) -> Option<&DynamicImage> {
        self.last_image.as_ref()
    }

    /// Replace the cached image wholesale
    pub fn adopt_image(&mut self, image: DynamicImage) {
        self.last_image = Some(image);
    }

    /// Text most recently delivered to the sink
    pub fn last_text(&self) -> Option<&str> {
        self.last_text.as_deref()
    }

    pub fn deliver(&mut self, text: &str) {
        self.sink.update_text(text);
        self.last_text = Some(text.to_string());
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("rect", &self.rect)
            .field("enabled", &self.enabled)
            .field("has_image", &self.last_image.is_some())
            .finish()
    }
}

/// Copy of a region's geometry taken at the start of a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSnapshot {
    pub id: RegionId,
    pub rect: ScreenRect,
    pub enabled: bool,
}

#[derive(Debug, Default)]
pub struct RegionStore {
    regions: Vec<Region>,
}

impl RegionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new region under a fresh id
    pub fn add(&mut self, rect: ScreenRect, sink: Box<dyn DisplaySink>) -> Result<RegionId, RegionError> {
        self.add_with(rect, |_| sink)
    }

    /// Like [`add`](Self::add), building the sink once the id is known
    pub fn add_with<F>(&mut self, rect: ScreenRect, make_sink: F) -> Result<RegionId, RegionError>
    where
        F: FnOnce(&RegionId) -> Box<dyn DisplaySink>,
    {
        let mut id = RegionId::generate();
        while self.position(&id).is_some() {
            id = RegionId::generate();
        }
        let sink = make_sink(&id);
        self.insert(id.clone(), rect, sink)?;
        Ok(id)
    }

    /// Track a region under a caller-chosen id, replacing any region with that id
    pub fn insert(
        &mut self,
        id: RegionId,
        rect: ScreenRect,
        sink: Box<dyn DisplaySink>,
    ) -> Result<(), RegionError> {
        rect.validate()?;

        let region = Region {
            id: id.clone(),
            rect,
            enabled: true,
            last_image: None,
            last_text: None,
            sink,
        };

        match self.position(&id) {
            Some(idx) => {
                let mut old = std::mem::replace(&mut self.regions[idx], region);
                old.sink.close();
            }
            None => self.regions.push(region),
        }

        info!("Region {} added at {}", id, rect);
        Ok(())
    }

    fn position(&self, id: &RegionId) -> Option<usize> {
        self.regions.iter().position(|r| &r.id == id)
    }

    pub fn get(&self, id: &RegionId) -> Option<&Region> {
        self.regions.iter().find(|r| &r.id == id)
    }

    pub fn get_mut(&mut self, id: &RegionId) -> Option<&mut Region> {
        self.regions.iter_mut().find(|r| &r.id == id)
    }

    /// Move or resize a region; invalid geometry leaves it unchanged
    pub fn set_rect(&mut self, id: &RegionId, rect: ScreenRect) -> Result<(), RegionError> {
        rect.validate()?;
        let region = self
            .get_mut(id)
            .ok_or_else(|| RegionError::NotFound(id.clone()))?;
        region.rect = rect;
        Ok(())
    }

    pub fn set_enabled(&mut self, id: &RegionId, enabled: bool) -> Result<(), RegionError> {
        let region = self
            .get_mut(id)
            .ok_or_else(|| RegionError::NotFound(id.clone()))?;
        region.enabled = enabled;
        Ok(())
    }

    /// Stop tracking a region, closing its sink and dropping its cached image
    pub fn remove(&mut self, id: &RegionId) -> Result<(), RegionError> {
        let idx = self
            .position(id)
            .ok_or_else(|| RegionError::NotFound(id.clone()))?;
        let mut region = self.regions.remove(idx);
        region.sink.close();
        info!("Region {} removed", id);
        Ok(())
    }

    /// Remove every region
    pub fn clear(&mut self) {
        for mut region in self.regions.drain(..) {
            region.sink.close();
        }
    }

    pub fn snapshot(&self) -> Vec<RegionSnapshot> {
        self.regions
            .iter()
            .map(|r| RegionSnapshot {
                id: r.id.clone(),
                rect: r.rect,
                enabled: r.enabled,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.regions.iter().filter(|r| r.enabled).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    fn rect(left: i32, top: i32, width: u32, height: u32) -> ScreenRect {
        ScreenRect {
            left,
            top,
            width,
            height,
        }
    }

    #[test]
    fn test_generated_ids_are_short() {
        let id = RegionId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert_ne!(id, RegionId::generate());
    }

    #[test]
    fn test_add_validates_geometry() {
        let mut store = RegionStore::new();
        assert!(store.add(rect(10, 10, 100, 50), Box::new(RecordingSink::new())).is_ok());
        assert!(matches!(
            store.add(rect(-1, 10, 100, 50), Box::new(RecordingSink::new())),
            Err(RegionError::InvalidGeometry(_))
        ));
        assert!(store.add(rect(0, 0, 0, 50), Box::new(RecordingSink::new())).is_err());
        assert!(store.add(rect(0, 0, 10_001, 50), Box::new(RecordingSink::new())).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_snapshot_keeps_insertion_order() {
        let mut store = RegionStore::new();
        let a = store.add(rect(0, 0, 10, 10), Box::new(RecordingSink::new())).unwrap();
        let b = store.add(rect(20, 0, 10, 10), Box::new(RecordingSink::new())).unwrap();
        store.set_enabled(&a, false).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, a);
        assert!(!snapshot[0].enabled);
        assert_eq!(snapshot[1].id, b);
        assert_eq!(store.enabled_count(), 1);
    }

    #[test]
    fn test_set_rect() {
        let mut store = RegionStore::new();
        let id = store.add(rect(0, 0, 10, 10), Box::new(RecordingSink::new())).unwrap();

        store.set_rect(&id, rect(5, 5, 20, 20)).unwrap();
        assert_eq!(store.get(&id).map(|r| r.rect()), Some(rect(5, 5, 20, 20)));

        assert!(store.set_rect(&id, rect(5, 5, 0, 20)).is_err());
        assert_eq!(store.get(&id).map(|r| r.rect()), Some(rect(5, 5, 20, 20)));

        let missing = RegionId::from("deadbeef");
        assert!(matches!(
            store.set_rect(&missing, rect(0, 0, 1, 1)),
            Err(RegionError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_closes_sink() {
        let sink = RecordingSink::new();
        let handle = sink.clone();
        let mut store = RegionStore::new();
        let id = store.add(rect(0, 0, 10, 10), Box::new(sink)).unwrap();

        store.remove(&id).unwrap();
        assert!(store.is_empty());
        assert!(handle.is_closed());
        assert!(matches!(store.remove(&id), Err(RegionError::NotFound(_))));
    }

    #[test]
    fn test_add_with_passes_id_to_sink_factory() {
        let mut store = RegionStore::new();
        let mut seen = None;
        let id = store
            .add_with(rect(0, 0, 10, 10), |id| {
                seen = Some(id.clone());
                Box::new(RecordingSink::new())
            })
            .unwrap();
        assert_eq!(seen, Some(id));
    }

    #[test]
    fn test_deliver_updates_sink_and_last_text() {
        let sink = RecordingSink::new();
        let handle = sink.clone();
        let mut store = RegionStore::new();
        let id = store.add(rect(0, 0, 10, 10), Box::new(sink)).unwrap();

        store.get_mut(&id).unwrap().deliver("Hello");
        assert_eq!(handle.texts(), vec!["Hello".to_string()]);
        assert_eq!(store.get(&id).and_then(|r| r.last_text()), Some("Hello"));
    }
}
