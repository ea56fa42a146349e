//! Display sinks that show translated text for a region

use crossbeam_channel::Sender;
use tracing::debug;

/// Longest text delivered to a sink
pub const DEFAULT_MAX_CHARS: usize = 1000;

/// Receives the translated text for one region
pub trait DisplaySink: Send {
    fn update_text(&mut self, text: &str);

    /// Release any display resource; called when the region is removed
    fn close(&mut self) {}
}

/// Cut `text` to at most `max_chars` characters
pub fn truncate_for_display(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Events emitted by [`ChannelSink`]
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    Text { region: String, text: String },
    Closed { region: String },
}

/// Forwards updates to another thread over a channel
pub struct ChannelSink {
    region: String,
    tx: Sender<DisplayEvent>,
}

impl ChannelSink {
    pub fn new(region: impl Into<String>, tx: Sender<DisplayEvent>) -> Self {
        Self {
            region: region.into(),
            tx,
        }
    }
}

impl DisplaySink for ChannelSink {
    fn update_text(&mut self, text: &str) {
        let event = DisplayEvent::Text {
            region: self.region.clone(),
            text: text.to_string(),
        };
        if self.tx.send(event).is_err() {
            debug!("Display receiver for region {} is gone", self.region);
        }
    }

    fn close(&mut self) {
        let _ = self.tx.send(DisplayEvent::Closed {
            region: self.region.clone(),
        });
    }
}
