//! services/bot/src/bot/media_group.rs
//!
//! Consolidates grouped photos into one event.
//!
//! The messaging provider delivers an album as independent photo messages that share
//! a correlation id and carries no "end of album" marker. Every arrival pushes the
//! group's deadline out by the quiet window and schedules its own timer; only the timer
//! that finds the deadline reached drains the buffer, so each group is emitted once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use review_bot_core::PhotoRef;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::bot::protocol::{EventKind, InboundEvent, Sender};

/// Photos collected so far for one correlation id.
#[derive(Debug)]
struct MediaGroupBuffer {
    sender: Sender,
    chat_id: i64,
    photos: Vec<PhotoRef>,
    caption: Option<String>,
    deadline: Instant,
}

/// The buffer map plus its debounce rule, free of any timers.
#[derive(Debug)]
pub struct MediaGroupBuffers {
    window: Duration,
    buffers: HashMap<String, MediaGroupBuffer>,
}

impl MediaGroupBuffers {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            buffers: HashMap::new(),
        }
    }

    /// Appends a grouped photo and returns the group's new deadline.
    ///
    /// Returns `None` for events that are not grouped photos.
    pub fn push(&mut self, event: InboundEvent, now: Instant) -> Option<(String, Instant)> {
        let InboundEvent {
            sender,
            chat_id,
            kind,
        } = event;
        let EventKind::Photo {
            photo,
            caption,
            media_group_id: Some(group_id),
        } = kind
        else {
            return None;
        };

        let deadline = now + self.window;
        let buffer = self
            .buffers
            .entry(group_id.clone())
            .or_insert_with(|| MediaGroupBuffer {
                sender,
                chat_id,
                photos: Vec::new(),
                caption: None,
                deadline,
            });
        buffer.photos.push(photo);
        if buffer.caption.is_none() {
            buffer.caption = caption.filter(|c| !c.trim().is_empty());
        }
        buffer.deadline = deadline;
        Some((group_id, deadline))
    }

    /// Removes and returns the consolidated event once the group has been quiet
    /// for a full window. Early or repeated calls return `None`.
    pub fn drain_due(&mut self, group_id: &str, now: Instant) -> Option<InboundEvent> {
        let due = self
            .buffers
            .get(group_id)
            .is_some_and(|b| now >= b.deadline && !b.photos.is_empty());
        if !due {
            return None;
        }
        let buffer = self.buffers.remove(group_id)?;
        Some(InboundEvent {
            sender: buffer.sender,
            chat_id: buffer.chat_id,
            kind: EventKind::PhotoGroup {
                photos: buffer.photos,
                caption: buffer.caption,
            },
        })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Runs `MediaGroupBuffers` on tokio timers and re-injects consolidated events.
#[derive(Clone)]
pub struct MediaGroupAggregator {
    buffers: Arc<Mutex<MediaGroupBuffers>>,
    emit: mpsc::UnboundedSender<InboundEvent>,
}

impl MediaGroupAggregator {
    pub fn new(window: Duration, emit: mpsc::UnboundedSender<InboundEvent>) -> Self {
        Self {
            buffers: Arc::new(Mutex::new(MediaGroupBuffers::new(window))),
            emit,
        }
    }

    /// Buffers a grouped photo and schedules a timer for it. Never waits.
    pub fn push(&self, event: InboundEvent) {
        let pushed = self
            .buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event, Instant::now());
        let Some((group_id, deadline)) = pushed else {
            warn!("Media aggregator received an event that is not a grouped photo.");
            return;
        };

        let this = self.clone();
        tokio::spawn(async move {
            time::sleep_until(deadline).await;
            this.fire(&group_id);
        });
    }

    fn fire(&self, group_id: &str) {
        let drained = self
            .buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain_due(group_id, Instant::now());
        if let Some(event) = drained {
            debug!("Media group {} consolidated.", group_id);
            if self.emit.send(event).is_err() {
                warn!("Dropped media group {}: dispatcher is gone.", group_id);
            }
        }
    }

    /// Number of groups still waiting for their quiet window.
    pub fn pending(&self) -> usize {
        self.buffers.lock().map(|b| b.len()).unwrap_or(0)
    }
}
