//! The linear play queue.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::Track;

/// Where a new track goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueMode {
    /// At the end.
    #[default]
    Append,
    /// Right after the current track.
    Next,
    /// Replace the whole queue and preempt the current track.
    Now,
    /// At index `n`, clamped to the queue length.
    Position(usize),
}

/// Result of an insertion.
#[derive(Debug)]
pub struct Inserted {
    pub index: usize,
    /// Tracks removed by [`QueueMode::Now`]; the caller releases them.
    pub displaced: Vec<Arc<Track>>,
}

#[derive(Debug, Default)]
pub struct TrackQueue {
    items: VecDeque<Arc<Track>>,
}

impl TrackQueue {
    pub fn insert(&mut self, track: Arc<Track>, mode: QueueMode) -> Inserted {
        let mut displaced = Vec::new();
        let index = match mode {
            QueueMode::Append => {
                self.items.push_back(track);
                self.items.len() - 1
            }
            QueueMode::Next => {
                self.items.push_front(track);
                0
            }
            QueueMode::Now => {
                displaced.extend(self.items.drain(..));
                self.items.push_back(track);
                0
            }
            QueueMode::Position(n) => {
                let index = n.min(self.items.len());
                self.items.insert(index, track);
                index
            }
        };
        Inserted { index, displaced }
    }

    pub fn pop_front(&mut self) -> Option<Arc<Track>> {
        self.items.pop_front()
    }

    pub fn push_front(&mut self, track: Arc<Track>) {
        self.items.push_front(track);
    }

    pub fn remove(&mut self, index: usize) -> Option<Arc<Track>> {
        self.items.remove(index)
    }

    pub fn front(&self) -> Option<&Arc<Track>> {
        self.items.front()
    }

    pub fn drain(&mut self) -> Vec<Arc<Track>> {
        self.items.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Track>> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
