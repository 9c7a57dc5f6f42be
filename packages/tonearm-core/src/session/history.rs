//! Bounded history of played sources, used to keep autoplay from repeating.

use std::collections::VecDeque;

use crate::resolver::PlayedEntry;
use crate::similarity::{similar, weights};

#[derive(Debug)]
pub struct PlayHistory {
    entries: VecDeque<PlayedEntry>,
    capacity: usize,
}

impl PlayHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an entry as the most recent play, evicting the oldest once
    /// full. An earlier entry with the same id or a similar title is dropped
    /// first, so replays and re-uploads hold a single slot.
    pub fn record(&mut self, entry: PlayedEntry) {
        let token_weights = weights(
            self.entries
                .iter()
                .map(|e| e.normalized_title.as_str())
                .chain(std::iter::once(entry.normalized_title.as_str())),
        );
        self.entries.retain(|existing| {
            if existing.id == entry.id {
                return false;
            }
            if existing.normalized_title.is_empty() || entry.normalized_title.is_empty() {
                return true;
            }
            !similar(
                &existing.normalized_title,
                &entry.normalized_title,
                &token_weights,
            )
        });

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<PlayedEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
