//! Bounded buffer of recent utterances sent upstream as context.

use std::collections::VecDeque;

/// Default number of utterances retained.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct ConversationHistory {
    entries: VecDeque<String>,
    limit: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl ConversationHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Append an utterance, dropping the oldest beyond the limit.
    pub fn push(&mut self, text: impl Into<String>) {
        if self.limit == 0 {
            return;
        }
        self.entries.push_back(text.into());
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
