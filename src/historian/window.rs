//! Rolling window of historian rows.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

use crate::config::defaults::WINDOW_ROW_CAP;
use crate::types::HistorianRow;

/// Time-bounded, deduplicating buffer of the most recent historian rows.
///
/// Invariants: timestamps strictly increase, no row is older than
/// `newest - window_minutes`, and the row count never exceeds the hard cap.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    rows: VecDeque<HistorianRow>,
    window_minutes: i64,
    row_cap: usize,
}

impl RollingWindow {
    pub fn new(window_minutes: i64) -> Self {
        Self {
            rows: VecDeque::new(),
            window_minutes: window_minutes.max(1),
            row_cap: WINDOW_ROW_CAP,
        }
    }

    #[cfg(test)]
    pub fn with_row_cap(window_minutes: i64, row_cap: usize) -> Self {
        Self {
            rows: VecDeque::new(),
            window_minutes: window_minutes.max(1),
            row_cap,
        }
    }

    /// Absorb a batch of rows (any order), dropping duplicates and rows at
    /// or before the current newest timestamp, then trim. Returns how many
    /// rows were actually appended.
    pub fn extend(&mut self, mut batch: Vec<HistorianRow>) -> usize {
        batch.sort_by_key(|r| r.timestamp);
        let mut appended = 0;
        for row in batch {
            match self.rows.back() {
                Some(newest) if row.timestamp <= newest.timestamp => continue,
                _ => {
                    self.rows.push_back(row);
                    appended += 1;
                }
            }
        }
        self.trim();
        appended
    }

    /// Drop rows older than `newest - window_minutes` and enforce the cap.
    fn trim(&mut self) {
        if let Some(newest) = self.rows.back() {
            let cutoff = newest.timestamp - Duration::minutes(self.window_minutes);
            while matches!(self.rows.front(), Some(oldest) if oldest.timestamp < cutoff) {
                self.rows.pop_front();
            }
        }
        while self.rows.len() > self.row_cap {
            self.rows.pop_front();
        }
    }

    /// Change the window span (config reload) and clear contents.
    pub fn reset(&mut self, window_minutes: i64) {
        self.rows.clear();
        self.window_minutes = window_minutes.max(1);
    }

    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.rows.back().map(|r| r.timestamp)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn window_minutes(&self) -> i64 {
        self.window_minutes
    }

    /// Rows in chronological order.
    pub fn rows(&self) -> Vec<HistorianRow> {
        self.rows.iter().copied().collect()
    }
}
