use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;

use crate::session::now_ms;

/// One failure recorded at the device boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceError {
    pub ts_ms: u128,
    pub message: String,
}

/// Bounded history of device failures; the oldest entry is dropped first.
#[derive(Debug)]
pub struct ErrorQueue {
    capacity: usize,
    entries: Mutex<VecDeque<DeviceError>>,
}

impl ErrorQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, message: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(DeviceError {
            ts_ms: now_ms(),
            message: message.into(),
        });
    }

    /// Retained errors, oldest first.
    pub fn recent(&self) -> Vec<DeviceError> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
