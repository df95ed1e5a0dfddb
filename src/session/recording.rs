use super::*;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record key events only.
    KeyEventsOnly,
    /// Record key events and raw chunks.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    Opened {
        target: String,
    },
    Written {
        data: String,
    },
    /// Output framed by a prompt, prompt excluded.
    Output {
        prompt: String,
        content: String,
    },
    RawChunk {
        data: String,
    },
    Closed {
        reason: String,
    },
}

/// In-memory session recorder shared by every session of a channel.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::default())
    }
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SessionRecordEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) {
        if self.level == SessionRecordLevel::Off {
            return;
        }
        self.lock().push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
    }

    /// Record raw shell data chunk when enabled.
    pub fn record_raw_chunk(&self, data: String) {
        if self.level != SessionRecordLevel::Full {
            return;
        }
        self.record_event(SessionEvent::RawChunk { data });
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Vec<SessionRecordEntry> {
        self.lock().clone()
    }

    /// Key events only, in recording order.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.lock()
            .iter()
            .filter(|entry| !matches!(entry.event, SessionEvent::RawChunk { .. }))
            .map(|entry| entry.event.clone())
            .collect()
    }

    /// Everything written to the shell, in order.
    pub fn written(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|entry| match &entry.event {
                SessionEvent::Written { data } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of sessions opened while recording.
    pub fn opened_sessions(&self) -> usize {
        self.lock()
            .iter()
            .filter(|entry| matches!(entry.event, SessionEvent::Opened { .. }))
            .count()
    }

    /// Clears all recorded events.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> serde_json::Result<String> {
        let mut lines = Vec::new();
        for entry in self.entries() {
            lines.push(serde_json::to_string(&entry)?);
        }
        Ok(lines.join("\n"))
    }

    /// Restore recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> serde_json::Result<Self> {
        let recorder = Self::new(SessionRecordLevel::Full);
        let mut parsed = Vec::new();
        for line in jsonl.lines().filter(|line| !line.trim().is_empty()) {
            parsed.push(serde_json::from_str::<SessionRecordEntry>(line)?);
        }
        *recorder.lock() = parsed;
        Ok(recorder)
    }
}

pub(crate) fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_jsonl_roundtrip() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder.record_event(SessionEvent::Opened {
            target: "ubnt@10.0.0.1:22".to_string(),
        });
        recorder.record_event(SessionEvent::Written {
            data: "show version".to_string(),
        });
        recorder.record_raw_chunk("Version 1.0\n".to_string());

        let jsonl = recorder.to_jsonl().expect("encode");
        assert!(jsonl.contains(r#""kind":"opened""#));

        let restored = SessionRecorder::from_jsonl(&jsonl).expect("decode");
        assert_eq!(restored.entries(), recorder.entries());
        assert_eq!(restored.written(), vec!["show version".to_string()]);
        assert_eq!(restored.events().len(), 2);
    }

    #[test]
    fn key_events_level_skips_raw_chunks() {
        let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);
        recorder.record_raw_chunk("noise".to_string());
        recorder.record_event(SessionEvent::Closed {
            reason: "destroy".to_string(),
        });
        assert_eq!(recorder.entries().len(), 1);

        let off = SessionRecorder::new(SessionRecordLevel::Off);
        off.record_event(SessionEvent::Closed {
            reason: "destroy".to_string(),
        });
        assert!(off.entries().is_empty());
    }
}
