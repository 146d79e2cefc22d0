//! 事件日志：定长环形缓冲，仅用于观察（界面尾部展示），不参与控制流

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::pipeline::TurnSource;

pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Local>,
    pub source: TurnSource,
    pub text: String,
}

impl EventLogEntry {
    /// `HH:MM:SS [source] text`
    pub fn render(&self) -> String {
        format!(
            "{} [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.source,
            self.text
        )
    }
}

#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<EventLogEntry>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, source: TurnSource, text: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(EventLogEntry {
            timestamp: Local::now(),
            source,
            text: text.into(),
        });
    }

    /// 最近 n 条，按时间顺序
    pub fn tail(&self, n: usize) -> Vec<EventLogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

/// 在流消费者、后处理器与编排器之间共享的事件日志
#[derive(Debug, Clone, Default)]
pub struct SharedEventLog {
    inner: Arc<Mutex<EventLog>>,
}

impl SharedEventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventLog::new(capacity))),
        }
    }

    pub fn push(&self, source: TurnSource, text: impl Into<String>) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(source, text);
    }

    pub fn tail(&self, n: usize) -> Vec<EventLogEntry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).tail(n)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let mut log = EventLog::new(3);
        for i in 0..5 {
            log.push(TurnSource::Chat, format!("e{}", i));
        }
        assert_eq!(log.len(), 3);
        let texts: Vec<String> = log.tail(10).into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["e2", "e3", "e4"]);
    }

    #[test]
    fn test_tail_and_render() {
        let log = SharedEventLog::new(10);
        log.push(TurnSource::Linger, "tool ls");
        log.push(TurnSource::Chat, "stream_complete");
        let tail = log.tail(1);
        assert_eq!(tail.len(), 1);
        assert!(tail[0].render().ends_with("[chat] stream_complete"));
    }
}
