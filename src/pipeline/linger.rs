//! Linger 自主触发
//!
//! 每次环境上下文更新（如新的转写行）都是一次 tick。只有在 linger 开启、两个来源都没有进行中的回合、
//! 且距上次触发不少于 min_interval 时才接受；接受后由行为文本 + 环境摘要 + 最新发言合成一条指令。
//! 被拒的 tick 直接丢弃，不排队。

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::memory::Message;

/// 运行时可切换的 linger 配置；每个 tick 重新读取
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LingerConfig {
    pub enabled: bool,
    pub behavior: String,
    pub min_interval: Duration,
}

impl Default for LingerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            behavior: "You are listening in on the conversation around the user. If something useful can be done or said, do it briefly; otherwise reply with a one-line acknowledgement.".to_string(),
            min_interval: Duration::from_secs(20),
        }
    }
}

/// 环境上下文协作方提供的一次更新
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbientUpdate {
    pub summary: String,
    pub utterance: String,
}

pub struct LingerScheduler {
    config: watch::Receiver<LingerConfig>,
    last_fire: Option<Instant>,
}

impl LingerScheduler {
    pub fn new(config: watch::Receiver<LingerConfig>) -> Self {
        Self {
            config,
            last_fire: None,
        }
    }

    /// 评估一次 tick；接受时记录触发时间并返回指令消息
    pub fn evaluate(&mut self, update: &AmbientUpdate, busy: bool, now: Instant) -> Option<Message> {
        let cfg = self.config.borrow().clone();
        if !cfg.enabled {
            return None;
        }
        if busy {
            tracing::debug!("linger tick dropped: a turn is active");
            return None;
        }
        if let Some(last) = self.last_fire {
            if now.saturating_duration_since(last) < cfg.min_interval {
                tracing::debug!("linger tick dropped: within min interval");
                return None;
            }
        }
        self.last_fire = Some(now);
        Some(directive(&cfg.behavior, update))
    }

    pub fn last_fire(&self) -> Option<Instant> {
        self.last_fire
    }
}

fn directive(behavior: &str, update: &AmbientUpdate) -> Message {
    let summary = if update.summary.trim().is_empty() {
        "(none)"
    } else {
        update.summary.trim()
    };
    Message::user(format!(
        "{}\n\nAmbient summary:\n{}\n\nLatest utterance:\n{}",
        behavior.trim(),
        summary,
        update.utterance.trim()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(text: &str) -> AmbientUpdate {
        AmbientUpdate {
            summary: "people are talking about lunch".into(),
            utterance: text.into(),
        }
    }

    fn enabled(secs: u64) -> LingerConfig {
        LingerConfig {
            enabled: true,
            behavior: "Help out.".into(),
            min_interval: Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_disabled_drops_everything() {
        let (_tx, rx) = watch::channel(LingerConfig::default());
        let mut s = LingerScheduler::new(rx);
        assert!(s.evaluate(&update("hi"), false, Instant::now()).is_none());
        assert!(s.last_fire().is_none());
    }

    #[test]
    fn test_min_interval_throttles() {
        let (_tx, rx) = watch::channel(enabled(20));
        let mut s = LingerScheduler::new(rx);
        let t0 = Instant::now();
        let first = s.evaluate(&update("pizza?"), false, t0).unwrap();
        assert!(first.content.starts_with("Help out."));
        assert!(first.content.contains("Latest utterance:\npizza?"));
        assert!(s.evaluate(&update("sushi?"), false, t0 + Duration::from_secs(5)).is_none());
        assert!(s.evaluate(&update("tacos?"), false, t0 + Duration::from_secs(25)).is_some());
    }

    #[test]
    fn test_busy_tick_does_not_consume_interval() {
        let (_tx, rx) = watch::channel(enabled(20));
        let mut s = LingerScheduler::new(rx);
        let t0 = Instant::now();
        assert!(s.evaluate(&update("a"), true, t0).is_none());
        assert!(s.evaluate(&update("b"), false, t0 + Duration::from_secs(1)).is_some());
    }

    #[test]
    fn test_config_reread_each_tick() {
        let (tx, rx) = watch::channel(LingerConfig::default());
        let mut s = LingerScheduler::new(rx);
        let t0 = Instant::now();
        assert!(s.evaluate(&update("a"), false, t0).is_none());
        tx.send_replace(enabled(20));
        assert!(s.evaluate(&update("b"), false, t0).is_some());
    }
}
