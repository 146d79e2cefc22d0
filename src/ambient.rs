//! 环境上下文：追踪只追加的转写文件
//!
//! 外部的录音 / 转写程序把每句话追加为一行；TranscriptWatcher 轮询文件新增部分，
//! 每个新的非空整行产出一次 AmbientUpdate（摘要为最近若干行）。启动时已有的内容不回放。

use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::pipeline::AmbientUpdate;

/// 未换行内容的上限；超出后丢弃，避免写入方从不换行时无限增长
const MAX_PARTIAL_BYTES: usize = 64 * 1024;

pub struct TranscriptWatcher {
    path: PathBuf,
    poll_interval: Duration,
    window: usize,
    offset: Option<u64>,
    /// 尚未遇到换行的原始字节；只解码完整行
    partial: Vec<u8>,
    /// 超长行被丢弃后，跳过其剩余部分直到下一个换行
    skip_line: bool,
    recent: VecDeque<String>,
}

impl TranscriptWatcher {
    pub fn new(path: impl AsRef<Path>, poll_interval: Duration, window: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            poll_interval: poll_interval.max(Duration::from_millis(50)),
            window: window.max(1),
            offset: None,
            partial: Vec::new(),
            skip_line: false,
            recent: VecDeque::new(),
        }
    }

    /// 读取自上次以来新增的内容
    pub async fn poll_once(&mut self) -> std::io::Result<Vec<AmbientUpdate>> {
        let len = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let offset = match self.offset {
            None => {
                self.offset = Some(len);
                return Ok(Vec::new());
            }
            Some(o) if len < o => {
                tracing::info!(path = %self.path.display(), "transcript truncated, restarting from top");
                self.partial.clear();
                self.skip_line = false;
                0
            }
            Some(o) if len == o => return Ok(Vec::new()),
            Some(o) => o,
        };

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        self.offset = Some(offset + buf.len() as u64);
        self.partial.extend_from_slice(&buf);

        let mut updates = Vec::new();
        while let Some(idx) = self.partial.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=idx).collect();
            if std::mem::take(&mut self.skip_line) {
                continue;
            }
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if self.recent.len() == self.window {
                self.recent.pop_front();
            }
            self.recent.push_back(line.to_string());
            updates.push(AmbientUpdate {
                summary: self.recent.iter().cloned().collect::<Vec<_>>().join("\n"),
                utterance: line.to_string(),
            });
        }
        if self.partial.len() > MAX_PARTIAL_BYTES {
            tracing::warn!(
                path = %self.path.display(),
                bytes = self.partial.len(),
                "transcript line too long without newline, dropping"
            );
            self.partial.clear();
            self.skip_line = true;
        }
        Ok(updates)
    }

    /// 轮询直到取消或接收端关闭
    pub async fn run(mut self, cancel: CancellationToken, tx: mpsc::UnboundedSender<AmbientUpdate>) {
        tracing::info!(path = %self.path.display(), "transcript watcher started");
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(updates) => {
                            for update in updates {
                                if tx.send(update).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "transcript poll failed"),
                    }
                }
            }
        }
        tracing::info!("transcript watcher stopped");
    }
}
