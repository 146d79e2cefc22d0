//! 长期记忆：跨回合写入与检索
//!
//! LongTermMemory 是底层存储（当前为关键词重叠的 InMemoryLongTerm）；
//! MemoryCollaborator 是编排器看到的窄接口：回合成功后 memorize（后台执行，失败只记日志），
//! 每个阶段提交前 recall（可能为空）。

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::memory::{Message, Role};

/// 检索时返回的最多条数
const RECALL_TOP_K: usize = 3;

/// 长期记忆存储 trait：支持写入与相似度检索
pub trait LongTermMemory: Send + Sync {
    /// 存入一段文本（可后续按 query 检索）
    fn add(&self, text: &str);

    /// 按查询检索最相关的 k 条，返回文本片段
    fn search(&self, query: &str, k: usize) -> Vec<String>;

    /// 是否启用（Noop 实现返回 false）
    fn enabled(&self) -> bool {
        true
    }
}

/// 空实现：未启用长期记忆时使用
#[derive(Clone, Default)]
pub struct NoopLongTerm;

impl LongTermMemory for NoopLongTerm {
    fn add(&self, _text: &str) {}

    fn search(&self, _query: &str, _k: usize) -> Vec<String> {
        Vec::new()
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// 简单内存实现：按关键词重叠检索（无真实向量）
#[derive(Clone)]
pub struct InMemoryLongTerm {
    store: Arc<RwLock<Vec<(String, HashSet<String>)>>>,
    max_entries: usize,
}

/// 将文本切分为小写词集合，用于简单相似度（词重叠数）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 1)
        .collect()
}

impl InMemoryLongTerm {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Vec::new())),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LongTermMemory for InMemoryLongTerm {
    fn add(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let tokens = tokenize_lower(text);
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        store.push((text.to_string(), tokens));
        let n = store.len();
        if n > self.max_entries {
            store.drain(0..n - self.max_entries);
        }
    }

    fn search(&self, query: &str, k: usize) -> Vec<String> {
        let query_tokens = tokenize_lower(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        let mut scored: Vec<(usize, &String)> = store
            .iter()
            .map(|(text, doc_tokens)| (query_tokens.intersection(doc_tokens).count(), text))
            .filter(|(s, _)| *s > 0)
            .collect();
        // 同分时新写入的优先
        scored.reverse();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(k).map(|(_, t)| t.clone()).collect()
    }
}

impl Default for InMemoryLongTerm {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// 编排器消费的记忆协作方
#[async_trait]
pub trait MemoryCollaborator: Send + Sync {
    /// 记住一次完整交换；由编排器以 fire-and-forget 方式调用
    async fn memorize(&self, messages: &[Message], user_id: &str) -> Result<(), String>;

    /// 按当前消息检索相关上下文；无相关内容时返回空串
    async fn recall(&self, messages: &[Message]) -> Result<String, String>;
}

/// 基于 LongTermMemory 的协作方实现
pub struct LongTermRecall {
    store: Arc<dyn LongTermMemory>,
}

impl LongTermRecall {
    pub fn new(store: Arc<dyn LongTermMemory>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MemoryCollaborator for LongTermRecall {
    async fn memorize(&self, messages: &[Message], user_id: &str) -> Result<(), String> {
        if !self.store.enabled() {
            return Ok(());
        }
        let user = messages.iter().rev().find(|m| m.role == Role::User);
        let reply = messages.iter().rev().find(|m| m.role == Role::Assistant);
        match (user, reply) {
            (Some(u), Some(a)) => {
                self.store.add(&format!(
                    "[{}] user: {} | assistant: {}",
                    user_id, u.content, a.content
                ));
                Ok(())
            }
            _ => Err("exchange has no user/assistant pair".to_string()),
        }
    }

    async fn recall(&self, messages: &[Message]) -> Result<String, String> {
        if !self.store.enabled() {
            return Ok(String::new());
        }
        let Some(query) = messages.iter().rev().find(|m| m.role == Role::User) else {
            return Ok(String::new());
        };
        let hits = self.store.search(&query.content, RECALL_TOP_K);
        Ok(hits
            .iter()
            .map(|h| format!("- {}", h))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
