//! 任务清单：带前置依赖的待办
//!
//! 模型通过 `todo` 工具增删改；回合结束后由 TurnPostProcessor 调用 auto_resolve_outstanding：
//! 前置依赖全部完成的待办自动标记完成并追加注记，直到不再有变化（级联）。

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;

/// 待办状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Open,
    Done,
}

/// 单条待办
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TodoItem {
    pub id: String,
    pub title: String,
    pub status: TodoStatus,
    /// 前置依赖（待办 id）；非空时才可能被自动完成
    pub depends_on: Vec<String>,
    pub notes: Vec<String>,
}

/// Turn Post-Processor 消费的任务清单协作方
#[async_trait]
pub trait TaskBoard: Send + Sync {
    /// 自动完成前置条件已满足的待办，返回被完成的 id
    async fn auto_resolve_outstanding(&self) -> Result<Vec<String>, String>;

    /// 一行摘要，供界面缓存展示
    fn summary(&self) -> String;
}

#[derive(Debug, Default)]
struct TodoState {
    items: Vec<TodoItem>,
    next_id: usize,
}

/// 进程内任务清单，可在工具与后处理器之间共享
#[derive(Debug, Clone, Default)]
pub struct TodoList {
    state: Arc<Mutex<TodoState>>,
}

impl TodoList {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TodoState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 新增待办；依赖必须是已存在的 id
    pub fn add(&self, title: impl Into<String>, depends_on: Vec<String>) -> Result<String, String> {
        let mut state = self.lock();
        if let Some(missing) = depends_on
            .iter()
            .find(|d| !state.items.iter().any(|i| &i.id == *d))
        {
            return Err(format!("unknown dependency: {}", missing));
        }
        state.next_id += 1;
        let id = format!("t{}", state.next_id);
        state.items.push(TodoItem {
            id: id.clone(),
            title: title.into(),
            status: TodoStatus::Open,
            depends_on,
            notes: Vec::new(),
        });
        Ok(id)
    }

    pub fn complete(&self, id: &str, note: Option<&str>) -> Result<(), String> {
        let mut state = self.lock();
        let item = state
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| format!("unknown todo: {}", id))?;
        item.status = TodoStatus::Done;
        if let Some(n) = note {
            item.notes.push(n.to_string());
        }
        Ok(())
    }

    pub fn items(&self) -> Vec<TodoItem> {
        self.lock().items.clone()
    }

    /// 一轮一轮地完成依赖已满足的待办，直到不再变化
    pub fn resolve_ready(&self) -> Vec<String> {
        let mut state = self.lock();
        let mut resolved = Vec::new();
        loop {
            let done: Vec<String> = state
                .items
                .iter()
                .filter(|i| i.status == TodoStatus::Done)
                .map(|i| i.id.clone())
                .collect();
            let mut changed = false;
            for item in state.items.iter_mut() {
                if item.status == TodoStatus::Done || item.depends_on.is_empty() {
                    continue;
                }
                if item.depends_on.iter().all(|d| done.contains(d)) {
                    item.status = TodoStatus::Done;
                    item.notes.push(format!(
                        "auto-resolved: prerequisites done ({})",
                        item.depends_on.join(", ")
                    ));
                    resolved.push(item.id.clone());
                    changed = true;
                }
            }
            if !changed {
                return resolved;
            }
        }
    }
}

#[async_trait]
impl TaskBoard for TodoList {
    async fn auto_resolve_outstanding(&self) -> Result<Vec<String>, String> {
        Ok(self.resolve_ready())
    }

    fn summary(&self) -> String {
        let state = self.lock();
        let open = state
            .items
            .iter()
            .filter(|i| i.status == TodoStatus::Open)
            .count();
        if state.items.is_empty() {
            return String::new();
        }
        format!("todos: {} open / {} total", open, state.items.len())
    }
}
