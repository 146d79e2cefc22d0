//! 工具注册表与审批策略
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册。
//! ApprovalPolicy 回答「该工具是否需要人工审批」：工具自身默认值 + 配置覆盖 + 会话级 always 决定。
//! 策略由执行提供方查询，编排核心只对提供方上报的挂起做出反应。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

/// 工具 trait
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（函数调用中的 name）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 有副作用的工具默认需要审批
    fn requires_approval(&self) -> bool {
        false
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 发给提供方的工具定义
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 工具注册表：按名称有序存储，保证工具定义顺序稳定
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<String, String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| format!("Unknown tool: {name}"))?;
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 指定名字的工具定义；names 为空时返回全部，未知名字忽略
    pub fn definitions(&self, names: &[String]) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|(name, _)| names.is_empty() || names.contains(name))
            .map(|(name, tool)| ToolDefinition {
                name: name.clone(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    /// 按各工具自身默认值与配置覆盖构建审批策略
    pub fn approval_policy(&self, require_approval: &[String]) -> ApprovalPolicy {
        let mut required: HashSet<String> = self
            .tools
            .iter()
            .filter(|(_, t)| t.requires_approval())
            .map(|(name, _)| name.clone())
            .collect();
        required.extend(require_approval.iter().cloned());
        ApprovalPolicy::new(required)
    }
}

/// 会话级 always 决定下，某工具调用的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyVerdict {
    /// 直接执行
    Allow,
    /// 直接拒绝（用户此前选择了 always reject）
    Deny,
    /// 挂起等待人工审批
    Ask,
}

/// 工具审批策略；always 决定只在进程内有效，不落盘
#[derive(Debug, Default)]
pub struct ApprovalPolicy {
    required: HashSet<String>,
    remembered: Mutex<HashMap<String, bool>>,
}

impl ApprovalPolicy {
    pub fn new(required: HashSet<String>) -> Self {
        Self {
            required,
            remembered: Mutex::new(HashMap::new()),
        }
    }

    pub fn requires_approval(&self, tool: &str) -> bool {
        self.required.contains(tool)
    }

    pub fn verdict(&self, tool: &str) -> PolicyVerdict {
        if !self.requires_approval(tool) {
            return PolicyVerdict::Allow;
        }
        let remembered = self.remembered.lock().unwrap_or_else(|e| e.into_inner());
        match remembered.get(tool) {
            Some(true) => PolicyVerdict::Allow,
            Some(false) => PolicyVerdict::Deny,
            None => PolicyVerdict::Ask,
        }
    }

    /// 记住 always approve / always reject
    pub fn remember(&self, tool: &str, approved: bool) {
        self.remembered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tool.to_string(), approved);
    }
}
