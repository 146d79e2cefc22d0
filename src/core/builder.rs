//! Agent 构建器：按配置组装工具、执行提供方、记忆、任务清单与回合流水线
//!
//! TUI 与集成测试共用同一套初始化逻辑。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;

use crate::config::AppConfig;
use crate::core::CapabilityBreaker;
use crate::llm::{ExecutionProvider, MockProvider, ResponsesProvider};
use crate::memory::{InMemoryLongTerm, LongTermRecall};
use crate::pipeline::{LingerConfig, SharedEventLog, TurnPipeline};
use crate::todos::TodoList;
use crate::tools::{
    ApprovalPolicy, CatTool, EchoTool, LsTool, ShellTool, TodoTool, ToolExecutor, ToolRegistry,
    WriteTool,
};

pub struct AgentBuilder {
    config: AppConfig,
    workspace: PathBuf,
}

impl AgentBuilder {
    pub fn new(config: AppConfig, workspace: PathBuf) -> Self {
        Self { config, workspace }
    }

    /// 构建工具注册表；todo 工具与后处理器共享同一个 TodoList
    pub fn build_tool_registry(&self, todos: &TodoList) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(CatTool::new(&self.workspace));
        tools.register(LsTool::new(&self.workspace));
        tools.register(WriteTool::new(&self.workspace));
        tools.register(EchoTool);
        tools.register(ShellTool::new(
            &self.workspace,
            self.config.tools.shell.allowed_commands.clone(),
            self.config.tools.tool_timeout_secs,
        ));
        tools.register(TodoTool::new(todos.clone()));
        tools
    }

    /// 根据配置与环境变量选择执行提供方（Responses API / Mock）
    pub fn build_provider(&self, todos: &TodoList) -> Arc<dyn ExecutionProvider> {
        let llm = &self.config.llm;
        if llm.provider.eq_ignore_ascii_case("mock") {
            tracing::info!("Using Mock provider (configured)");
            return Arc::new(MockProvider::new());
        }

        let Some(api_key) = std::env::var(&llm.api_key_env).ok().filter(|k| !k.trim().is_empty())
        else {
            tracing::warn!("{} not set, using Mock provider", llm.api_key_env);
            return Arc::new(MockProvider::new());
        };

        let registry = self.build_tool_registry(todos);
        let policy: Arc<ApprovalPolicy> =
            Arc::new(registry.approval_policy(&self.config.tools.require_approval));
        let executor = Arc::new(ToolExecutor::new(registry, self.config.tools.tool_timeout_secs));
        match ResponsesProvider::new(
            llm.base_url.as_deref(),
            &api_key,
            executor,
            policy,
            llm.max_tool_rounds,
            llm.request_timeout_secs,
        ) {
            Ok(provider) => {
                tracing::info!(
                    base_url = llm.base_url.as_deref().unwrap_or(crate::llm::DEFAULT_BASE_URL),
                    "Using Responses API provider"
                );
                Arc::new(provider)
            }
            Err(e) => {
                tracing::warn!("Responses provider unavailable ({}), using Mock provider", e);
                Arc::new(MockProvider::new())
            }
        }
    }

    /// 构建完整组件
    pub fn build_components(&self) -> AgentComponents {
        let todos = TodoList::new();
        let provider = self.build_provider(&todos);
        let (linger_tx, linger_rx) = watch::channel(self.config.linger.to_linger_config());
        let memory = Arc::new(LongTermRecall::new(Arc::new(InMemoryLongTerm::default())));

        let pipeline = TurnPipeline::new(provider, self.config.phases.to_settings())
            .with_breaker(Arc::new(CapabilityBreaker::new()))
            .with_memory(memory)
            .with_tasks(Arc::new(todos.clone()))
            .with_event_log(SharedEventLog::new(self.config.app.event_log_capacity))
            .with_user_id(self.config.app.user_id.clone())
            .with_linger(linger_rx);

        AgentComponents {
            pipeline: Arc::new(pipeline),
            linger_tx,
            todos,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}

/// 预构建的 Agent 组件
pub struct AgentComponents {
    pub pipeline: Arc<TurnPipeline>,
    /// 运行时切换 linger（/linger on|off）
    pub linger_tx: watch::Sender<LingerConfig>,
    pub todos: TodoList,
}

/// 便捷函数：从默认路径创建 AgentBuilder
pub fn create_agent_builder(config_path: Option<PathBuf>) -> AgentBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let workspace = config.app.workspace_root.clone().unwrap_or_else(|| {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("workspace")
    });
    if let Err(e) = std::fs::create_dir_all(&workspace) {
        tracing::warn!("Failed to create workspace {}: {}", workspace.display(), e);
    }
    let workspace = workspace.canonicalize().unwrap_or(workspace);

    AgentBuilder::new(config, workspace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(provider: &str) -> (tempfile::TempDir, AgentBuilder) {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.llm.provider = provider.to_string();
        cfg.llm.api_key_env = "MURMUR_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        let b = AgentBuilder::new(cfg, dir.path().to_path_buf());
        (dir, b)
    }

    #[test]
    fn test_registry_contains_all_tools() {
        let (_dir, b) = builder("mock");
        let names = b.build_tool_registry(&TodoList::new()).tool_names();
        for n in ["cat", "echo", "ls", "shell", "todo", "write"] {
            assert!(names.iter().any(|x| x == n), "missing {}", n);
        }
    }

    #[tokio::test]
    async fn test_missing_key_falls_back_to_mock() {
        let (_dir, b) = builder("openai");
        let comps = b.build_components();
        assert!(!comps.pipeline.is_busy());
        assert!(comps.pipeline.capability_enabled());
        assert!(!comps.linger_tx.borrow().enabled);
    }
}
