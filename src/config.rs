//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MURMUR__*` 覆盖（双下划线表示嵌套，如 `MURMUR__LLM__PROVIDER=mock`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::llm::{ReasoningEffort, ReasoningSettings, ReasoningSummary, Verbosity};
use crate::pipeline::{LingerConfig, PhaseProfile, PhaseSettings, DEFAULT_EVENT_LOG_CAPACITY};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub phases: PhasesSection,
    pub linger: LingerSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 工具沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 写入长期记忆时使用的用户标识
    pub user_id: String,
    pub event_log_capacity: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: None,
            user_id: "local".to_string(),
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
        }
    }
}

/// [llm] 段：后端选择与请求参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / mock；openai 缺少 API Key 时回退到 mock
    pub provider: String,
    pub base_url: Option<String>,
    /// 存放 API Key 的环境变量名
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    /// 单次 Run 内最多的工具往返轮数
    pub max_tool_rounds: usize,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 120,
            max_tool_rounds: 8,
        }
    }
}

/// [phases.*] 段中的单个阶段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PhaseSection {
    pub model: String,
    pub instructions: String,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub reasoning_summary: Option<ReasoningSummary>,
    pub verbosity: Option<Verbosity>,
    /// 本阶段可用工具；空表示全部
    pub tools: Vec<String>,
}

impl PhaseSection {
    fn with_reasoning(model: &str, effort: ReasoningEffort) -> Self {
        Self {
            model: model.to_string(),
            reasoning_effort: Some(effort),
            reasoning_summary: Some(ReasoningSummary::Auto),
            ..Self::default()
        }
    }

    /// 未填写的模型 / 指令沿用 fallback
    fn to_profile(&self, fallback: &PhaseProfile) -> PhaseProfile {
        let reasoning = match (self.reasoning_effort, self.reasoning_summary) {
            (None, None) => None,
            (effort, summary) => Some(ReasoningSettings { effort, summary }),
        };
        PhaseProfile {
            model: if self.model.trim().is_empty() {
                fallback.model.clone()
            } else {
                self.model.clone()
            },
            instructions: if self.instructions.trim().is_empty() {
                fallback.instructions.clone()
            } else {
                self.instructions.clone()
            },
            tools: self.tools.clone(),
            reasoning,
            verbosity: self.verbosity,
        }
    }
}

/// [phases] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PhasesSection {
    pub planning: PhaseSection,
    pub guidance: PhaseSection,
    pub execution: PhaseSection,
}

impl Default for PhasesSection {
    fn default() -> Self {
        Self {
            planning: PhaseSection::with_reasoning("gpt-5-mini", ReasoningEffort::Low),
            guidance: PhaseSection::with_reasoning("gpt-5-mini", ReasoningEffort::Low),
            execution: PhaseSection::with_reasoning("gpt-5", ReasoningEffort::Medium),
        }
    }
}

impl PhasesSection {
    pub fn to_settings(&self) -> PhaseSettings {
        let fallback = PhaseSettings::default();
        PhaseSettings {
            planning: self.planning.to_profile(&fallback.planning),
            guidance: self.guidance.to_profile(&fallback.guidance),
            execution: self.execution.to_profile(&fallback.execution),
        }
    }
}

/// [linger] 段：自主触发与转写文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LingerSection {
    pub enabled: bool,
    pub behavior: String,
    pub min_interval_secs: u64,
    /// 追加写入的转写文件；未设置时只能用 /ambient 手动注入
    pub transcript_path: Option<PathBuf>,
    pub poll_interval_ms: u64,
    /// 环境摘要保留的最近行数
    pub summary_window: usize,
}

impl Default for LingerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            behavior: LingerConfig::default().behavior,
            min_interval_secs: 20,
            transcript_path: None,
            poll_interval_ms: 1000,
            summary_window: 6,
        }
    }
}

impl LingerSection {
    pub fn to_linger_config(&self) -> LingerConfig {
        LingerConfig {
            enabled: self.enabled,
            behavior: self.behavior.clone(),
            min_interval: Duration::from_secs(self.min_interval_secs),
        }
    }
}

/// [tools] 段：工具超时、需要审批的工具、Shell 白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub require_approval: Vec<String>,
    pub shell: ShellSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            require_approval: vec!["shell".into(), "write".into()],
            shell: ShellSection::default(),
        }
    }
}

/// [tools.shell] 段：允许执行的命令名（仅首词）；空表示不限制
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allowed_commands: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: vec![
                "ls".into(),
                "grep".into(),
                "cat".into(),
                "head".into(),
                "tail".into(),
                "wc".into(),
                "find".into(),
                "git".into(),
            ],
        }
    }
}

/// 从 config 目录加载配置，环境变量 MURMUR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MURMUR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MURMUR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
