//! murmur - 终端 LLM 助手的回合编排核心
//!
//! 模块划分：
//! - **ambient**: 转写文件追踪，产出环境上下文更新
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、能力熔断、状态投影、组件构建、主控循环
//! - **llm**: 执行提供方抽象与实现（Responses API / Mock）
//! - **memory**: 可见历史与长期记忆协作方
//! - **pipeline**: 分阶段回合、审批队列、流消费、linger、后处理
//! - **todos**: 任务清单与依赖自动完成
//! - **tools**: 工具箱（cat、ls、write、shell、echo、todo）、审批策略与执行器
//! - **ui**: Ratatui TUI 界面

pub mod ambient;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod todos;
pub mod tools;
pub mod ui;
