//! 工具箱：注册表与审批策略、带超时的执行器、文件 / Shell / Echo / 待办工具

pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod shell;
pub mod todo;

pub use echo::EchoTool;
pub use executor::{ToolExecutor, ToolOutcome};
pub use filesystem::{CatTool, LsTool, SafeFs, WriteTool};
pub use registry::{ApprovalPolicy, PolicyVerdict, Tool, ToolDefinition, ToolRegistry};
pub use shell::ShellTool;
pub use todo::TodoTool;
