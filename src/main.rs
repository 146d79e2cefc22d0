//! murmur 入口：初始化日志、创建编排器与 TUI，并运行主循环。

use std::path::{Path, PathBuf};

use anyhow::Context;
use murmur::{core::create_agent, observability, ui::run_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // TUI 占用终端，日志写入 logs/murmur.log
    observability::init(Some(Path::new("logs")));

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let (cmd_tx, state_rx) = create_agent(config_path)
        .await
        .context("Failed to create agent")?;

    run_app(state_rx, cmd_tx).await.context("App run failed")?;
    Ok(())
}
