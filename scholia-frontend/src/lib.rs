pub mod cli;
pub mod errors;
pub mod loader;

use std::path::PathBuf;

use errors::FrontendError;
use scholia_config::AppConfig;
use tracing::info;

/// 启动 CLI 演示：加载文档（或内置示例），模拟查看器渲染并打印注释状态。
pub fn run_cli_demo(config: &AppConfig, document: Option<PathBuf>) -> Result<(), FrontendError> {
    info!("启动 CLI 演示前端");
    let loaded = loader::load_session(config, document);
    let report = cli::run_demo(loaded)?;
    for line in &report.lines {
        println!("{line}");
    }
    Ok(())
}
