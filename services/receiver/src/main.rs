//! Receiver 二进制入口：解析命令、加载配置、初始化日志后启动服务。

mod api;
mod app;
mod auth;
mod cli;
mod config;
mod logging;
mod state;
mod upload;

use config::Settings;

#[tokio::main]
/// 启动 Receiver 服务。
async fn main() -> anyhow::Result<()> {
    let args = std::env::args().skip(1).collect::<Vec<String>>();
    let mode = match cli::dispatch(&args)? {
        cli::CliDispatch::Run(mode) => mode,
        cli::CliDispatch::Exit => return Ok(()),
    };

    let config_path = config::config_path();
    let settings = Settings::load(&config_path)?;
    if mode == cli::RunMode::Console {
        cli::print_console_summary(&settings, &config_path);
    }

    let _log_runtime = logging::init("receiver", &settings.log_dir)?;
    app::run(settings, config_path).await
}
