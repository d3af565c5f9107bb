use anyhow::{Context, Result};
use order_collector::orchestrator::prepare_log_file;
use order_collector::utils::logging;
use order_collector::{App, Config, Phase};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置：ORDER_CONFIG 指向的 TOML 文件，再叠加环境变量
    let config = match std::env::var("ORDER_CONFIG") {
        Ok(path) if !path.trim().is_empty() => Config::from_toml_file(path.trim())?.with_env(),
        _ => Config::from_env(),
    };

    // 初始化日志
    prepare_log_file(&config)?;
    logging::init(config.verbose_logging, Some(&config.output_log_file))?;

    config.validate().context("配置校验失败")?;

    let phase: Phase = std::env::args()
        .nth(1)
        .as_deref()
        .unwrap_or("all")
        .parse()?;

    // 初始化并运行应用
    App::initialize(config).await?.run(phase).await?;

    Ok(())
}
