use clap::Parser;
use std::error::Error;
use tracing::error;
use vault_cli::{Cli, CliApp, Commands, run_init, setup_logging};
use vault_core::VaultError;

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let cli = Cli::parse();

    // 设置日志记录
    setup_logging(cli.verbose);

    // `init` 命令是特例，它不需要预先加载配置
    if let Commands::Init { force } = cli.command {
        if let Err(e) = run_init(force, cli.config.as_deref()).await {
            error!("❌ 初始化失败: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // 对于其他所有命令，我们需要加载配置并初始化App
    let app = match CliApp::new(cli.config.as_deref()).await {
        Ok(app) => app,
        Err(e) => {
            let config_missing = match &e {
                VaultError::InvalidConfig(_) => cli.config.is_none(),
                VaultError::Io(io) => io.kind() == std::io::ErrorKind::NotFound,
                _ => false,
            };
            error!("❌ 应用初始化失败: {}", e);
            if config_missing {
                error!("👉 请先运行 'vault-cli init' 命令来创建配置文件。");
            }
            std::process::exit(1);
        }
    };

    // 运行命令
    if let Err(e) = app.run_command(cli.command).await {
        error!("❌ 操作失败: {}", e);
        let mut source = e.source();
        while let Some(cause) = source {
            error!("   原因: {}", cause);
            source = cause.source();
        }
        std::process::exit(1);
    }
}
