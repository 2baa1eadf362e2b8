use clap::Parser;
use ferrousmoat::cli::commands::{self, QueryArgs};
use ferrousmoat::cli::{Cli, Command};
use ferrousmoat::config::Config;
use ferrousmoat::utils::init_logging;
use ferrousmoat::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    // 初始化日志
    init_logging(&config.logging)?;

    match cli.command {
        Command::Status => commands::status(&config).await?,
        Command::List => commands::list(&config).await?,
        Command::Pull { model } => commands::pull(&config, &model).await?,
        Command::Load { model } => commands::load(&config, &model).await?,
        Command::Query {
            text,
            context,
            task,
            urgent,
            model,
        } => {
            commands::query(
                &config,
                QueryArgs {
                    text,
                    context,
                    task,
                    urgent,
                    model,
                },
            )
            .await?
        }
    }

    Ok(())
}
