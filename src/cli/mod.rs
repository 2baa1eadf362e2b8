pub mod commands;

use clap::{Parser, Subcommand};

/// FerrousMoat CLI
#[derive(Parser)]
#[command(name = "ferrousmoat")]
#[command(about = "Model residency, semantic caching and adaptive batching for a local inference service")]
#[command(version)]
pub struct Cli {
    /// 配置文件路径（TOML/JSON/YAML）
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI 命令
#[derive(Subcommand)]
pub enum Command {
    /// 显示硬件与模型驻留状态
    Status,
    /// 列出推理服务上的模型
    List,
    /// 拉取模型
    Pull {
        /// 模型名称
        model: String,
    },
    /// 在内存预算内加载模型
    Load {
        /// 模型名称
        model: String,
    },
    /// 执行一次查询
    Query {
        /// 查询文本
        text: String,
        /// 数据上下文
        #[arg(long)]
        context: Option<String>,
        /// 任务提示，用于选择模型
        #[arg(long, default_value = "general")]
        task: String,
        /// 紧急请求，优先使用已加载的模型
        #[arg(long)]
        urgent: bool,
        /// 指定模型
        #[arg(long)]
        model: Option<String>,
    },
}
