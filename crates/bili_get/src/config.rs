use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bili-get", version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// 会话令牌，将作为 SESSDATA cookie 原样转发
    #[arg(long, env = "SESSDATA", global = true)]
    pub sessdata: Option<String>,

    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Command {
    /// 解析页面链接并打印全部可下载流
    Info { url: String },
    /// 解析页面链接并下载选中的流
    Download {
        url: String,

        /// 要下载的格式标识，缺省取优先级最高的流
        #[arg(long)]
        format: Option<String>,

        /// 输出目录
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
}

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
