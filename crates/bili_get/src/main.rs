#[macro_use]
extern crate tracing;

mod bilibili;
mod config;
mod downloader;
mod resource;
mod utils;

use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::bilibili::{Bilibili, Client};
use crate::config::{Args, Command};
use crate::downloader::Downloader;
use crate::resource::{MediaAgent, ResourceInfo};
use crate::utils::{filenamify, init_logger, readable_size};

// 与调用方约定的失败类别
const EXIT_NO_AGENT: u8 = 100;
const EXIT_RESOLVE_FAILED: u8 = 101;
const EXIT_DOWNLOAD_FAILED: u8 = 102;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(&args.log_level);
    debug!("bili-get 版本：{}", config::version());

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("接收到终止信号，正在取消解析..");
                token.cancel();
            }
        }
    });

    run(args, token).await
}

async fn run(args: Args, token: CancellationToken) -> ExitCode {
    let url = match &args.command {
        Command::Info { url } | Command::Download { url, .. } => url.clone(),
    };
    let agents: Vec<Box<dyn MediaAgent>> = vec![Box::new(Bilibili::new(url.clone(), args.sessdata.clone()))];
    let Some(agent) = agents.iter().find(|agent| agent.can_handle(&url)) else {
        eprintln!("No available agent to handle this url.");
        return ExitCode::from(EXIT_NO_AGENT);
    };

    let info = match agent.resource_info(&token).await {
        Ok(info) => info,
        Err(e) => {
            error!("获取资源信息失败：{:#}", e);
            return ExitCode::from(EXIT_RESOLVE_FAILED);
        }
    };

    match args.command {
        Command::Info { .. } => {
            print_info(&info);
            ExitCode::SUCCESS
        }
        Command::Download { format, output, .. } => {
            match download(&info, format.as_deref(), &output, &token).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!("下载失败：{:#}", e);
                    ExitCode::from(EXIT_DOWNLOAD_FAILED)
                }
            }
        }
    }
}

/// 下载选中的流：混合流分段顺序落盘，分离流分别保存视频轨与音频轨
async fn download(info: &ResourceInfo, format: Option<&str>, output: &Path, token: &CancellationToken) -> Result<()> {
    let stream = match format {
        Some(id) => info.stream(id).with_context(|| format!("no stream with format {id}"))?,
        None => info.streams.first().context("no stream available")?,
    };
    info!("开始下载「{}」：{}（{}）", info.name, stream.quality, readable_size(stream.size));

    let downloader = Downloader::new(Client::new(), "https://www.bilibili.com");
    let base = filenamify(&info.name);
    let ext = if stream.container.is_empty() {
        "bin".to_owned()
    } else {
        stream.container.to_lowercase()
    };
    for (group_index, group) in stream.src.iter().enumerate() {
        // 分离流的第二组是音频轨
        let track = if group_index == 1 { "audio" } else { "video" };
        for (segment_index, url) in group.iter().enumerate() {
            if token.is_cancelled() {
                bail!("download cancelled");
            }
            let name = match (stream.src.len() > 1, group.len() > 1) {
                (true, _) => format!("{base}.{track}.{ext}"),
                (false, true) => format!("{base}.part{}.{ext}", segment_index + 1),
                (false, false) => format!("{base}.{ext}"),
            };
            downloader.fetch(url, &output.join(name)).await?;
        }
    }
    Ok(())
}

fn print_info(info: &ResourceInfo) {
    println!("Site:                       {}", info.site);
    println!("Title:                      {}", info.name);
    println!("Type:                       {}", info.resource_type);
    if info.streams.is_empty() {
        println!("Streams:                    !! No streams available !! Attaching authentication information may help.");
    } else {
        println!("Streams:                    Available quality and codecs:");
        for stream in &info.streams {
            println!("  - format:                 {}", stream.id);
            println!("    container:              {}", stream.container);
            println!("    quality:                {}", stream.quality);
            if !stream.resolution.is_empty() {
                println!("    resolution:             {}", stream.resolution);
            }
            println!("    size:                   {}", readable_size(stream.size));
            println!("    download with argument: {}", stream.download_with);
            println!();
        }
    }
    for warning in &info.warnings {
        println!("  ! {warning}");
    }
}
