use std::path::Path;

use anyhow::{Context, Result};
use futures::TryStreamExt;
use reqwest::Method;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

use crate::bilibili::{Client, PageHeaders};
use crate::utils::readable_size;

/// 将已解析的流地址写入本地文件。
// 拿到 url 后下载不需要任何 cookie 作为身份凭证，
// 但必须带默认 Header，否则会遇到 403 Forbidden 错误
pub struct Downloader {
    client: Client,
    referer: String,
}

impl Downloader {
    pub fn new(client: Client, referer: impl Into<String>) -> Self {
        Self {
            client,
            referer: referer.into(),
        }
    }

    pub async fn fetch(&self, url: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }
        let headers = PageHeaders::referer(self.referer.clone());
        let resp = self
            .client
            .request(Method::GET, url, &headers)
            .send()
            .await?
            .error_for_status()?;
        let expected = resp.content_length().unwrap_or_default();

        let mut reader = StreamReader::new(resp.bytes_stream().map_err(std::io::Error::other));
        let mut file = File::create(path).await.context("创建文件失败")?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        if expected > 0 && written != expected {
            warn!("下载长度与 Content-Length 不一致：{} != {}", written, expected);
        }
        info!("已下载 {} 至 {}", readable_size(written), path.display());
        Ok(())
    }
}
