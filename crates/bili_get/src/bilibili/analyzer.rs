use std::collections::HashMap;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bilibili::client::{CachedFetcher, PageHeaders};
use crate::bilibili::quality::{ProfileTable, StreamProfile};
use crate::resource::StreamInfo;
use crate::utils::json::JsonNode;

/// 将聚合到的 playinfo 列表合并为最终的流描述集合。
///
/// 输入列表的顺序即优先级：同一格式标识出现多次时，先到者胜出。
/// 单个混合流（durl）直接汇总分段大小；音视频分离流（dash）逐视频轨查档，
/// 按配对音质挑选音频轨，并通过 HEAD 探测补全两者的字节大小。
pub struct StreamReconciler<'a> {
    fetcher: &'a CachedFetcher,
    profiles: &'a ProfileTable,
    referer: String,
    // 同一音频流常被多个视频档位复用，探测结果按音频清晰度编码记忆
    audio_sizes: HashMap<i64, u64>,
}

impl<'a> StreamReconciler<'a> {
    pub fn new(fetcher: &'a CachedFetcher, profiles: &'a ProfileTable, referer: impl Into<String>) -> Self {
        Self {
            fetcher,
            profiles,
            referer: referer.into(),
            audio_sizes: HashMap::new(),
        }
    }

    pub async fn reconcile(
        &mut self,
        payloads: &[Value],
        warnings: &mut Vec<String>,
        token: &CancellationToken,
    ) -> Result<Vec<StreamInfo>> {
        let mut streams: Vec<StreamInfo> = Vec::new();
        for payload in payloads {
            let node = JsonNode::new(payload);
            let quality = node.get_int("quality").context("ill-formed playinfo data")?;
            let Some(profile) = self.profiles.lookup(quality).copied() else {
                warn!("跳过未知的清晰度编码：{}", quality);
                warnings.push(format!("unknown quality code {quality}, source skipped"));
                continue;
            };
            debug!("合并清晰度 {}（{}）的来源", profile.desc, profile.quality);
            if node.get_array("durl").map_or(false, |segments| !segments.is_empty()) {
                if streams.iter().any(|stream| stream.id == profile.id) {
                    continue;
                }
                streams.push(progressive_stream(&profile, node)?);
            } else if node.has("dash.video") {
                self.adaptive_streams(node, &mut streams, warnings, token).await?;
            } else {
                warnings.push(format!("source for quality {quality} carries no stream data"));
            }
        }
        Ok(streams)
    }

    /// 音视频分离流：每个视频轨独立查档并去重，探测失败会中止整次解析
    async fn adaptive_streams(
        &mut self,
        node: JsonNode<'_>,
        streams: &mut Vec<StreamInfo>,
        warnings: &mut Vec<String>,
        token: &CancellationToken,
    ) -> Result<()> {
        let videos = node.get_array("dash.video")?;
        let audios = node.get_array("dash.audio").map(|audios| audios.as_slice()).unwrap_or(&[]);
        for video in videos {
            let video = JsonNode::new(video);
            let quality = match video.get_int("id") {
                Ok(quality) => quality,
                Err(e) => {
                    warnings.push(format!("dash video track without id: {e}"));
                    continue;
                }
            };
            let Some(profile) = self.profiles.lookup(quality).copied() else {
                warn!("跳过未知的视频轨清晰度编码：{}", quality);
                warnings.push(format!("unknown quality code {quality}, track skipped"));
                continue;
            };
            if streams.iter().any(|stream| stream.id == profile.id) {
                continue;
            }
            let video_url = match video.get_str("baseUrl") {
                Ok(url) => url,
                Err(e) => {
                    warnings.push(format!("dash video track {quality} without baseUrl: {e}"));
                    continue;
                }
            };
            let mut size = self
                .probe(video_url, token)
                .await
                .context("failed to probe video stream size")?;
            let src = match match_audio(audios, i64::from(profile.audio_quality)) {
                Some(audio) => {
                    let audio = JsonNode::new(audio);
                    let audio_url = audio.get_str("baseUrl").context("invalid dash audio track")?;
                    size += self.audio_size(audio, audio_url, token).await?;
                    vec![vec![video_url.to_owned()], vec![audio_url.to_owned()]]
                }
                None => vec![vec![video_url.to_owned()]],
            };
            streams.push(stream_info(&profile, size, src));
        }
        Ok(())
    }

    /// 音频轨大小按清晰度编码记忆，一次解析内不重复探测
    async fn audio_size(&mut self, audio: JsonNode<'_>, url: &str, token: &CancellationToken) -> Result<u64> {
        let Ok(quality) = audio.get_int("id") else {
            return self.probe(url, token).await.context("failed to probe audio stream size");
        };
        if let Some(size) = self.audio_sizes.get(&quality) {
            return Ok(*size);
        }
        let size = self
            .probe(url, token)
            .await
            .context("failed to probe audio stream size")?;
        self.audio_sizes.insert(quality, size);
        Ok(size)
    }

    async fn probe(&self, url: &str, token: &CancellationToken) -> Result<u64> {
        let headers = PageHeaders::referer(self.referer.clone());
        self.fetcher.content_length(url, &headers, token).await
    }
}

/// 单个混合流：分段大小求和，分段地址按序归入同一组
fn progressive_stream(profile: &StreamProfile, node: JsonNode<'_>) -> Result<StreamInfo> {
    let segments = node.get_array("durl")?;
    let mut size = 0u64;
    let mut urls = Vec::with_capacity(segments.len());
    for segment in segments {
        let segment = JsonNode::new(segment);
        size += segment.get_int("size").context("invalid durl segment size")? as u64;
        urls.push(segment.get_str("url").context("invalid durl segment url")?.to_owned());
    }
    Ok(stream_info(profile, size, vec![urls]))
}

/// 按配对音质精确匹配音频轨，没有精确匹配时退回第一条音频轨
fn match_audio(audios: &[Value], want: i64) -> Option<&Value> {
    audios
        .iter()
        .find(|audio| JsonNode::new(audio).get_int("id").is_ok_and(|id| id == want))
        .or_else(|| audios.first())
}

fn stream_info(profile: &StreamProfile, size: u64, src: Vec<Vec<String>>) -> StreamInfo {
    StreamInfo {
        id: profile.id.to_owned(),
        container: profile.container.to_owned(),
        quality: profile.desc.to_owned(),
        resolution: profile.resolution.to_owned(),
        size,
        src,
        download_with: format!("--format={}", profile.id),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn durl_payload(quality: i64, size: u64, url: &str) -> Value {
        json!({
            "quality": quality,
            "durl": [{"url": url, "size": size}]
        })
    }

    #[tokio::test]
    async fn test_first_payload_wins_on_duplicate_format() {
        let fetcher = CachedFetcher::new();
        let profiles = ProfileTable::new();
        let mut reconciler = StreamReconciler::new(&fetcher, &profiles, "https://www.bilibili.com");
        let payloads = vec![
            durl_payload(80, 100, "https://example.com/first.flv"),
            durl_payload(80, 999, "https://example.com/second.flv"),
            durl_payload(32, 10, "https://example.com/low.flv"),
        ];
        let mut warnings = Vec::new();
        let streams = reconciler
            .reconcile(&payloads, &mut warnings, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].id, "flv");
        assert_eq!(streams[0].size, 100);
        assert_eq!(streams[0].src, vec![vec!["https://example.com/first.flv".to_owned()]]);
        assert_eq!(streams[1].id, "flv480");
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_quality_code_is_skipped_with_warning() {
        let fetcher = CachedFetcher::new();
        let profiles = ProfileTable::new();
        let mut reconciler = StreamReconciler::new(&fetcher, &profiles, "https://www.bilibili.com");
        let payloads = vec![
            durl_payload(15, 1, "https://example.com/odd.flv"),
            durl_payload(64, 7, "https://example.com/720.flv"),
        ];
        let mut warnings = Vec::new();
        let streams = reconciler
            .reconcile(&payloads, &mut warnings, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].id, "flv720");
        assert_eq!(warnings, vec!["unknown quality code 15, source skipped".to_owned()]);
    }

    #[tokio::test]
    async fn test_payload_without_stream_data_is_recorded() {
        let fetcher = CachedFetcher::new();
        let profiles = ProfileTable::new();
        let mut reconciler = StreamReconciler::new(&fetcher, &profiles, "https://www.bilibili.com");
        let payloads = vec![json!({"quality": 80})];
        let mut warnings = Vec::new();
        let streams = reconciler
            .reconcile(&payloads, &mut warnings, &CancellationToken::new())
            .await
            .unwrap();
        assert!(streams.is_empty());
        assert_eq!(warnings, vec!["source for quality 80 carries no stream data".to_owned()]);
    }

    #[tokio::test]
    async fn test_multi_segment_durl_totals_and_keeps_order() {
        let fetcher = CachedFetcher::new();
        let profiles = ProfileTable::new();
        let mut reconciler = StreamReconciler::new(&fetcher, &profiles, "https://www.bilibili.com");
        let payloads = vec![json!({
            "quality": 112,
            "durl": [
                {"url": "https://example.com/1.flv", "size": 30},
                {"url": "https://example.com/2.flv", "size": 12}
            ]
        })];
        let mut warnings = Vec::new();
        let streams = reconciler
            .reconcile(&payloads, &mut warnings, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(streams[0].size, 42);
        assert_eq!(
            streams[0].src,
            vec![vec![
                "https://example.com/1.flv".to_owned(),
                "https://example.com/2.flv".to_owned()
            ]]
        );
    }

    #[test]
    fn test_match_audio_prefers_exact_quality() {
        let audios = vec![
            json!({"id": 30216, "baseUrl": "https://example.com/low.m4s"}),
            json!({"id": 30280, "baseUrl": "https://example.com/high.m4s"}),
        ];
        let matched = match_audio(&audios, 30280).unwrap();
        assert_eq!(matched["baseUrl"], "https://example.com/high.m4s");
    }

    #[test]
    fn test_match_audio_falls_back_to_first_track() {
        let audios = vec![
            json!({"id": 30216, "baseUrl": "https://example.com/low.m4s"}),
            json!({"id": 30232, "baseUrl": "https://example.com/mid.m4s"}),
        ];
        let matched = match_audio(&audios, 30280).unwrap();
        assert_eq!(matched["baseUrl"], "https://example.com/low.m4s");
        assert!(match_audio(&[], 30280).is_none());
    }
}
