use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bilibili::analyzer::StreamReconciler;
use crate::bilibili::client::{CachedFetcher, PageHeaders};
use crate::bilibili::error::BiliError;
use crate::bilibili::page::{self, INITIAL_STATE, PLAY_INFO};
use crate::bilibili::quality::ProfileTable;
use crate::bilibili::url::{self, PageKind, Rewrite};
use crate::bilibili::Validate;
use crate::resource::{MediaAgent, ResourceInfo, ResourceType};
use crate::utils::json::JsonNode;

const APP_KEY: &str = "iVGUTjsxvpLeuDCf";
const APP_SECRET: &str = "aHRmhWMLkdeMuILqORnYZocwMBpMEOdt";

/// 固定的清晰度探测档位，从高到低
const QUALITY_TIERS: &[u32] = &[120, 112, 80, 64, 32, 16];

/// 哔哩哔哩解析代理：持有原始链接与可选的会话令牌，
/// 解析时先规范化链接，再聚合多个来源的 playinfo 并合并为流集合
pub struct Bilibili {
    url: String,
    sessdata: Option<String>,
    fetcher: CachedFetcher,
    profiles: ProfileTable,
}

impl Bilibili {
    pub fn new(url: impl Into<String>, sessdata: Option<String>) -> Self {
        Self {
            url: url.into(),
            sessdata,
            fetcher: CachedFetcher::new(),
            profiles: ProfileTable::new(),
        }
    }

    /// 组装页面抓取所用的 cookie：会话令牌原样转发，外加可选的功能指令
    fn page_cookie(&self, directive: Option<&str>) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(sessdata) = &self.sessdata {
            parts.push(format!("SESSDATA={sessdata}"));
        }
        if let Some(directive) = directive {
            parts.push(directive.to_owned());
        }
        (!parts.is_empty()).then(|| parts.join("; "))
    }

    /// 将别名链接规范化，并抓取最终页面内容。
    /// 番剧短链的改写需要读取页面，因此先抓一次原始链接
    async fn prepare(&self, token: &CancellationToken) -> Result<(String, Vec<u8>)> {
        let headers = PageHeaders {
            referer: None,
            cookie: self.page_cookie(None),
        };
        let html = self
            .fetcher
            .fetch(&self.url, &headers, token)
            .await
            .context("failed to get html content")?;
        let (url, referer) = match url::rewrite_alias(&self.url, Some(&html))? {
            Rewrite::Unchanged => (self.url.clone(), None),
            Rewrite::Rewritten { url, referer } => (url, referer),
        };
        let headers = PageHeaders {
            referer,
            cookie: self.page_cookie(None),
        };
        let html = self
            .fetcher
            .fetch(&url, &headers, token)
            .await
            .context("failed to get html content")?;
        Ok((url, html))
    }

    async fn resolve(&self, token: &CancellationToken) -> Result<ResourceInfo> {
        let (url, html) = self.prepare(token).await?;
        match url::classify(&url, &html) {
            PageKind::Video => self.video_info(&url, &html, token).await,
            PageKind::Bangumi => Err(BiliError::Unsupported("bangumi").into()),
            PageKind::Live => Err(BiliError::Unsupported("live").into()),
            PageKind::Clip => Err(BiliError::Unsupported("clip").into()),
            PageKind::Unknown => Err(BiliError::Unsupported("unknown").into()),
        }
    }

    /// 普通视频页的解析：页面元数据 + 四类来源的 playinfo 聚合 + 流合并
    async fn video_info(&self, url: &str, html: &[u8], token: &CancellationToken) -> Result<ResourceInfo> {
        let state = page::extract_state(html, &INITIAL_STATE)
            .context("failed to parse initial state as json")?
            .ok_or(BiliError::MarkerNotFound(INITIAL_STATE.name))?;
        let mut warnings = Vec::new();
        let meta = page_meta(url, &state, &mut warnings);

        let play_info = page::extract_state(html, &PLAY_INFO).context("failed to parse first playinfo data as json")?;
        let play_info = usable_play_info(play_info);

        // 第二次抓取强制 CURRENT_FNVAL=16，拿到扩展容器的协商结果
        let headers = PageHeaders {
            referer: None,
            cookie: self.page_cookie(Some("CURRENT_FNVAL=16")),
        };
        let html2 = self
            .fetcher
            .fetch(url, &headers, token)
            .await
            .context("failed to get html content")?;
        let play_info2 =
            page::extract_state(&html2, &PLAY_INFO).context("failed to parse second playinfo data as json")?;
        let play_info2 = usable_play_info(play_info2);

        // 页面报告的当前清晰度与可达的最高清晰度，决定每个档位要不要再查接口
        let current_quality = match &play_info {
            Some(info) => JsonNode::new(info).get_int("quality").unwrap_or_else(|e| {
                warnings.push(format!("missing current quality: {e}"));
                -1
            }),
            None => -1,
        };
        let best_quality = match &play_info {
            Some(info) => {
                let node = JsonNode::new(info);
                if node.get_array("accept_quality").map_or(false, |accepted| !accepted.is_empty()) {
                    node.get_int("accept_quality.[0]").unwrap_or_else(|e| {
                        warnings.push(format!("missing best quality: {e}"));
                        -1
                    })
                } else {
                    -1
                }
            }
            None => -1,
        };

        // 聚合顺序即合并时的优先级：页面、二次页面、各档位接口
        let mut play_infos: Vec<Value> = Vec::new();
        play_infos.extend(play_info);
        play_infos.extend(play_info2);

        for &qn in QUALITY_TIERS {
            if current_quality == -1 || i64::from(qn) < current_quality {
                let api_url = play_url_api(meta.avid, meta.cid, qn);
                let content = self
                    .fetcher
                    .fetch(&api_url, &PageHeaders::referer(url.to_owned()), token)
                    .await
                    .context("failed to get response from api url")?;
                let value: Value =
                    serde_json::from_slice(&content).context("failed to parse response from api url as json data")?;
                match value.validate() {
                    Ok(mut value) => play_infos.push(value["data"].take()),
                    Err(e) => {
                        debug!("playurl 接口返回软失败（qn={}）：{:#}", qn, e);
                        warnings.push(format!("playurl api rejected qn={qn}: {e:#}"));
                    }
                }
            }
            if best_quality != -1 && i64::from(qn) < best_quality {
                let api_url = signed_play_url_api(meta.cid, qn);
                let content = self
                    .fetcher
                    .fetch(&api_url, &PageHeaders::referer(url.to_owned()), token)
                    .await
                    .context("failed to get response from interface url")?;
                let value: Value = serde_json::from_slice(&content)
                    .context("failed to parse response from interface url as json data")?;
                match JsonNode::new(&value).get_int("quality") {
                    Ok(quality) if quality > 0 => play_infos.push(value),
                    Ok(_) => warnings.push(format!("interface api returned no quality for qn={qn}")),
                    Err(e) => warnings.push(format!("interface api payload for qn={qn}: {e}")),
                }
            }
        }

        if play_infos.is_empty() {
            bail!(BiliError::NoStreamInfo);
        }
        info!("聚合到 {} 份 playinfo，开始合并", play_infos.len());

        let mut reconciler = StreamReconciler::new(&self.fetcher, &self.profiles, url);
        let streams = reconciler.reconcile(&play_infos, &mut warnings, token).await?;

        Ok(ResourceInfo {
            site: "Bilibili",
            name: meta.title,
            resource_type: ResourceType::Video,
            streams,
            warnings,
        })
    }
}

#[async_trait]
impl MediaAgent for Bilibili {
    fn can_handle(&self, url: &str) -> bool {
        url::is_bilibili(url)
    }

    async fn resource_info(&self, token: &CancellationToken) -> Result<ResourceInfo> {
        self.resolve(token).await
    }
}

struct PageMeta {
    title: String,
    avid: i64,
    cid: i64,
}

/// 从 __INITIAL_STATE__ 中提取标题与编号。
/// 单个字段缺失记入 warnings 而不中断解析，多P视频的标题会追加分P后缀。
fn page_meta(url: &str, state: &Value, warnings: &mut Vec<String>) -> PageMeta {
    let root = JsonNode::new(state);
    let part = url::part_number(url);
    if root.has("videoData") {
        let mut title = match root.get_str("videoData.title") {
            Ok(title) => title.to_owned(),
            Err(e) => {
                warnings.push(format!("missing video title: {e}"));
                String::new()
            }
        };
        let parts = root.get_int("videoData.videos").unwrap_or(0);
        if parts > 1 {
            match root.get_str(&format!("videoData.pages.[{}].part", part - 1)) {
                Ok(name) => title = format!("{title} (P{part}. {name})"),
                Err(e) => warnings.push(format!("missing part name of p{part}: {e}")),
            }
        }
        let avid = root.get_int("aid").unwrap_or_else(|e| {
            warnings.push(format!("missing aid: {e}"));
            0
        });
        let cid = root
            .get_int(&format!("videoData.pages.[{}].cid", part - 1))
            .unwrap_or_else(|e| {
                warnings.push(format!("missing cid of p{part}: {e}"));
                0
            });
        PageMeta { title, avid, cid }
    } else {
        // 没有 videoData 的是节日活动页，元数据挂在 videoInfo 下
        let title = match root.get_str("videoInfo.title") {
            Ok(title) => title.to_owned(),
            Err(e) => {
                warnings.push(format!("missing video title: {e}"));
                String::new()
            }
        };
        let avid = root.get_int("videoInfo.aid").unwrap_or_else(|e| {
            warnings.push(format!("missing aid: {e}"));
            0
        });
        let cid = root.get_int("videoInfo.cid").unwrap_or_else(|e| {
            warnings.push(format!("missing cid: {e}"));
            0
        });
        PageMeta { title, avid, cid }
    }
}

/// 校验 playinfo 的状态码并取出 data 节点，不可用时丢弃
fn usable_play_info(value: Option<Value>) -> Option<Value> {
    let mut value = value?;
    match JsonNode::new(&value).get_int("code") {
        Ok(0) => Some(value["data"].take()),
        _ => None,
    }
}

/// 公开的按档位取流接口
fn play_url_api(avid: i64, cid: i64, qn: u32) -> String {
    format!(
        "https://api.bilibili.com/x/player/playurl?avid={avid}&cid={cid}&qn={qn}&type=&otype=json&fnver=0&fnval=16&fourk=1"
    )
}

/// 旧版带签名的取流接口：参数串拼接共享密钥后取 MD5 十六进制作为 sign
fn signed_play_url_api(cid: i64, qn: u32) -> String {
    let params = format!("appkey={APP_KEY}&cid={cid}&otype=json&qn={qn}&quality={qn}&type=");
    let sign = hex::encode(md5::compute(format!("{params}{APP_SECRET}")).0);
    format!("https://api.bilibili.com/pgc/player/web/v2/playurl?{params}&sign={sign}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_signature_is_deterministic() {
        assert_eq!(
            signed_play_url_api(1176840, 80),
            "https://api.bilibili.com/pgc/player/web/v2/playurl?appkey=iVGUTjsxvpLeuDCf&cid=1176840&otype=json&qn=80&quality=80&type=&sign=152145bc3121197464b97de1b7f84fdf"
        );
        assert_eq!(
            signed_play_url_api(13502509, 112),
            "https://api.bilibili.com/pgc/player/web/v2/playurl?appkey=iVGUTjsxvpLeuDCf&cid=13502509&otype=json&qn=112&quality=112&type=&sign=3f5f8bb3e849525e8ce6184b63108f56"
        );
    }

    #[test]
    fn test_play_url_api_shape() {
        assert_eq!(
            play_url_api(170001, 279786, 64),
            "https://api.bilibili.com/x/player/playurl?avid=170001&cid=279786&qn=64&type=&otype=json&fnver=0&fnval=16&fourk=1"
        );
    }

    #[test]
    fn test_page_meta_single_part_title_is_unchanged() {
        let state = json!({
            "aid": 170001,
            "videoData": {
                "title": "保卫萝卜",
                "videos": 1,
                "pages": [{"cid": 279786, "part": "正片"}]
            }
        });
        let mut warnings = Vec::new();
        let meta = page_meta("https://www.bilibili.com/video/av170001", &state, &mut warnings);
        assert_eq!(meta.title, "保卫萝卜");
        assert_eq!(meta.avid, 170001);
        assert_eq!(meta.cid, 279786);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_page_meta_multi_part_title_gets_suffix() {
        let state = json!({
            "aid": 170001,
            "videoData": {
                "title": "合集",
                "videos": 3,
                "pages": [
                    {"cid": 1, "part": "上"},
                    {"cid": 2, "part": "中"},
                    {"cid": 3, "part": "下"}
                ]
            }
        });
        let mut warnings = Vec::new();
        let meta = page_meta("https://www.bilibili.com/video/av170001?p=2", &state, &mut warnings);
        assert_eq!(meta.title, "合集 (P2. 中)");
        assert_eq!(meta.cid, 2);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_page_meta_festival_branch() {
        let state = json!({
            "videoInfo": {"title": "拜年祭", "aid": 98765, "cid": 43210}
        });
        let mut warnings = Vec::new();
        let meta = page_meta("https://www.bilibili.com/video/BV1GJ411x7h7", &state, &mut warnings);
        assert_eq!(meta.title, "拜年祭");
        assert_eq!(meta.avid, 98765);
        assert_eq!(meta.cid, 43210);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_page_meta_records_missing_fields() {
        let state = json!({"videoData": {"videos": 1, "pages": []}});
        let mut warnings = Vec::new();
        let meta = page_meta("https://www.bilibili.com/video/av170001", &state, &mut warnings);
        assert_eq!(meta.title, "");
        assert_eq!(meta.avid, 0);
        assert_eq!(meta.cid, 0);
        assert_eq!(warnings.len(), 3);
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_resolve_single_part_video() {
        let url = "https://www.bilibili.com/video/BV18J4m1n7To/?spm_id_from=333.999.list.card_archive.click";
        let agent = Bilibili::new(url, None);
        let info = agent.resource_info(&CancellationToken::new()).await.unwrap();
        assert_eq!(info.name, "被克格勃策反的理由可以有多离谱？【硬核狠人66】");
        assert_eq!(info.resource_type, ResourceType::Video);
        assert!(!info.streams.is_empty());
    }

    #[test]
    fn test_usable_play_info() {
        let ok = json!({"code": 0, "data": {"quality": 80}});
        assert_eq!(usable_play_info(Some(ok)).unwrap(), json!({"quality": 80}));
        let rejected = json!({"code": -404, "data": {}});
        assert!(usable_play_info(Some(rejected)).is_none());
        assert!(usable_play_info(Some(json!({"data": {}}))).is_none());
        assert!(usable_play_info(None).is_none());
    }
}
