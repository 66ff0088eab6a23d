use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::bilibili::error::BiliError;
use crate::bilibili::page::{self, INITIAL_STATE};
use crate::utils::json::JsonNode;

static BILIBILI_HOST: Lazy<Regex> = Lazy::new(|| regex(r"https?://([\w.-]+\.)?bilibili\.com/"));

static WATCH_LATER: Lazy<Regex> =
    Lazy::new(|| regex(r"https?://(www\.)?bilibili\.com/watchlater/#/(av(\d+)|BV(\S+)/?)"));
static VIDEO_ID: Lazy<Regex> = Lazy::new(|| regex(r"/((av\d+)|BV(\w+))/?"));
static FRAGMENT_PART: Lazy<Regex> = Lazy::new(|| regex(r"/p(\d+)"));

static BANGUMI_SEASON: Lazy<Regex> = Lazy::new(|| regex(r"https?://(www\.)?bilibili\.com/bangumi/play/ss(\d+)"));
static BANGUMI_ANIME: Lazy<Regex> = Lazy::new(|| regex(r"https?://bangumi\.bilibili\.com/anime/(\d+)/play"));
static SHORT_LINK: Lazy<Regex> = Lazy::new(|| regex(r"https?://(www\.)?bilibili\.com/s/(.+)"));
static FESTIVAL: Lazy<Regex> = Lazy::new(|| regex(r"https?://(www\.)?bilibili\.com/festival/"));
static FESTIVAL_BVID: Lazy<Regex> = Lazy::new(|| regex(r"bvid=([^&]+)"));

static QUERY_PART: Lazy<Regex> = Lazy::new(|| regex(r"[?&]p=(\d+)"));
static INDEX_PART: Lazy<Regex> = Lazy::new(|| regex(r"/index_(\d+)"));

static EPISODE: Lazy<Regex> = Lazy::new(|| regex(r"https?://(www\.)?bilibili\.com/bangumi/play/ep(\d+)"));
static EPISODE_META: Lazy<regex::bytes::Regex> = Lazy::new(|| {
    regex::bytes::Regex::new(r#"<meta property="og:url" content="(https://www\.bilibili\.com/bangumi/play/[^"]+)""#)
        .expect("invalid regex")
});
static LIVE: Lazy<Regex> = Lazy::new(|| regex(r"https?://live\.bilibili\.com/"));
static CLIP: Lazy<Regex> = Lazy::new(|| regex(r"https?://vc\.bilibili\.com/video/(\d+)"));
static VIDEO: Lazy<Regex> = Lazy::new(|| regex(r"https?://(www\.)?bilibili\.com/video/(av(\d+)|(bv(\S+))|(BV(\S+)))"));

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("invalid regex")
}

pub fn is_bilibili(url: &str) -> bool {
    BILIBILI_HOST.is_match(url)
}

/// 别名 URL 的改写结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// 不属于任何别名形态，原样使用
    Unchanged,
    /// 已改写为规范地址，后续抓取需携带给定 referer
    Rewritten { url: String, referer: Option<String> },
}

/// 将别名形态的链接改写为规范的视频页地址。
///
/// 稍后再看、短链与节日活动链接只依赖 URL 本身；
/// 番剧短链需要读取已抓取的页面内容来定位第一集的 ep 编号。
pub fn rewrite_alias(url: &str, page_content: Option<&[u8]>) -> Result<Rewrite> {
    // 稍后再看：从片段路径中取视频号与可选的分P编号
    if WATCH_LATER.is_match(url) {
        let vid = VIDEO_ID
            .captures(url)
            .and_then(|captures| captures.get(1))
            .ok_or(BiliError::UrlFormat("watchlater"))?
            .as_str();
        let part = FRAGMENT_PART
            .captures(url)
            .and_then(|captures| captures.get(1))
            .map_or("1", |matched| matched.as_str());
        return Ok(Rewrite::Rewritten {
            url: format!("https://www.bilibili.com/video/{vid}?p={part}"),
            referer: None,
        });
    }

    // 番剧短链：ss 号与历史的 anime 形态都指向整季，改写到第一集的 ep 地址
    if BANGUMI_SEASON.is_match(url) || BANGUMI_ANIME.is_match(url) {
        let html = page_content.context("bangumi link requires the fetched page content")?;
        let state = page::extract_state(html, &INITIAL_STATE)
            .context("invalid json format when parsing bangumi content")?
            .ok_or(BiliError::MarkerNotFound(INITIAL_STATE.name))?;
        let ep_id = JsonNode::new(&state)
            .get_int("epList.[0].id")
            .context("invalid json data when handling bangumi content")?;
        let url = format!("https://www.bilibili.com/bangumi/play/ep{ep_id}");
        return Ok(Rewrite::Rewritten {
            referer: Some(url.clone()),
            url,
        });
    }

    // 通用短链：去掉 /s 前缀落回主域名
    if let Some(captures) = SHORT_LINK.captures(url) {
        return Ok(Rewrite::Rewritten {
            url: format!("https://www.bilibili.com/{}", &captures[2]),
            referer: None,
        });
    }

    // 节日活动页：bvid 作为查询参数携带
    if FESTIVAL.is_match(url) {
        let bvid = FESTIVAL_BVID
            .captures(url)
            .and_then(|captures| captures.get(1))
            .ok_or(BiliError::UrlFormat("festival"))?;
        return Ok(Rewrite::Rewritten {
            url: format!("https://www.bilibili.com/video/{}", bvid.as_str()),
            referer: None,
        });
    }

    Ok(Rewrite::Unchanged)
}

/// 从规范地址中解析分P编号，缺省为 1
pub fn part_number(url: &str) -> usize {
    QUERY_PART
        .captures(url)
        .or_else(|| INDEX_PART.captures(url))
        .and_then(|captures| captures[1].parse().ok())
        .filter(|part| *part >= 1)
        .unwrap_or(1)
}

/// 规范化后页面的资源类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Video,
    Bangumi,
    Live,
    Clip,
    Unknown,
}

/// 根据规范地址与页面内容判断资源类别。
/// 番剧页既可能由 ep 地址识别，也可能由页面内嵌的 og:url 元信息识别。
pub fn classify(url: &str, html: &[u8]) -> PageKind {
    if EPISODE.is_match(url) || EPISODE_META.is_match(html) {
        PageKind::Bangumi
    } else if LIVE.is_match(url) {
        PageKind::Live
    } else if CLIP.is_match(url) {
        PageKind::Clip
    } else if VIDEO.is_match(url) {
        PageKind::Video
    } else {
        PageKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn rewritten(url: &str) -> String {
        match rewrite_alias(url, None).unwrap() {
            Rewrite::Rewritten { url, .. } => url,
            Rewrite::Unchanged => url.to_owned(),
        }
    }

    #[test]
    fn test_watch_later_rewrite() {
        assert_eq!(
            rewritten("https://www.bilibili.com/watchlater/#/BV18J4m1n7To/p3"),
            "https://www.bilibili.com/video/BV18J4m1n7To?p=3"
        );
        assert_eq!(
            rewritten("https://www.bilibili.com/watchlater/#/av170001"),
            "https://www.bilibili.com/video/av170001?p=1"
        );
    }

    #[test]
    fn test_short_link_rewrite() {
        assert_eq!(
            rewritten("https://www.bilibili.com/s/video/BV18J4m1n7To"),
            "https://www.bilibili.com/video/BV18J4m1n7To"
        );
    }

    #[test]
    fn test_festival_rewrite() {
        assert_eq!(
            rewritten("https://www.bilibili.com/festival/2021bnj?bvid=BV1GJ411x7h7&spm_id_from=333.6"),
            "https://www.bilibili.com/video/BV1GJ411x7h7"
        );
        let err = rewrite_alias("https://www.bilibili.com/festival/2021bnj", None).unwrap_err();
        assert_matches!(err.downcast_ref::<BiliError>(), Some(BiliError::UrlFormat("festival")));
    }

    #[test]
    fn test_bangumi_rewrite_reads_page_state() {
        let page = br#"__INITIAL_STATE__={"epList":[{"id":374717},{"id":374718}]};(function(){}())"#;
        let rewrite = rewrite_alias("https://www.bilibili.com/bangumi/play/ss33802", Some(page)).unwrap();
        assert_eq!(
            rewrite,
            Rewrite::Rewritten {
                url: "https://www.bilibili.com/bangumi/play/ep374717".to_owned(),
                referer: Some("https://www.bilibili.com/bangumi/play/ep374717".to_owned()),
            }
        );
    }

    #[test]
    fn test_bangumi_rewrite_with_malformed_state_fails() {
        let page = br#"__INITIAL_STATE__={"epList":[]};(function(){}())"#;
        assert!(rewrite_alias("https://www.bilibili.com/bangumi/play/ss33802", Some(page)).is_err());
        assert!(rewrite_alias("https://bangumi.bilibili.com/anime/6339/play", Some(b"<html></html>")).is_err());
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let aliases = [
            "https://www.bilibili.com/watchlater/#/BV18J4m1n7To/p3",
            "https://www.bilibili.com/s/video/BV18J4m1n7To",
            "https://www.bilibili.com/festival/2021bnj?bvid=BV1GJ411x7h7",
        ];
        for alias in aliases {
            let canonical = rewritten(alias);
            assert_eq!(rewrite_alias(&canonical, None).unwrap(), Rewrite::Unchanged);
        }
        assert_eq!(
            rewrite_alias("https://www.bilibili.com/video/BV18J4m1n7To?p=2", None).unwrap(),
            Rewrite::Unchanged
        );
        assert_eq!(
            rewrite_alias("https://www.bilibili.com/bangumi/play/ep374717", None).unwrap(),
            Rewrite::Unchanged
        );
    }

    #[test]
    fn test_part_number() {
        assert_eq!(part_number("https://www.bilibili.com/video/BV18J4m1n7To?p=4"), 4);
        assert_eq!(part_number("https://www.bilibili.com/video/av170001/index_2.html"), 2);
        assert_eq!(part_number("https://www.bilibili.com/video/BV18J4m1n7To"), 1);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("https://www.bilibili.com/video/BV18J4m1n7To", b""), PageKind::Video);
        assert_eq!(
            classify("https://www.bilibili.com/bangumi/play/ep374717", b""),
            PageKind::Bangumi
        );
        let meta = br#"<meta property="og:url" content="https://www.bilibili.com/bangumi/play/ep374717""#;
        assert_eq!(classify("https://www.bilibili.com/video/BV18J4m1n7To", meta), PageKind::Bangumi);
        assert_eq!(classify("https://live.bilibili.com/1029", b""), PageKind::Live);
        assert_eq!(classify("https://vc.bilibili.com/video/1029", b""), PageKind::Clip);
        assert_eq!(classify("https://www.bilibili.com/read/cv1", b""), PageKind::Unknown);
    }

    #[test]
    fn test_is_bilibili() {
        assert!(is_bilibili("https://www.bilibili.com/video/BV18J4m1n7To"));
        assert!(is_bilibili("https://bangumi.bilibili.com/anime/6339/play"));
        assert!(!is_bilibili("https://www.youtube.com/watch?v=abc"));
    }
}
