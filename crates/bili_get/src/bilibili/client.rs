use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use anyhow::{anyhow, Result};
use leaky_bucket::RateLimiter;
use parking_lot::Mutex;
use reqwest::{header, Method};
use tokio_util::sync::CancellationToken;

/// 缓存的条目上限，超出后按写入顺序淘汰最早的条目
const CACHE_CAP: usize = 256;

// 对 reqwest::Client 的简单封装，附带访问页面与接口所必须的默认 header
#[derive(Clone)]
pub struct Client(reqwest::Client);

impl Client {
    pub fn new() -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_12_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/63.0.3239.84 Safari/537.36",
            ),
        );
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("*/*"));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static("en-US,en;q=0.5"),
        );
        Self(
            reqwest::Client::builder()
                .default_headers(headers)
                .gzip(true)
                .connect_timeout(Duration::from_secs(10))
                .read_timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
        )
    }

    /// 构造一个请求，按需附加 referer 与 cookie
    pub fn request(&self, method: Method, url: &str, headers: &PageHeaders) -> reqwest::RequestBuilder {
        let mut req = self.0.request(method, url);
        if let Some(referer) = &headers.referer {
            req = req.header(header::REFERER, referer);
        }
        if let Some(cookie) = &headers.cookie {
            req = req.header(header::COOKIE, cookie);
        }
        req
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// 默认 header 之外、随单次请求变化的部分
#[derive(Debug, Default, Clone)]
pub struct PageHeaders {
    pub referer: Option<String>,
    pub cookie: Option<String>,
}

impl PageHeaders {
    pub fn referer(referer: impl Into<String>) -> Self {
        Self {
            referer: Some(referer.into()),
            cookie: None,
        }
    }

    /// 缓存键：URL 拼接按名称排序后的 header 序列
    fn cache_key(&self, url: &str) -> String {
        let mut parts = Vec::new();
        if let Some(cookie) = &self.cookie {
            parts.push(format!("cookie-{cookie}"));
        }
        if let Some(referer) = &self.referer {
            parts.push(format!("referer-{referer}"));
        }
        parts.sort();
        format!("{}{}", url, parts.join("."))
    }
}

#[derive(Default)]
struct FetchCache {
    entries: HashMap<String, Vec<u8>>,
    order: VecDeque<String>,
}

impl FetchCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, body: Vec<u8>) {
        if self.entries.contains_key(&key) {
            return;
        }
        while self.entries.len() >= CACHE_CAP {
            match self.order.pop_front() {
                Some(oldest) => self.entries.remove(&oldest),
                None => break,
            };
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, body);
    }
}

/// 带记忆的内容抓取器：相同 (URL, header) 的 GET 在进程内只会真正发出一次。
/// 检查与写入各自持锁；解析流水线本身串行，不会出现同 key 的并发在途请求。
pub struct CachedFetcher {
    client: Client,
    limiter: RateLimiter,
    cache: Mutex<FetchCache>,
}

impl CachedFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            // 页面与接口请求的限速，避免触发风控
            limiter: RateLimiter::builder()
                .initial(4)
                .refill(4)
                .max(4)
                .interval(Duration::from_millis(500))
                .build(),
            cache: Mutex::new(FetchCache::default()),
        }
    }

    /// 发送 GET 请求并返回响应体，非成功状态码视同传输失败
    pub async fn fetch(&self, url: &str, headers: &PageHeaders, token: &CancellationToken) -> Result<Vec<u8>> {
        let key = headers.cache_key(url);
        if let Some(body) = self.cache.lock().get(&key) {
            return Ok(body);
        }
        let response = self.send(Method::GET, url, headers, token).await?;
        let body = response.bytes().await?.to_vec();
        self.cache.lock().insert(key, body.clone());
        Ok(body)
    }

    /// 通过 HEAD 请求读取 Content-Length，用于探测流的字节大小
    pub async fn content_length(&self, url: &str, headers: &PageHeaders, token: &CancellationToken) -> Result<u64> {
        let response = self.send(Method::HEAD, url, headers, token).await?;
        response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| anyhow!("无法获取 Content-Length"))
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &PageHeaders,
        token: &CancellationToken,
    ) -> Result<reqwest::Response> {
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(anyhow!("request cancelled in limiter")),
            _ = self.limiter.acquire_one() => {},
        }
        let request = self.client.request(method, url, headers);
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(anyhow!("request cancelled before send")),
            res = request.send() => res?,
        };
        Ok(response.error_for_status()?)
    }
}

impl Default for CachedFetcher {
    fn default() -> Self {
        Self::new()
    }
}
