use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

// 站点支持的资源类别齐备于此，当前只有视频解析会实际构造
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum ResourceType {
    Video,
    Audio,
    Image,
    Live,
    Clip,
}

/// 单个可下载流的描述
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    /// 格式标识，在同一资源内唯一
    pub id: String,
    pub container: String,
    /// 人类可读的清晰度说明
    pub quality: String,
    pub resolution: String,
    /// 所有源地址的总字节数
    pub size: u64,
    /// 源地址分组：单个混合流为一组可顺序拼接的地址，
    /// 音视频分离流为一组视频地址外加至多一组音频地址
    pub src: Vec<Vec<String>>,
    /// 下载该流时使用的命令行参数提示
    pub download_with: String,
}

/// 一次成功解析得到的资源描述，构造后不再变化。
/// streams 按既定优先级排列，格式标识唯一（重复时优先级高的来源胜出）。
#[derive(Debug, Serialize)]
pub struct ResourceInfo {
    pub site: &'static str,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub streams: Vec<StreamInfo>,
    /// 解析过程中被跳过的来源与缺失字段的结构化说明
    pub warnings: Vec<String>,
}

impl ResourceInfo {
    pub fn stream(&self, id: &str) -> Option<&StreamInfo> {
        self.streams.iter().find(|stream| stream.id == id)
    }
}

/// 站点解析代理的统一契约
#[async_trait]
pub trait MediaAgent: Send + Sync {
    /// 判断代理能否处理给定链接
    fn can_handle(&self, url: &str) -> bool;

    /// 将页面链接解析为资源描述
    async fn resource_info(&self, token: &CancellationToken) -> Result<ResourceInfo>;
}
