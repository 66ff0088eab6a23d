use anyhow::{Context, Result};
use memchr::memmem;
use serde_json::Value;

/// HTML 中内嵌 JSON 状态的定位标记
pub struct StateMarker {
    pub name: &'static str,
    begin: &'static [u8],
    end: &'static [u8],
}

/// 页面元数据（标题、视频/分P/剧集编号）所在的状态块
pub const INITIAL_STATE: StateMarker = StateMarker {
    name: "__INITIAL_STATE__",
    begin: b"__INITIAL_STATE__=",
    end: b";(function()",
};

/// 当前协商出的播放信息（清晰度、可选档位、流地址）所在的状态块
pub const PLAY_INFO: StateMarker = StateMarker {
    name: "__playinfo__",
    begin: b"__playinfo__=",
    end: b"</script><script>",
};

/// 在 HTML 字节流中定位标记之间的 JSON 文本
pub fn find_state<'a>(html: &'a [u8], marker: &StateMarker) -> Option<&'a [u8]> {
    let begin = memmem::find(html, marker.begin)? + marker.begin.len();
    let end = begin + memmem::find(&html[begin..], marker.end)?;
    Some(&html[begin..end])
}

/// 解码标记后内嵌的 JSON。
/// 标记缺失返回 Ok(None)，标记存在但 JSON 非法则返回错误，两者可由调用方区分。
pub fn extract_state(html: &[u8], marker: &StateMarker) -> Result<Option<Value>> {
    let Some(raw) = find_state(html, marker) else {
        return Ok(None);
    };
    let value = serde_json::from_slice(raw).with_context(|| format!("failed to parse {} as json", marker.name))?;
    Ok(Some(value))
}
