pub mod json;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

pub fn init_logger(log_level: &str) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new(
            "%b %d %H:%M:%S".to_owned(),
        ))
        .with_filter(build_filter(log_level));

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .expect("初始化日志失败");
}

/// 构建日志过滤器，压低 http 栈的噪音
fn build_filter(base_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::builder().parse_lossy(format!(
        "{},\
            hyper=warn,\
            reqwest=warn,\
            h2=warn",
        base_level
    ))
}

/// 以人类可读的单位展示字节数
pub fn readable_size(size: u64) -> String {
    const UNITS: &[(u64, &str)] = &[(1 << 40, "TB"), (1 << 30, "GB"), (1 << 20, "MB"), (1 << 10, "KB")];
    for &(scale, unit) in UNITS {
        if size >= scale {
            return format!("{:.2}{} ({} bytes)", size as f64 / scale as f64, unit, size);
        }
    }
    format!("{size} bytes")
}

/// 清理标题中不能出现在文件名里的字符
pub fn filenamify(input: &str) -> String {
    // Windows 不允许的字符与 Unicode 控制字符
    static RESERVED: Lazy<Regex> =
        Lazy::new(|| Regex::new("[<>:\"/\\\\|?*\u{0000}-\u{001F}]+").expect("invalid regex"));
    let cleaned = RESERVED.replace_all(input, "_");
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        "untitled".to_owned()
    } else {
        trimmed.to_owned()
    }
}
