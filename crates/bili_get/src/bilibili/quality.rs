use std::collections::HashMap;

/// 单个清晰度档位的静态描述，来自平台的清晰度对照表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProfile {
    /// 格式标识，作为流在资源内的唯一键
    pub id: &'static str,
    pub quality: u32,
    /// 与该档位配对的音频清晰度编码
    pub audio_quality: u32,
    pub container: &'static str,
    pub resolution: &'static str,
    pub desc: &'static str,
}

const PROFILES: &[(u32, StreamProfile)] = &[
    (
        127,
        StreamProfile {
            id: "hdflv2_8k",
            quality: 127,
            audio_quality: 30280,
            container: "FLV",
            resolution: "4320p",
            desc: "超高清 8K",
        },
    ),
    (
        126,
        StreamProfile {
            id: "hdflv2_dolby",
            quality: 126,
            audio_quality: 30280,
            container: "FLV",
            resolution: "3840p",
            desc: "杜比视界",
        },
    ),
    (
        125,
        StreamProfile {
            id: "hdflv2_hdr",
            quality: 125,
            audio_quality: 30280,
            container: "FLV",
            resolution: "2160p",
            desc: "真彩 HDR",
        },
    ),
    (
        120,
        StreamProfile {
            id: "hdflv2_4k",
            quality: 120,
            audio_quality: 30280,
            container: "FLV",
            resolution: "2160p",
            desc: "超清 4K",
        },
    ),
    (
        116,
        StreamProfile {
            id: "flv_p60",
            quality: 116,
            audio_quality: 30280,
            container: "FLV",
            resolution: "1080p",
            desc: "高清 1080P60",
        },
    ),
    (
        112,
        StreamProfile {
            id: "hdflv2",
            quality: 112,
            audio_quality: 30280,
            container: "FLV",
            resolution: "1080p",
            desc: "高清 1080P+",
        },
    ),
    (
        80,
        StreamProfile {
            id: "flv",
            quality: 80,
            audio_quality: 30280,
            container: "FLV",
            resolution: "1080p",
            desc: "高清 1080P",
        },
    ),
    (
        74,
        StreamProfile {
            id: "flv720_p60",
            quality: 74,
            audio_quality: 30280,
            container: "FLV",
            resolution: "720p",
            desc: "高清 720P60",
        },
    ),
    (
        64,
        StreamProfile {
            id: "flv720",
            quality: 64,
            audio_quality: 30280,
            container: "FLV",
            resolution: "720p",
            desc: "高清 720P",
        },
    ),
    (
        48,
        StreamProfile {
            id: "hdmp4",
            quality: 48,
            audio_quality: 30280,
            container: "MP4",
            resolution: "720p",
            desc: "高清 720P (MP4)",
        },
    ),
    (
        32,
        StreamProfile {
            id: "flv480",
            quality: 32,
            audio_quality: 30280,
            container: "FLV",
            resolution: "480p",
            desc: "清晰 480P",
        },
    ),
    (
        16,
        StreamProfile {
            id: "flv360",
            quality: 16,
            audio_quality: 30216,
            container: "FLV",
            resolution: "360p",
            desc: "流畅 360P",
        },
    ),
    (
        0,
        StreamProfile {
            id: "mp4",
            quality: 0,
            audio_quality: 0,
            container: "",
            resolution: "",
            desc: "",
        },
    ),
    (
        1,
        StreamProfile {
            id: "jpg",
            quality: 0,
            audio_quality: 0,
            container: "",
            resolution: "",
            desc: "",
        },
    ),
];

/// 清晰度编码到档位描述的只读对照表。
/// 构造一次后以引用传入需要它的组件；未知编码是可恢复的未命中而不是错误。
pub struct ProfileTable {
    profiles: HashMap<u32, StreamProfile>,
}

impl ProfileTable {
    pub fn new() -> Self {
        Self {
            profiles: PROFILES.iter().copied().collect(),
        }
    }

    pub fn lookup(&self, quality: i64) -> Option<&StreamProfile> {
        let quality = u32::try_from(quality).ok()?;
        self.profiles.get(&quality)
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_codes() {
        let table = ProfileTable::new();
        let profile = table.lookup(80).unwrap();
        assert_eq!(profile.id, "flv");
        assert_eq!(profile.audio_quality, 30280);
        assert_eq!(table.lookup(16).unwrap().audio_quality, 30216);
        assert_eq!(table.lookup(1).unwrap().id, "jpg");
    }

    #[test]
    fn test_unknown_code_is_a_miss() {
        let table = ProfileTable::new();
        assert!(table.lookup(15).is_none());
        assert!(table.lookup(-1).is_none());
    }
}
