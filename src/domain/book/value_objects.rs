//! Book Context - Value Objects

/// 封面图片
///
/// 从 EPUB manifest 中提取的原始图片字节，附带媒体类型。
/// 封面缺失不是错误，Book 中以 Option 持有。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    /// 原始图片字节
    data: Vec<u8>,
    /// 媒体类型（如 image/jpeg）
    media_type: String,
}

impl CoverImage {
    pub fn new(data: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            data,
            media_type: media_type.into(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }
}

/// 文件名敌对字符集合
///
/// 标题会成为文件名组成部分，这些字符一律替换为空格
const HOSTILE_CHARS: &[char] = &['/', ':', '\\', '?', '*', '"', '<', '>', '|'];

/// 净化标题中的文件名敌对字符
///
/// 替换 `/:\?*"<>|` 为空格，压缩连续空白并去除首尾空白。
/// 控制字符一并移除。
pub fn sanitize_component(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if HOSTILE_CHARS.contains(&c) { ' ' } else { c })
        .collect();

    let mut out = String::with_capacity(replaced.len());
    let mut last_space = true;
    for ch in replaced.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }

    out.trim_end().to_string()
}
