//! Container Encoder Port - 成品压缩容器编码抽象
//!
//! 低层编码器对核心不透明：输入 master PCM 文件与元数据，
//! 产出带标签的压缩容器。具体实现在 infrastructure/adapters 层。

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// 转码错误
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

/// 成品容器格式
///
/// primary = opus（压缩），alternate = wav（直通）。
/// 只影响成品扩展名与编码路径，不影响核心管线。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Opus,
    Wav,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Opus => "opus",
            AudioFormat::Wav => "wav",
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat::Opus
    }
}

/// 嵌入成品的元数据
#[derive(Debug, Clone, Default)]
pub struct EncodeMetadata {
    /// 书名 → title 标签
    pub title: String,
    /// 作者 → artist 标签
    pub artist: String,
    /// 封面图片（字节 + 媒体类型），可缺失
    pub artwork: Option<(Vec<u8>, String)>,
}

/// 转码结果摘要
#[derive(Debug, Clone)]
pub struct TranscodeSummary {
    /// 成品时长（毫秒）
    pub duration_ms: u64,
    /// 输入 master PCM 字节数
    pub input_size: u64,
    /// 成品字节数
    pub output_size: u64,
}

/// Container Encoder Port
#[async_trait]
pub trait ContainerEncoderPort: Send + Sync {
    /// 产出的容器格式
    fn format(&self) -> AudioFormat;

    /// 将 master PCM 文件转码为带标签的成品容器
    ///
    /// 成功与否不负责删除输入文件，清理策略由装配器决定
    async fn transcode(
        &self,
        master_pcm: &Path,
        dest: &Path,
        metadata: &EncodeMetadata,
    ) -> Result<TranscodeSummary, TranscodeError>;
}
