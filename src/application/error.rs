//! 应用层错误定义
//!
//! 统一的转换管线错误类型。
//!
//! 恢复策略:
//! - Parse / NormalizationFailed / SynthesisFailed / TranscodeFailed / Io: 致命，中止本次转换
//! - TokenLimitExceeded: 不出现在这里，由调度器二分回退就地消化
//! - 格式转换失败: 不出现在这里，记录警告后沿用原缓冲
//! - Cancelled: 终态，保留部分产物
//!
//! 会话目录在任何失败路径上都保留，供用户检查。

use std::path::PathBuf;

use thiserror::Error;

/// 转换管线错误
#[derive(Debug, Error)]
pub enum ConversionError {
    /// EPUB 解析失败（档案损坏、缺 container/OPF、空脊柱）
    #[error("EPUB parse error: {0}")]
    Parse(String),

    /// 章节规整失败（无效的用户替换规则等）
    #[error("Normalization failed for chapter {chapter}: {message}")]
    NormalizationFailed { chapter: usize, message: String },

    /// TTS 合成失败（不含可恢复的 token 超限）
    #[error("Synthesis failed for chapter {chapter}: {message}")]
    SynthesisFailed { chapter: usize, message: String },

    /// 成品容器转码失败，master PCM 保留以供诊断
    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    /// 用户取消
    #[error("Conversion cancelled")]
    Cancelled,

    /// 文件 I/O 错误
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 内部错误（会话管理等不应发生的状况）
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConversionError {
    /// 创建章节规整错误
    pub fn normalization(chapter: usize, message: impl Into<String>) -> Self {
        Self::NormalizationFailed {
            chapter,
            message: message.into(),
        }
    }

    /// 创建章节合成错误
    pub fn synthesis(chapter: usize, message: impl Into<String>) -> Self {
        Self::SynthesisFailed {
            chapter,
            message: message.into(),
        }
    }

    /// 创建 I/O 错误
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// 是否为取消终态
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<crate::application::ports::TranscodeError> for ConversionError {
    fn from(err: crate::application::ports::TranscodeError) -> Self {
        Self::TranscodeFailed(err.to_string())
    }
}

impl From<crate::application::ports::SessionError> for ConversionError {
    fn from(err: crate::application::ports::SessionError) -> Self {
        Self::Internal(err.to_string())
    }
}
