//! TTS Engine Port - 神经语音合成抽象
//!
//! 定义对外部神经 TTS 的统一契约，具体实现在 infrastructure/adapters 层。
//! 模型本身对核心不透明：给定 (text, voice) 返回 PCM 浮点样本序列。

use async_trait::async_trait;
use thiserror::Error;

use super::pcm_store::{PcmBuffer, PcmFormat};

/// TTS 错误
///
/// TokenLimitExceeded 是唯一可恢复的变体，
/// 由调度器以二分回退就地处理；其余一律致命。
#[derive(Debug, Error)]
pub enum TtsError {
    /// 输入超出底层模型上下文
    #[error("Input exceeds the synthesizer token limit")]
    TokenLimitExceeded,

    /// 合成失败（网络、服务端、无效响应等）
    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    /// 请求的音色不存在
    #[error("Voice not found: {0}")]
    VoiceNotFound(String),
}

/// 可用音色描述
///
/// 能力发现的一部分：每个音色声明其规范输出格式，
/// 同一音色的连续调用保证产出相同格式的缓冲。
#[derive(Debug, Clone)]
pub struct VoiceInfo {
    /// 音色标识（对核心不透明）
    pub id: String,
    /// 语言标签
    pub language: String,
    /// 该音色的规范输出格式
    pub format: PcmFormat,
}

/// Speech Synthesizer Port
///
/// 一个实例绑定一个 (voice, language)，章节间无状态
#[async_trait]
pub trait SpeechSynthesizerPort: Send {
    /// 合成一段文本，返回 PCM 缓冲序列
    async fn synthesize(&mut self, text: &str) -> Result<Vec<PcmBuffer>, TtsError>;
}

/// Synthesizer Factory Port
///
/// 调度器按 worker 实例化合成器，避免模型内部的跨章并发
#[async_trait]
pub trait SynthesizerFactoryPort: Send + Sync {
    /// 枚举可用音色
    async fn voices(&self) -> Result<Vec<VoiceInfo>, TtsError>;

    /// 为指定音色创建一个独占合成器实例
    async fn create(
        &self,
        voice: &str,
        language: &str,
    ) -> Result<Box<dyn SpeechSynthesizerPort>, TtsError>;
}
