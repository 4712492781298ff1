//! Fake Synthesizer - 用于测试的合成器
//!
//! 不调用真实 TTS 服务，按配置产出确定性的正弦波 PCM:
//! - char_limit: 超过该字符数抛 TokenLimitExceeded（测二分回退）
//! - fixed_frames: 每次成功调用固定帧数（测时长算术）
//! - fail_marker: 文本含标记串时抛 SynthesisFailed（测中止策略）
//! - delay_ms: 模拟推理延迟（测取消时机）

use async_trait::async_trait;
use std::f32::consts::TAU;

use crate::application::ports::{
    PcmBuffer, PcmFormat, SampleData, SampleType, SpeechSynthesizerPort, SynthesizerFactoryPort,
    TtsError, VoiceInfo,
};

/// Fake 合成器配置
#[derive(Debug, Clone)]
pub struct FakeSynthesizerConfig {
    /// 产出格式（同一音色恒定）
    pub format: PcmFormat,
    /// 字符数上限，超过抛 TokenLimitExceeded；None 不限
    pub char_limit: Option<usize>,
    /// 固定每次调用帧数；None 时按字符数推（每字符约 60 帧）
    pub fixed_frames: Option<usize>,
    /// 文本包含该标记时抛 SynthesisFailed
    pub fail_marker: Option<String>,
    /// 模拟推理延迟（毫秒）
    pub delay_ms: u64,
}

impl Default for FakeSynthesizerConfig {
    fn default() -> Self {
        Self {
            format: PcmFormat::mono_f32(24000),
            char_limit: None,
            fixed_frames: None,
            fail_marker: None,
            delay_ms: 0,
        }
    }
}

/// 无上限时每字符产出的帧数
const FRAMES_PER_CHAR: usize = 60;

/// Fake 合成器工厂
pub struct FakeSynthesizerFactory {
    config: FakeSynthesizerConfig,
}

impl FakeSynthesizerFactory {
    pub fn new(config: FakeSynthesizerConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(FakeSynthesizerConfig::default())
    }
}

#[async_trait]
impl SynthesizerFactoryPort for FakeSynthesizerFactory {
    async fn voices(&self) -> Result<Vec<VoiceInfo>, TtsError> {
        Ok(vec![VoiceInfo {
            id: "fake".to_string(),
            language: "en".to_string(),
            format: self.config.format,
        }])
    }

    async fn create(
        &self,
        _voice: &str,
        _language: &str,
    ) -> Result<Box<dyn SpeechSynthesizerPort>, TtsError> {
        Ok(Box::new(FakeSynthesizer {
            config: self.config.clone(),
        }))
    }
}

/// Fake 合成器
pub struct FakeSynthesizer {
    config: FakeSynthesizerConfig,
}

impl FakeSynthesizer {
    /// 440Hz 正弦波样本
    fn generate(&self, frames: usize) -> PcmBuffer {
        let format = self.config.format;
        let rate = format.sample_rate.max(1) as f32;
        let samples_total = frames * format.channels as usize;

        let data = match format.sample_type {
            SampleType::F32 => {
                let mut v = Vec::with_capacity(samples_total);
                for frame in 0..frames {
                    let s = (TAU * 440.0 * frame as f32 / rate).sin() * 0.25;
                    for _ in 0..format.channels {
                        v.push(s);
                    }
                }
                SampleData::F32(v)
            }
            SampleType::I16 => {
                let mut v = Vec::with_capacity(samples_total);
                for frame in 0..frames {
                    let s = (TAU * 440.0 * frame as f32 / rate).sin() * 0.25;
                    for _ in 0..format.channels {
                        v.push((s * 32767.0) as i16);
                    }
                }
                SampleData::I16(v)
            }
        };

        PcmBuffer::new(format, data)
    }
}

#[async_trait]
impl SpeechSynthesizerPort for FakeSynthesizer {
    async fn synthesize(&mut self, text: &str) -> Result<Vec<PcmBuffer>, TtsError> {
        if self.config.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.config.delay_ms)).await;
        }

        if let Some(marker) = &self.config.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(TtsError::SynthesisFailed(format!(
                    "injected failure on marker {:?}",
                    marker
                )));
            }
        }

        let chars = text.chars().count();
        if let Some(limit) = self.config.char_limit {
            if chars >= limit {
                return Err(TtsError::TokenLimitExceeded);
            }
        }

        let frames = self
            .config
            .fixed_frames
            .unwrap_or_else(|| chars.max(1) * FRAMES_PER_CHAR);

        Ok(vec![self.generate(frames)])
    }
}
