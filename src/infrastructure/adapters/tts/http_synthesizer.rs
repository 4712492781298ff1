//! HTTP Synthesizer - 调用外部神经 TTS HTTP 服务
//!
//! 实现 SpeechSynthesizerPort / SynthesizerFactoryPort。
//!
//! 外部 TTS API:
//! GET  {base}/api/tts/voices      → JSON 音色列表
//! POST {base}/api/tts/synthesize  → audio/wav 二进制
//!   Request: {"text": "...", "voice": "...", "language": "..."}  (JSON)
//!   422 Unprocessable Entity 表示输入超出模型上下文

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::application::ports::{
    PcmBuffer, PcmFormat, SampleType, SpeechSynthesizerPort, SynthesizerFactoryPort, TtsError,
    VoiceInfo,
};
use crate::infrastructure::adapters::pcm::decode_wav_bytes;

/// 合成请求体 (JSON)
#[derive(Debug, Serialize)]
struct SynthesizeHttpRequest<'a> {
    text: &'a str,
    voice: &'a str,
    language: &'a str,
}

/// 音色列表响应条目
#[derive(Debug, Deserialize)]
struct VoiceHttpEntry {
    id: String,
    #[serde(default = "default_language")]
    language: String,
    sample_rate: u32,
    #[serde(default = "default_channels")]
    channels: u16,
    /// 样本布局: true 为 float32，false 为 int16
    #[serde(default = "default_float")]
    float: bool,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_channels() -> u16 {
    1
}

fn default_float() -> bool {
    true
}

/// HTTP TTS 客户端配置
#[derive(Debug, Clone)]
pub struct HttpSynthesizerConfig {
    /// TTS 服务基础 URL
    pub base_url: String,
    /// 请求超时时间（秒）
    pub timeout_secs: u64,
}

impl Default for HttpSynthesizerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 120,
        }
    }
}

impl HttpSynthesizerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// HTTP 合成器工厂
///
/// 每次 create 构造独立的客户端实例，worker 间不共享连接状态
pub struct HttpSynthesizerFactory {
    config: HttpSynthesizerConfig,
}

impl HttpSynthesizerFactory {
    pub fn new(config: HttpSynthesizerConfig) -> Self {
        Self { config }
    }

    fn build_client(&self) -> Result<Client, TtsError> {
        Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| TtsError::SynthesisFailed(e.to_string()))
    }

    fn voices_url(&self) -> String {
        format!("{}/api/tts/voices", self.config.base_url)
    }
}

#[async_trait]
impl SynthesizerFactoryPort for HttpSynthesizerFactory {
    async fn voices(&self) -> Result<Vec<VoiceInfo>, TtsError> {
        let client = self.build_client()?;
        let response = client
            .get(self.voices_url())
            .send()
            .await
            .map_err(|e| TtsError::SynthesisFailed(format!("voice enumeration: {}", e)))?;

        if !response.status().is_success() {
            return Err(TtsError::SynthesisFailed(format!(
                "voice enumeration: HTTP {}",
                response.status()
            )));
        }

        let entries: Vec<VoiceHttpEntry> = response
            .json()
            .await
            .map_err(|e| TtsError::SynthesisFailed(format!("voice enumeration: {}", e)))?;

        Ok(entries
            .into_iter()
            .map(|entry| VoiceInfo {
                format: PcmFormat {
                    sample_rate: entry.sample_rate,
                    channels: entry.channels,
                    sample_type: if entry.float {
                        SampleType::F32
                    } else {
                        SampleType::I16
                    },
                    interleaved: true,
                },
                id: entry.id,
                language: entry.language,
            })
            .collect())
    }

    async fn create(
        &self,
        voice: &str,
        language: &str,
    ) -> Result<Box<dyn SpeechSynthesizerPort>, TtsError> {
        Ok(Box::new(HttpSynthesizer {
            client: self.build_client()?,
            synthesize_url: format!("{}/api/tts/synthesize", self.config.base_url),
            voice: voice.to_string(),
            language: language.to_string(),
        }))
    }
}

/// HTTP 合成器
///
/// 绑定一个 (voice, language)，章节间无状态
pub struct HttpSynthesizer {
    client: Client,
    synthesize_url: String,
    voice: String,
    language: String,
}

#[async_trait]
impl SpeechSynthesizerPort for HttpSynthesizer {
    async fn synthesize(&mut self, text: &str) -> Result<Vec<PcmBuffer>, TtsError> {
        let request = SynthesizeHttpRequest {
            text,
            voice: &self.voice,
            language: &self.language,
        };

        tracing::debug!(
            url = %self.synthesize_url,
            text_len = text.len(),
            voice = %self.voice,
            "Sending TTS synthesize request"
        );

        let response = self
            .client
            .post(&self.synthesize_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TtsError::SynthesisFailed("request timeout".to_string())
                } else if e.is_connect() {
                    TtsError::SynthesisFailed(format!("cannot connect to TTS service: {}", e))
                } else {
                    TtsError::SynthesisFailed(e.to_string())
                }
            })?;

        let status = response.status();
        // 模型上下文超限的专用状态码
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(TtsError::TokenLimitExceeded);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(TtsError::VoiceNotFound(self.voice.clone()));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TtsError::SynthesisFailed(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let audio_data = response
            .bytes()
            .await
            .map_err(|e| TtsError::SynthesisFailed(format!("failed to read audio: {}", e)))?;

        let buffer = decode_wav_bytes(&audio_data)
            .map_err(|e| TtsError::SynthesisFailed(format!("invalid audio payload: {}", e)))?;

        tracing::debug!(
            frames = buffer.frames(),
            sample_rate = buffer.format().sample_rate,
            "TTS synthesize completed"
        );

        Ok(vec![buffer])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = HttpSynthesizerConfig::new("http://tts:9000").with_timeout(60);
        assert_eq!(config.base_url, "http://tts:9000");
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_voice_entry_defaults() {
        let entry: VoiceHttpEntry =
            serde_json::from_str(r#"{"id": "v1", "sample_rate": 24000}"#).unwrap();
        assert_eq!(entry.language, "en");
        assert_eq!(entry.channels, 1);
        assert!(entry.float);
    }
}
