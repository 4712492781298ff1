//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;
use std::path::PathBuf;

use crate::application::ports::AudioFormat;
use crate::domain::normalize::NormalizeOptions;

/// 应用主配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// 输出配置
    #[serde(default)]
    pub output: OutputConfig,

    /// TTS 引擎配置
    #[serde(default)]
    pub tts: TtsConfig,

    /// 文本规整配置
    #[serde(default)]
    pub normalize: NormalizeOptions,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            tts: TtsConfig::default(),
            normalize: NormalizeOptions::default(),
            log: LogConfig::default(),
        }
    }
}

/// 输出配置
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// 成品与会话目录的输出根目录
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// 成品容器格式
    /// 可选: opus, wav
    #[serde(default)]
    pub format: AudioFormat,

    /// 有损压缩目标比特率（bps）
    /// 语音推荐 16000-64000
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("audiobooks")
}

fn default_bitrate() -> u32 {
    32000 // 32kbps，语音足够
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            format: AudioFormat::default(),
            bitrate: default_bitrate(),
        }
    }
}

/// TTS 引擎配置
#[derive(Debug, Clone, Deserialize)]
pub struct TtsConfig {
    /// TTS 服务基础 URL
    #[serde(default = "default_tts_url")]
    pub url: String,

    /// 请求超时时间（秒）
    #[serde(default = "default_tts_timeout")]
    pub timeout_secs: u64,

    /// 音色标识（来自适配器的枚举）
    #[serde(default = "default_voice")]
    pub voice: String,

    /// 语言标签
    #[serde(default = "default_language")]
    pub language: String,

    /// 并行 worker 上限
    /// 调度器再按 min(CPU, 章节数, 8) 收紧
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
}

fn default_tts_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_tts_timeout() -> u64 {
    120
}

fn default_voice() -> String {
    "default".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_parallel_workers() -> usize {
    4
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            url: default_tts_url(),
            timeout_secs: default_tts_timeout(),
            voice: default_voice(),
            language: default_language(),
            parallel_workers: default_parallel_workers(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否启用 JSON 格式
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::normalize::{NewlineMode, TitleMode};

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.output.dir, PathBuf::from("audiobooks"));
        assert_eq!(config.output.format, AudioFormat::Opus);
        assert_eq!(config.tts.url, "http://localhost:8000");
        assert_eq!(config.tts.parallel_workers, 4);
        assert_eq!(config.normalize.title_mode, TitleMode::Auto);
        assert_eq!(config.normalize.newline_mode, NewlineMode::Double);
    }

    #[test]
    fn test_toml_round_trip() {
        let toml = r#"
            [output]
            format = "wav"

            [tts]
            voice = "narrator-f"
            parallel_workers = 2

            [normalize]
            newline_mode = "single"
            break_string = " | "
            footnote_cleanup = true

            [[normalize.rules]]
            pattern = "Dr\\."
            replacement = "Doctor"
            case_insensitive = true
        "#;
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.output.format, AudioFormat::Wav);
        assert_eq!(config.tts.voice, "narrator-f");
        assert_eq!(config.normalize.newline_mode, NewlineMode::Single);
        assert_eq!(config.normalize.rules.len(), 1);
        assert!(config.normalize.rules[0].case_insensitive);
    }
}
