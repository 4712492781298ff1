//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）:
//! 1. 环境变量
//! 2. 配置文件（config.toml）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::path::Path;
use thiserror::Error;

use super::types::AppConfig;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["config", "config.local"];

/// 加载应用配置
///
/// 按优先级从高到低合并配置:
/// 1. 环境变量（前缀 `BOOKVOX_`，层级分隔符 `__`）
/// 2. 配置文件（config.toml 或 config.local.toml）
/// 3. 默认值
///
/// # 环境变量示例
/// - `BOOKVOX_TTS__URL=http://tts-server:8000`
/// - `BOOKVOX_TTS__VOICE=narrator-f`
/// - `BOOKVOX_OUTPUT__DIR=/data/audiobooks`
/// - `BOOKVOX_NORMALIZE__NEWLINE_MODE=single`
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(None)
}

/// 从指定路径加载配置
///
/// # 参数
/// - `config_path` - 可选的配置文件路径，为 None 则使用默认搜索路径
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. 默认值（最低优先级）
    builder = builder
        .set_default("output.dir", "audiobooks")?
        .set_default("output.format", "opus")?
        .set_default("output.bitrate", 32000)?
        .set_default("tts.url", "http://localhost:8000")?
        .set_default("tts.timeout_secs", 120)?
        .set_default("tts.voice", "default")?
        .set_default("tts.language", "en")?
        .set_default("tts.parallel_workers", 4)?
        .set_default("normalize.title_mode", "auto")?
        .set_default("normalize.newline_mode", "double")?
        .set_default("normalize.break_string", "\n\n")?
        .set_default("normalize.footnote_cleanup", false)?
        .set_default("log.level", "info")?
        .set_default("log.json", false)?;

    // 2. 配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 3. 环境变量（最高优先级）
    // 前缀 BOOKVOX_，层级分隔符 __（双下划线）
    builder = builder.add_source(
        Environment::with_prefix("BOOKVOX")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::ParseError(format!("Failed to deserialize config: {}", e)))?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// 验证配置有效性
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.tts.url.is_empty() {
        return Err(ConfigError::ValidationError(
            "TTS URL cannot be empty".to_string(),
        ));
    }

    if config.output.dir.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "Output directory cannot be empty".to_string(),
        ));
    }

    if config.output.bitrate == 0 {
        return Err(ConfigError::ValidationError(
            "Bitrate cannot be 0".to_string(),
        ));
    }

    if config.tts.parallel_workers == 0 {
        return Err(ConfigError::ValidationError(
            "Parallel workers cannot be 0".to_string(),
        ));
    }

    Ok(())
}

/// 打印配置信息（用于启动时日志）
pub fn print_config(config: &AppConfig) {
    tracing::info!("=== Application Configuration ===");
    tracing::info!("Output Directory: {:?}", config.output.dir);
    tracing::info!("Output Format: {:?}", config.output.format);
    tracing::info!("Bitrate: {} bps", config.output.bitrate);
    tracing::info!("TTS URL: {}", config.tts.url);
    tracing::info!("TTS Voice: {}", config.tts.voice);
    tracing::info!("TTS Timeout: {}s", config.tts.timeout_secs);
    tracing::info!("Parallel Workers: {}", config.tts.parallel_workers);
    tracing::info!("Title Mode: {:?}", config.normalize.title_mode);
    tracing::info!("Newline Mode: {:?}", config.normalize.newline_mode);
    tracing::info!("Footnote Cleanup: {}", config.normalize.footnote_cleanup);
    tracing::info!("Replace Rules: {}", config.normalize.rules.len());
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("=================================");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validation_error_for_empty_tts_url() {
        let mut config = AppConfig::default();
        config.tts.url = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_zero_workers() {
        let mut config = AppConfig::default();
        config.tts.parallel_workers = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_zero_bitrate() {
        let mut config = AppConfig::default();
        config.output.bitrate = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[tts]
voice = "narrator-m"

[normalize]
footnote_cleanup = true
"#,
        )
        .unwrap();

        let config = load_config_from_path(Some(&path)).unwrap();
        assert_eq!(config.tts.voice, "narrator-m");
        assert!(config.normalize.footnote_cleanup);
        // 未覆盖的键保持默认
        assert_eq!(config.tts.timeout_secs, 120);
    }
}
