//! Configuration - 分层配置
//!
//! 优先级（从高到低）: 环境变量 > 配置文件 > 默认值

mod loader;
mod types;

pub use loader::{load_config, load_config_from_path, print_config, ConfigError};
pub use types::{AppConfig, LogConfig, OutputConfig, TtsConfig};
