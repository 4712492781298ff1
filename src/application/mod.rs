//! Application Layer - 应用层
//!
//! - Ports: 出站端口（SpeechSynthesizer, ContainerEncoder, PcmStore, SessionManager）
//! - Error: 统一的转换错误分类

pub mod error;
pub mod ports;

pub use error::ConversionError;
