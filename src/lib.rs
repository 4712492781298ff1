//! Bookvox - EPUB 转有声书转换引擎
//!
//! 架构设计: Hexagonal Architecture
//!
//! 领域层 (domain/):
//! - Book Context: 书籍与章节模型
//! - normalize: 章节文本规整管线
//! - splitter: token 超限回退的文本二分
//!
//! 应用层 (application/):
//! - Ports: 端口定义（SpeechSynthesizer, ContainerEncoder, PcmStore, SessionManager）
//! - Error: 统一转换错误分类
//!
//! 基础设施层 (infrastructure/):
//! - EPUB: 档案解压 + 包文档解析 + 脊柱装配 + 封面发现
//! - Adapters: TTS 客户端、WAV PCM 存储、Opus/WAV 容器编码
//! - Audio: 格式统一与有声书装配
//! - Worker: 有界并行合成调度 + 转换编排
//! - Memory: 会话管理内存实现
//! - Events: 进度事件广播

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{load_config, AppConfig};
