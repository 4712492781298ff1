//! Infrastructure Layer - 基础设施层
//!
//! - epub: 档案解压、包文档解析、脊柱装配、封面发现
//! - adapters: TTS 客户端、PCM 存储、容器编码器
//! - audio: 格式统一与有声书装配
//! - worker: 合成调度与转换编排
//! - memory: 会话管理内存实现
//! - events: 进度事件广播

pub mod adapters;
pub mod audio;
pub mod epub;
pub mod events;
pub mod memory;
pub mod worker;
