//! Session Manager Port - 转换会话管理
//!
//! 会话记录一次转换的全生命周期：阶段、进度、有序日志、取消标志。
//! 会话目录在成功与失败后都保留，仅在显式清理时删除。

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Session 错误
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session already exists: {0}")]
    AlreadyExists(String),
}

/// 转换阶段状态机
///
/// Idle → Parsing → Normalizing → Synthesizing → Assembling
///      → Complete | Cancelled | Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionStage {
    Idle,
    Parsing,
    Normalizing,
    Synthesizing,
    Assembling,
    Complete,
    Cancelled,
    Failed,
}

impl ConversionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionStage::Idle => "idle",
            ConversionStage::Parsing => "parsing",
            ConversionStage::Normalizing => "normalizing",
            ConversionStage::Synthesizing => "synthesizing",
            ConversionStage::Assembling => "assembling",
            ConversionStage::Complete => "complete",
            ConversionStage::Cancelled => "cancelled",
            ConversionStage::Failed => "failed",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversionStage::Complete | ConversionStage::Cancelled | ConversionStage::Failed
        )
    }
}

/// 会话日志行
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// 转换会话
#[derive(Debug, Clone)]
pub struct ConversionSession {
    /// 会话唯一标识
    pub id: String,
    /// 会话目录（输出根目录下的 conversion_<UUID>）
    pub folder: PathBuf,
    /// 当前阶段
    pub stage: ConversionStage,
    /// 当前阶段的状态文本
    pub status_text: String,
    /// 进度 [0, 1]
    pub progress: f64,
    /// 取消标志（幂等置位）
    pub cancelled: bool,
    /// 有序日志
    pub log: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
}

impl ConversionSession {
    /// 在输出根目录下创建会话，目录名 conversion_<UUID>
    pub fn new(output_root: &std::path::Path) -> Self {
        let id = Uuid::new_v4().to_string();
        let folder = output_root.join(format!("conversion_{}", id));
        Self {
            id,
            folder,
            stage: ConversionStage::Idle,
            status_text: String::new(),
            progress: 0.0,
            cancelled: false,
            log: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Session Manager Port
///
/// 进度与日志由任意阶段在短临界区内更新，读者看到单调一致的快照
pub trait SessionManagerPort: Send + Sync {
    /// 登记会话
    fn create(&self, session: ConversionSession) -> Result<String, SessionError>;

    /// 取会话快照
    fn get(&self, id: &str) -> Result<ConversionSession, SessionError>;

    /// 置取消标志（幂等，不存在的会话为空操作）
    fn cancel(&self, id: &str);

    /// 查询取消标志（不存在的会话视为已取消）
    fn is_cancelled(&self, id: &str) -> bool;

    /// 更新阶段与状态文本
    fn set_stage(&self, id: &str, stage: ConversionStage, status: &str)
        -> Result<(), SessionError>;

    /// 更新进度 [0, 1]
    fn set_progress(&self, id: &str, fraction: f64) -> Result<(), SessionError>;

    /// 追加日志行
    fn append_log(&self, id: &str, message: &str);

    /// 移除会话记录（不删除磁盘目录）
    fn remove(&self, id: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_session_folder_naming() {
        let session = ConversionSession::new(Path::new("/out"));
        let name = session.folder.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("conversion_"));
        assert_eq!(session.stage, ConversionStage::Idle);
        assert!(!session.cancelled);
    }

    #[test]
    fn test_terminal_stages() {
        assert!(ConversionStage::Complete.is_terminal());
        assert!(ConversionStage::Cancelled.is_terminal());
        assert!(ConversionStage::Failed.is_terminal());
        assert!(!ConversionStage::Synthesizing.is_terminal());
    }
}
