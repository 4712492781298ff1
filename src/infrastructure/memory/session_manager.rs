//! In-Memory Session Manager Implementation

use dashmap::DashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::application::ports::{
    ConversionSession, ConversionStage, LogEntry, SessionError, SessionManagerPort,
};

/// 内存会话管理器
///
/// 进度与日志的写入都在 DashMap 分片锁的短临界区内完成
pub struct InMemorySessionManager {
    sessions: DashMap<String, ConversionSession>,
}

impl InMemorySessionManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Default for InMemorySessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManagerPort for InMemorySessionManager {
    fn create(&self, session: ConversionSession) -> Result<String, SessionError> {
        let session_id = session.id.clone();
        if self.sessions.contains_key(&session_id) {
            return Err(SessionError::AlreadyExists(session_id));
        }
        self.sessions.insert(session_id.clone(), session);
        tracing::info!(session_id = %session_id, "Conversion session created");
        Ok(session_id)
    }

    fn get(&self, id: &str) -> Result<ConversionSession, SessionError> {
        self.sessions
            .get(id)
            .map(|s| s.clone())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    fn cancel(&self, id: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            if !session.cancelled {
                session.cancelled = true;
                session.log.push(LogEntry {
                    at: Utc::now(),
                    message: "cancellation requested".to_string(),
                });
                tracing::info!(session_id = %id, "Session cancellation requested");
            }
        }
    }

    fn is_cancelled(&self, id: &str) -> bool {
        self.sessions
            .get(id)
            .map(|s| s.cancelled)
            .unwrap_or(true) // 不存在的会话视为已取消
    }

    fn set_stage(
        &self,
        id: &str,
        stage: ConversionStage,
        status: &str,
    ) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let old_stage = session.stage;
        session.stage = stage;
        session.status_text = status.to_string();
        session.log.push(LogEntry {
            at: Utc::now(),
            message: status.to_string(),
        });
        tracing::debug!(
            session_id = %id,
            old_stage = old_stage.as_str(),
            new_stage = stage.as_str(),
            "Session stage changed"
        );
        Ok(())
    }

    fn set_progress(&self, id: &str, fraction: f64) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.progress = fraction.clamp(0.0, 1.0);
        Ok(())
    }

    fn append_log(&self, id: &str, message: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.log.push(LogEntry {
                at: Utc::now(),
                message: message.to_string(),
            });
        }
    }

    fn remove(&self, id: &str) {
        if self.sessions.remove(id).is_some() {
            tracing::debug!(session_id = %id, "Session record removed");
        }
    }
}
