//! Progress Publisher - 转换进度事件广播
//!
//! 每个会话一条 broadcast 通道，外层（CLI 等）订阅后渲染进度。
//! 没有订阅者时发送失败只记 debug，不影响转换。

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// 转换事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ConversionEvent {
    /// 阶段变更
    StageChanged {
        session_id: String,
        stage: String,
        status: String,
        fraction: f64,
    },
    /// 单章合成完成
    ChapterCompleted {
        session_id: String,
        chapter_index: usize,
        title: String,
        duration_secs: f64,
        fraction: f64,
    },
    /// 日志行
    LogLine { session_id: String, message: String },
    /// 转换完成
    Completed {
        session_id: String,
        container_path: String,
        duration_secs: f64,
        limit_hits: u32,
    },
    /// 转换失败
    Failed { session_id: String, error: String },
    /// 转换取消
    Cancelled { session_id: String },
}

/// 进度事件发布器
pub struct ProgressPublisher {
    /// session_id -> broadcast sender
    session_channels: DashMap<String, broadcast::Sender<ConversionEvent>>,
}

impl ProgressPublisher {
    pub fn new() -> Self {
        Self {
            session_channels: DashMap::new(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 注册会话的事件通道
    pub fn register_session(&self, session_id: &str) -> broadcast::Receiver<ConversionEvent> {
        if let Some(sender) = self.session_channels.get(session_id) {
            return sender.subscribe();
        }
        let (tx, rx) = broadcast::channel(256);
        self.session_channels.insert(session_id.to_string(), tx);
        rx
    }

    /// 取消注册会话
    pub fn unregister_session(&self, session_id: &str) {
        self.session_channels.remove(session_id);
    }

    /// 订阅已注册会话
    pub fn subscribe(&self, session_id: &str) -> Option<broadcast::Receiver<ConversionEvent>> {
        self.session_channels.get(session_id).map(|s| s.subscribe())
    }

    /// 发布阶段变更
    pub fn publish_stage(&self, session_id: &str, stage: &str, status: &str, fraction: f64) {
        self.publish(
            session_id,
            ConversionEvent::StageChanged {
                session_id: session_id.to_string(),
                stage: stage.to_string(),
                status: status.to_string(),
                fraction,
            },
        );
    }

    /// 发布单章完成
    pub fn publish_chapter_completed(
        &self,
        session_id: &str,
        chapter_index: usize,
        title: &str,
        duration_secs: f64,
        fraction: f64,
    ) {
        self.publish(
            session_id,
            ConversionEvent::ChapterCompleted {
                session_id: session_id.to_string(),
                chapter_index,
                title: title.to_string(),
                duration_secs,
                fraction,
            },
        );
    }

    /// 发布日志行
    pub fn publish_log(&self, session_id: &str, message: &str) {
        self.publish(
            session_id,
            ConversionEvent::LogLine {
                session_id: session_id.to_string(),
                message: message.to_string(),
            },
        );
    }

    /// 发布转换完成
    pub fn publish_completed(
        &self,
        session_id: &str,
        container_path: &str,
        duration_secs: f64,
        limit_hits: u32,
    ) {
        self.publish(
            session_id,
            ConversionEvent::Completed {
                session_id: session_id.to_string(),
                container_path: container_path.to_string(),
                duration_secs,
                limit_hits,
            },
        );
    }

    /// 发布转换失败
    pub fn publish_failed(&self, session_id: &str, error: &str) {
        self.publish(
            session_id,
            ConversionEvent::Failed {
                session_id: session_id.to_string(),
                error: error.to_string(),
            },
        );
    }

    /// 发布转换取消
    pub fn publish_cancelled(&self, session_id: &str) {
        self.publish(
            session_id,
            ConversionEvent::Cancelled {
                session_id: session_id.to_string(),
            },
        );
    }

    fn publish(&self, session_id: &str, event: ConversionEvent) {
        if let Some(sender) = self.session_channels.get(session_id) {
            if let Err(e) = sender.send(event) {
                tracing::debug!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to publish event (no receivers)"
                );
            }
        }
    }
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let publisher = ProgressPublisher::new();
        let mut rx = publisher.register_session("s1");

        publisher.publish_stage("s1", "parsing", "Parsing EPUB", 0.0);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ConversionEvent::StageChanged { .. }));
    }

    #[tokio::test]
    async fn test_publish_without_receivers_is_noop() {
        let publisher = ProgressPublisher::new();
        // 未注册的会话: 静默丢弃
        publisher.publish_log("ghost", "message");
    }

    #[tokio::test]
    async fn test_unregister() {
        let publisher = ProgressPublisher::new();
        let _rx = publisher.register_session("s1");
        publisher.unregister_session("s1");
        assert!(publisher.subscribe("s1").is_none());
    }
}
