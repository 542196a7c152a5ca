use crate::models::MatchEvent;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// 事件投递失败
#[derive(Debug, thiserror::Error)]
#[error("event delivery failed: {0}")]
pub struct EventError(pub String);

/// 通知/工作流服务的投递接口
///
/// 投递是 fire-and-forget：调用方只记录失败，不因此回滚匹配结果。
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: MatchEvent) -> Result<(), EventError>;
}

/// 仅写日志的事件出口
#[derive(Debug, Default, Clone)]
pub struct LoggingEventSink;

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: MatchEvent) -> Result<(), EventError> {
        let payload = serde_json::to_string(&event).map_err(|e| EventError(e.to_string()))?;
        tracing::info!(target: "txn_match_rust::events", "{} {}", event.event.name(), payload);
        Ok(())
    }
}

/// 进程内广播，供订阅者 (工作流桥接、测试) 消费
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<MatchEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn emit(&self, event: MatchEvent) -> Result<(), EventError> {
        match self.tx.send(event) {
            Ok(_) => Ok(()),
            // 没有订阅者不算失败
            Err(broadcast::error::SendError(event)) => {
                tracing::debug!("No subscriber for {} on match {}", event.event.name(), event.match_id);
                Ok(())
            }
        }
    }
}
