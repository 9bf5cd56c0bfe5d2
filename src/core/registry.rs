//! 生成登记表
//!
//! 按生成 ID 记录进行中的调用（取消令牌、状态、时间戳），单写锁保护；
//! 结束后的记录由后台清理任务按固定间隔显式淘汰，不依赖零散的定时器。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 生成 ID
pub type GenerationId = String;

/// 单次生成的运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl GenerationStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, GenerationStatus::Running)
    }
}

/// 登记表中的单条记录
#[derive(Debug)]
pub struct GenerationEntry {
    pub id: GenerationId,
    /// 调用方会话（同一会话可并发多次生成，彼此独立）
    pub session_id: String,
    pub status: GenerationStatus,
    pub cancel_token: CancellationToken,
    pub started_at: DateTime<Utc>,
    /// 最近一次状态变化
    last_change: Instant,
}

/// 对外展示用快照
#[derive(Debug, Clone, Serialize)]
pub struct GenerationSnapshot {
    pub id: GenerationId,
    pub session_id: String,
    pub status: GenerationStatus,
    pub started_at: DateTime<Utc>,
}

/// 生成登记表
#[derive(Debug)]
pub struct GenerationRegistry {
    entries: RwLock<HashMap<GenerationId, GenerationEntry>>,
    /// 结束后保留时长
    ttl: Duration,
}

impl GenerationRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// 登记一次新生成，返回 ID 与取消令牌
    pub async fn register(&self, session_id: &str) -> (GenerationId, CancellationToken) {
        let id = format!("gen_{}", uuid::Uuid::new_v4());
        let token = CancellationToken::new();
        let entry = GenerationEntry {
            id: id.clone(),
            session_id: session_id.to_string(),
            status: GenerationStatus::Running,
            cancel_token: token.clone(),
            started_at: Utc::now(),
            last_change: Instant::now(),
        };
        self.entries.write().await.insert(id.clone(), entry);
        (id, token)
    }

    /// 取消进行中的生成；不存在或已结束时返回 false
    pub async fn cancel(&self, id: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(entry) if !entry.status.is_finished() => {
                entry.cancel_token.cancel();
                entry.status = GenerationStatus::Cancelled;
                entry.last_change = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// 标记结束（已取消的记录保持 Cancelled）
    pub async fn finish(&self, id: &str, status: GenerationStatus) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(id) {
            if entry.status != GenerationStatus::Cancelled {
                entry.status = status;
            }
            entry.last_change = Instant::now();
        }
    }

    pub async fn get(&self, id: &str) -> Option<GenerationSnapshot> {
        self.entries.read().await.get(id).map(|e| GenerationSnapshot {
            id: e.id.clone(),
            session_id: e.session_id.clone(),
            status: e.status,
            started_at: e.started_at,
        })
    }

    /// 某会话下仍在运行的生成数
    pub async fn running_for_session(&self, session_id: &str) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.session_id == session_id && !e.status.is_finished())
            .count()
    }

    /// 淘汰已结束且超过 TTL 的记录，返回淘汰数量
    pub async fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, e| !(e.status.is_finished() && e.last_change.elapsed() >= ttl));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// 启动后台清理任务：每隔 interval 调用一次 sweep_expired，shutdown 触发后退出
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = registry.sweep_expired().await;
                        if evicted > 0 {
                            tracing::debug!(evicted, "Evicted finished generations");
                        }
                    }
                }
            }
        })
    }
}

impl Default for GenerationRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}
