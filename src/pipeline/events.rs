//! 流式事件协议：编排器 -> 调用方的有序事件帧
//!
//! 帧格式 `{ "type": ..., "data": ... }`；每条流恰好一个终止帧（done 或 error）。
//! EventSink 包装有界通道发送端，发送与阶段 / 文件完成同步进行，终止帧之后的事件一律丢弃。

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::pipeline::{FallbackPath, FileChange, GenerationStrategy, ParseStage};

/// 编排状态机的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Planning,
    Designing,
    TemplateFilling,
    Coding,
    Validating,
    Repairing,
    Revalidating,
    AgenticFallback,
    Finalizing,
    Cancelled,
}

/// done 帧携带的摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneSummary {
    /// 最终文件集的全部路径；调用方据此丢弃中途被放弃的候选留下的路径
    pub files: Vec<String>,
    pub file_count: usize,
    pub strategy: GenerationStrategy,
    pub fallback_path: Option<FallbackPath>,
    pub parse_stage: ParseStage,
    pub repair_attempts: u32,
    pub duration_ms: u64,
}

/// 单个事件帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Status { stage: PipelineStage, message: String },
    FileCreated { path: String, content: String },
    FileEdited { path: String, content: String },
    ToolCall { tool: String, args: serde_json::Value },
    Message { text: String },
    Error { message: String, cancelled: bool },
    Done(DoneSummary),
    InstallPackages { packages: Vec<String> },
}

impl StreamEvent {
    pub fn status(stage: PipelineStage, message: impl Into<String>) -> Self {
        StreamEvent::Status {
            stage,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done(_) | StreamEvent::Error { .. })
    }

    /// 序列化为一行 NDJSON（含换行）
    pub fn to_ndjson_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("{}\n", json),
            Err(e) => format!(
                "{{\"type\":\"error\",\"data\":{{\"message\":\"serialize failed: {}\",\"cancelled\":false}}}}\n",
                e.to_string().replace('"', "'")
            ),
        }
    }

    pub fn from_ndjson_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl From<FileChange> for StreamEvent {
    fn from(change: FileChange) -> Self {
        match change {
            FileChange::Created { path, content } => StreamEvent::FileCreated { path, content },
            FileChange::Edited { path, content } => StreamEvent::FileEdited { path, content },
        }
    }
}

/// 事件发送端：可选通道（无调用方时丢弃），终止帧之后不再发送
#[derive(Debug)]
pub struct EventSink {
    tx: Option<mpsc::Sender<StreamEvent>>,
    closed: AtomicBool,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            tx: Some(tx),
            closed: AtomicBool::new(false),
        }
    }

    /// 不向任何人发送（仅需要最终结果的调用方）
    pub fn detached() -> Self {
        Self {
            tx: None,
            closed: AtomicBool::new(false),
        }
    }

    /// 发送事件；通道已满时等待，接收端已关闭时记录后继续（生成不因调用方断开而中止）
    pub async fn emit(&self, event: StreamEvent) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!(?event, "Event after terminal frame dropped");
            return;
        }
        if event.is_terminal() {
            self.closed.store(true, Ordering::SeqCst);
        }
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                tracing::debug!("Event receiver dropped");
            }
        }
    }
}
