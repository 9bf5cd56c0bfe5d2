//! 调用方侧的流消费者：把事件帧归并为最终文件集
//!
//! 每次新的生成开始时必须先把累积的文件集清空，绝不与上一次调用的结果合并。

use tokio::sync::mpsc;

use crate::pipeline::{DoneSummary, FileSet, PipelineStage, StreamEvent};

/// 流的终止状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Done(DoneSummary),
    Failed { message: String, cancelled: bool },
}

/// 事件归并器
#[derive(Debug, Default)]
pub struct StreamConsumer {
    /// 第几次生成（每次 begin 自增）
    generation: u64,
    files: FileSet,
    messages: Vec<String>,
    stage: Option<PipelineStage>,
    tool_calls: Vec<String>,
    packages: Vec<String>,
    outcome: Option<StreamOutcome>,
}

impl StreamConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始一次新生成：清空所有累积状态
    pub fn begin(&mut self) {
        self.generation += 1;
        self.files = FileSet::new();
        self.messages.clear();
        self.stage = None;
        self.tool_calls.clear();
        self.packages.clear();
        self.outcome = None;
    }

    /// 归并一个事件；终止后到达的事件被忽略并返回 false
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        match event {
            StreamEvent::Status { stage, .. } => self.stage = Some(stage),
            StreamEvent::FileCreated { path, content } | StreamEvent::FileEdited { path, content } => {
                self.files.insert(path, content);
            }
            StreamEvent::ToolCall { tool, .. } => self.tool_calls.push(tool),
            StreamEvent::Message { text } => self.messages.push(text),
            StreamEvent::InstallPackages { packages } => self.packages.extend(packages),
            StreamEvent::Done(summary) => {
                self.files.retain_paths(&summary.files);
                self.outcome = Some(StreamOutcome::Done(summary));
            }
            StreamEvent::Error { message, cancelled } => {
                self.outcome = Some(StreamOutcome::Failed { message, cancelled })
            }
        }
        true
    }

    /// 消费整条流直到终止帧或通道关闭；开始前先重置
    pub async fn consume(&mut self, mut rx: mpsc::Receiver<StreamEvent>) -> Option<&StreamOutcome> {
        self.begin();
        while let Some(event) = rx.recv().await {
            self.apply(event);
            if self.outcome.is_some() {
                break;
            }
        }
        self.outcome.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn files(&self) -> &FileSet {
        &self.files
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn stage(&self) -> Option<PipelineStage> {
        self.stage
    }

    pub fn tool_calls(&self) -> &[String] {
        &self.tool_calls
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn outcome(&self) -> Option<&StreamOutcome> {
        self.outcome.as_ref()
    }
}
