//! 流水线错误类型
//!
//! 各阶段内部的推理失败都在阶段边界内被本地兜底吸收，只有取消与编排层故障会越过阶段边界。

use thiserror::Error;

/// 编排层错误：调用方边界会把它转换为 `error` 事件与面向用户的提示
///
/// 处理器失败不在此列：它们在编排器内部被降级路径吸收。
#[derive(Error, Debug)]
pub enum PipelineError {
    /// 外部取消信号触发，不再进行任何阶段转换
    #[error("Generation cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

/// 生成处理器（fast / agentic）错误
#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    /// 模型未产出任何文件
    #[error("No files generated")]
    EmptyFileSet,

    #[error("Agent step limit reached after {0} steps")]
    StepLimit(usize),

    #[error("Handler cancelled")]
    Cancelled,
}

impl From<crate::llm::LlmError> for HandlerError {
    fn from(err: crate::llm::LlmError) -> Self {
        match err {
            crate::llm::LlmError::Cancelled => HandlerError::Cancelled,
            other => HandlerError::Llm(other.to_string()),
        }
    }
}
