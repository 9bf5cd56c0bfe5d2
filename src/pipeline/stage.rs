//! 阶段公共设施：超时 + 取消控制、JSON 调用、阶段产出来源

use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::core::PipelineError;
use crate::llm::{generate_content, CompletionOptions, LlmClient, LlmError};
use crate::pipeline::{decode_json, ParseStage};

/// 单次调用内所有阶段共享的控制参数
#[derive(Debug, Clone)]
pub struct StageControl {
    /// 单次推理超时；超时与其它失败同等处理
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl StageControl {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    /// 已取消则返回 Cancelled，用于阶段转换前的检查
    pub fn checkpoint(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// 阶段产出的来源：模型输出或本地确定性兜底
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageSource {
    Model(ParseStage),
    Fallback { reason: String },
}

impl StageSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, StageSource::Fallback { .. })
    }

    pub fn parse_stage(&self) -> ParseStage {
        match self {
            StageSource::Model(stage) => *stage,
            StageSource::Fallback { .. } => ParseStage::Deterministic,
        }
    }
}

/// JSON 调用失败：取消需要越过阶段边界，其它失败由阶段自行兜底
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallFailure {
    Cancelled,
    Failed(String),
}

impl CallFailure {
    /// 取消转为编排层错误；其它失败交还原因字符串
    pub(crate) fn into_reason(self) -> Result<String, PipelineError> {
        match self {
            CallFailure::Cancelled => Err(PipelineError::Cancelled),
            CallFailure::Failed(reason) => Ok(reason),
        }
    }
}

/// 调用推理服务并按「整段 -> 提取」两级解析为 T
pub(crate) async fn request_json<T: DeserializeOwned>(
    llm: &dyn LlmClient,
    prompt: &str,
    options: &CompletionOptions,
    control: &StageControl,
) -> Result<(T, ParseStage), CallFailure> {
    tracing::debug!(
        prompt_chars = prompt.len(),
        max_tokens = ?options.max_output_tokens,
        "Inference request"
    );
    let text = generate_content(llm, prompt, options, control.timeout, &control.cancel)
        .await
        .map_err(|e| match e {
            LlmError::Cancelled => CallFailure::Cancelled,
            other => CallFailure::Failed(other.to_string()),
        })?;
    decode_json::<T>(&text).map_err(|e| CallFailure::Failed(e.to_string()))
}
