//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient::complete（非流式，JSON 输出）。
//! 流水线各阶段通过 generate_content 调用：统一套上阶段超时与取消令牌。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::llm::Message;

/// 推理服务错误（网络 / 超时 / 空回复 / 取消）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Empty response")]
    EmptyResponse,

    #[error("Request cancelled")]
    Cancelled,
}

/// 推理深度（映射到推理模型的 reasoning effort）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceDepth {
    Minimal,
    Low,
    Medium,
}

/// 单次调用参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    /// 覆盖客户端默认模型
    pub model: Option<String>,
    /// 要求返回 JSON 对象
    pub json_response: bool,
    pub depth: Option<InferenceDepth>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl CompletionOptions {
    pub fn json() -> Self {
        Self {
            json_response: true,
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_depth(mut self, depth: InferenceDepth) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 单条 prompt 调用：与取消令牌、超时竞争，先到者决定结果
///
/// 取消时立即丢弃进行中的请求 future 并返回 Cancelled。
pub async fn generate_content(
    llm: &dyn LlmClient,
    prompt: &str,
    options: &CompletionOptions,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, LlmError> {
    complete_messages(llm, &[Message::user(prompt)], options, timeout, cancel).await
}

/// 多轮消息版本（agentic 处理器使用）
pub async fn complete_messages(
    llm: &dyn LlmClient,
    messages: &[Message],
    options: &CompletionOptions,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, LlmError> {
    if cancel.is_cancelled() {
        return Err(LlmError::Cancelled);
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(LlmError::Cancelled),
        res = tokio::time::timeout(timeout, llm.complete(messages, options)) => match res {
            Ok(Ok(text)) if text.trim().is_empty() => Err(LlmError::EmptyResponse),
            Ok(other) => other,
            Err(_) => Err(LlmError::Timeout(timeout)),
        },
    }
}
