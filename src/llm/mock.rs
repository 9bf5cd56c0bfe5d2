//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按顺序弹出预设回复；队列耗尽后返回默认回复（默认是失败，触发各阶段本地兜底）。
//! 记录每次调用的 prompt 与参数，便于断言调用次数与 token 预算。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionOptions, LlmClient, LlmError, Message};

/// 单条预设回复
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(String),
    /// 永不返回（用于超时 / 取消测试）
    Hang,
}

/// 一次被记录的调用
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// 最后一条消息内容
    pub prompt: String,
    pub options: CompletionOptions,
}

/// Mock 客户端：脚本化回复 + 调用记录
#[derive(Debug)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    /// 无脚本：每次调用都失败（模拟推理服务宕机）
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: MockReply::Fail("mock: inference service unavailable".to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 按顺序返回给定文本
    pub fn scripted<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for t in texts {
            mock.push(MockReply::Text(t.into()));
        }
        mock
    }

    pub fn push(&self, reply: MockReply) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
    }

    /// 设置队列耗尽后的默认回复
    pub fn with_fallback(mut self, reply: MockReply) -> Self {
        self.fallback = reply;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                prompt: messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                options: options.clone(),
            });
        }

        let reply = self
            .replies
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            MockReply::Text(t) => Ok(t),
            MockReply::Fail(e) => Err(LlmError::Request(e)),
            MockReply::Hang => std::future::pending().await,
        }
    }
}
