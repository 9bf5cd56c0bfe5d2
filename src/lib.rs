//! Brandsmith - 品牌站点生成流水线
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、生成登记表（取消 / 过期清理）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: tracing 初始化
//! - **pipeline**: 规划、设计、编码、校验、修复与流式事件

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod pipeline;

pub use pipeline::{
    GenerationRequest, GenerationResult, LlmHandlers, Orchestrator, StreamConsumer, StreamEvent,
};
