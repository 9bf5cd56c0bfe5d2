//! 品牌站点生成流水线
//!
//! - **types**: 品牌上下文、请求 / 结果、文件集
//! - **json_extract**: 从模型输出中提取 JSON 对象
//! - **quality**: 质量档位 -> 推理深度与 token 预算
//! - **planner / designer / repairer / template**: 各推理阶段（失败时本地确定性兜底）
//! - **validator**: 确定性语义校验
//! - **coder / handlers**: 注入的 fast / agentic 代码生成能力
//! - **events / consumer**: 流式事件协议与调用方侧归并
//! - **orchestrator**: 状态机编排

pub mod coder;
pub mod consumer;
pub mod designer;
pub mod events;
pub mod handlers;
pub mod json_extract;
pub mod orchestrator;
pub mod planner;
pub mod quality;
pub mod repairer;
pub mod stage;
pub mod template;
pub mod types;
pub mod validator;

pub use coder::{build_coder_prompt, GenerationHandlers, HandlerKind};
pub use consumer::{StreamConsumer, StreamOutcome};
pub use designer::{DesignOutcome, Designer};
pub use events::{DoneSummary, EventSink, PipelineStage, StreamEvent};
pub use handlers::LlmHandlers;
pub use json_extract::{decode_json, extract_json, DecodeError};
pub use orchestrator::{detect_packages, Orchestrator};
pub use planner::{PlanOutcome, Planner};
pub use quality::QualityProfile;
pub use repairer::{local_repair, RepairOutcome, Repairer};
pub use stage::{StageControl, StageSource};
pub use template::{TemplateContent, TemplateFill, TemplateOutcome, TemplateVariant};
pub use types::{
    BrandContext, ColorPalette, ComponentPlan, DesignTokens, FallbackPath, FileChange, FileSet,
    GenerationArtifacts, GenerationQuality, GenerationRequest, GenerationResult,
    GenerationStrategy, MasterPlan, ParseStage, ValidationInsights,
};
pub use validator::{SemanticValidator, ValidationReport};
