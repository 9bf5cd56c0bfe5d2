//! 质量档位 -> 推理深度与 token 预算

use crate::llm::{CompletionOptions, InferenceDepth};
use crate::pipeline::GenerationQuality;

/// 单个档位的推理参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityProfile {
    pub depth: InferenceDepth,
    /// 规划 / 设计 / 模板内容阶段的输出上限
    pub plan_tokens: u32,
    /// 修复阶段的输出上限（需要容纳完整文件集）
    pub repair_tokens: u32,
}

impl QualityProfile {
    pub fn for_quality(quality: GenerationQuality) -> Self {
        match quality {
            GenerationQuality::Speed => Self {
                depth: InferenceDepth::Minimal,
                plan_tokens: 2048,
                repair_tokens: 16384,
            },
            GenerationQuality::Balanced => Self {
                depth: InferenceDepth::Low,
                plan_tokens: 4096,
                repair_tokens: 24576,
            },
            GenerationQuality::High => Self {
                depth: InferenceDepth::Medium,
                plan_tokens: 8192,
                repair_tokens: 32768,
            },
        }
    }

    /// 规划类阶段的 JSON 调用参数
    pub fn plan_options(&self, model: &str, temperature: f32) -> CompletionOptions {
        CompletionOptions::json()
            .with_model(model)
            .with_depth(self.depth)
            .with_temperature(temperature)
            .with_max_output_tokens(self.plan_tokens)
    }

    pub fn repair_options(&self, model: &str) -> CompletionOptions {
        CompletionOptions::json()
            .with_model(model)
            .with_depth(self.depth)
            .with_temperature(0.2)
            .with_max_output_tokens(self.repair_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_table() {
        let speed = QualityProfile::for_quality(GenerationQuality::Speed);
        assert_eq!((speed.depth, speed.plan_tokens, speed.repair_tokens), (InferenceDepth::Minimal, 2048, 16384));
        let balanced = QualityProfile::for_quality(GenerationQuality::Balanced);
        assert_eq!((balanced.depth, balanced.plan_tokens, balanced.repair_tokens), (InferenceDepth::Low, 4096, 24576));
        let high = QualityProfile::for_quality(GenerationQuality::High);
        assert_eq!((high.depth, high.plan_tokens, high.repair_tokens), (InferenceDepth::Medium, 8192, 32768));
    }

    #[test]
    fn test_options_carry_budget() {
        let opts = QualityProfile::for_quality(GenerationQuality::High).plan_options("m", 0.4);
        assert!(opts.json_response);
        assert_eq!(opts.max_output_tokens, Some(8192));
        assert_eq!(opts.depth, Some(InferenceDepth::Medium));
        assert_eq!(opts.model.as_deref(), Some("m"));
    }
}
