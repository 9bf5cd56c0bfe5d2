//! Coder：注入的代码生成能力
//!
//! 流水线本身不做代码合成，只依赖两个可互换的处理器：fast（单次调用）与 agentic（工具循环），
//! 签名均为 (message, BrandContext, currentFiles) -> GenerationResult。
//! 有主计划 / 设计令牌时，编排器先拼出扩展 prompt（原样嵌入计划与设计简报 + 固定实现要求）再委托。

use async_trait::async_trait;

use crate::core::HandlerError;
use crate::pipeline::validator::{ICON_LIBRARY, REQUIRED_CSS_VARIABLES, STYLESHEET_FILE};
use crate::pipeline::{BrandContext, DesignTokens, FileSet, GenerationResult, MasterPlan};

/// 生成处理器能力集（由调用方注入，编排器不依赖具体推理实现）
#[async_trait]
pub trait GenerationHandlers: Send + Sync {
    /// 单次调用生成
    async fn run_fast(
        &self,
        message: &str,
        brand: &BrandContext,
        current_files: &FileSet,
    ) -> Result<GenerationResult, HandlerError>;

    /// 工具循环生成
    async fn run_agentic(
        &self,
        message: &str,
        brand: &BrandContext,
        current_files: &FileSet,
    ) -> Result<GenerationResult, HandlerError>;
}

/// 处理器选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Fast,
    Agentic,
}

impl HandlerKind {
    pub fn tool_name(&self) -> &'static str {
        match self {
            HandlerKind::Fast => "run_fast",
            HandlerKind::Agentic => "run_agentic",
        }
    }
}

/// 把请求、主计划与设计简报拼成扩展 prompt；缺少计划与设计时原样返回请求
pub fn build_coder_prompt(
    request: &str,
    plan: Option<&MasterPlan>,
    design_brief: Option<&str>,
    tokens: Option<&DesignTokens>,
) -> String {
    if plan.is_none() && design_brief.is_none() && tokens.is_none() {
        return request.to_string();
    }

    let mut prompt = format!("{}\n\n", request);

    if let Some(plan) = plan {
        let plan_json = serde_json::to_string_pretty(plan).unwrap_or_default();
        prompt.push_str("## Master plan\n");
        prompt.push_str(&plan_json);
        prompt.push_str("\n\n");
    }
    if let Some(brief) = design_brief {
        prompt.push_str("## Design brief\n");
        prompt.push_str(brief);
        prompt.push_str("\n\n");
    }
    if let Some(tokens) = tokens {
        prompt.push_str(&format!(
            "## Design tokens\nColors: {}\nFonts: {}\n\n",
            tokens.colors.join(", "),
            tokens.fonts.join(", ")
        ));
    }

    prompt.push_str("## Implementation requirements\n");
    let requirements = [
        "Split the page into one component file per planned section and compose them in src/App.tsx.".to_string(),
        "Wrap page content in semantic landmarks (<header>, <main>, <section>, <footer>), label interactive elements and give images alt text.".to_string(),
        format!(
            "Declare these CSS custom properties in {}: {} and use them instead of raw hex values.",
            STYLESHEET_FILE,
            REQUIRED_CSS_VARIABLES.join(", ")
        ),
        format!("Use icons from {} only.", ICON_LIBRARY),
        "Keep WCAG AA contrast between text and background; never place text colored with the background color on it.".to_string(),
        "Include a stats / social-proof band with concrete numbers or testimonials.".to_string(),
    ];
    for (i, req) in requirements.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, req));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::planner::fallback_plan;
    use crate::pipeline::types::sample_brand;

    #[test]
    fn test_plain_request_passthrough() {
        assert_eq!(build_coder_prompt("make a site", None, None, None), "make a site");
    }

    #[test]
    fn test_extended_prompt_embeds_plan_and_brief() {
        let plan = fallback_plan(&sample_brand());
        let tokens = DesignTokens {
            colors: vec!["#1A73E8".to_string()],
            fonts: vec!["Inter".to_string()],
        };
        let prompt = build_coder_prompt("make a site", Some(&plan), Some("Bold and bright."), Some(&tokens));
        assert!(prompt.starts_with("make a site"));
        assert!(prompt.contains(&plan.objective));
        assert!(prompt.contains("Bold and bright."));
        assert!(prompt.contains("--color-background"));
        assert!(prompt.contains("lucide-react"));
        assert!(prompt.contains("Colors: #1A73E8"));
    }
}
