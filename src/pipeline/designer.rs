//! Designer：设计简报与设计令牌
//!
//! 无论模型返回什么，品牌五色都会逐字注入最终颜色集合（必需色 ∪ 生成色，大小写不敏感去重）；
//! 字体去重后最多保留 4 个，模型未给出字体时补两个默认字体。推理失败时退回品牌字段拼出的简报。

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;

use crate::core::PipelineError;
use crate::llm::LlmClient;
use crate::pipeline::stage::request_json;
use crate::pipeline::{
    BrandContext, DesignTokens, GenerationQuality, MasterPlan, QualityProfile, StageControl,
    StageSource,
};

pub const MAX_FONTS: usize = 4;
pub const DEFAULT_FONTS: [&str; 2] = ["Inter", "Space Grotesk"];

/// 模型返回的设计 JSON
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DesignResponse {
    design_brief: String,
    #[serde(default)]
    colors: Vec<String>,
    #[serde(default)]
    fonts: Vec<String>,
}

/// Designer 输出
#[derive(Debug, Clone)]
pub struct DesignOutcome {
    pub brief: String,
    pub tokens: DesignTokens,
    pub source: StageSource,
}

pub struct Designer {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl Designer {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    pub async fn design(
        &self,
        request: &str,
        brand: &BrandContext,
        plan: &MasterPlan,
        quality: GenerationQuality,
        control: &StageControl,
    ) -> Result<DesignOutcome, PipelineError> {
        let profile = QualityProfile::for_quality(quality);
        let prompt = build_design_prompt(request, brand, plan);
        let options = profile.plan_options(&self.model, 0.6);

        let reason = match request_json::<DesignResponse>(self.llm.as_ref(), &prompt, &options, control).await {
            Ok((resp, stage)) if !resp.design_brief.trim().is_empty() => {
                let tokens = merge_tokens(brand, &resp.colors, &resp.fonts);
                tracing::info!(colors = tokens.colors.len(), fonts = tokens.fonts.len(), "Design tokens generated");
                return Ok(DesignOutcome {
                    brief: resp.design_brief.trim().to_string(),
                    tokens,
                    source: StageSource::Model(stage),
                });
            }
            Ok(_) => "design brief is empty".to_string(),
            Err(failure) => failure.into_reason()?,
        };

        tracing::warn!(reason = %reason, "Designer failed, using deterministic brief");
        Ok(DesignOutcome {
            brief: fallback_brief(brand),
            tokens: merge_tokens(brand, &[], &[]),
            source: StageSource::Fallback { reason },
        })
    }
}

/// 品牌五色在前（逐字、无条件保留），随后追加生成色
///
/// 只对生成色去重（大小写不敏感，与五色及彼此比较）；五色之间即使只差大小写也都保留。
pub fn merge_tokens(brand: &BrandContext, generated_colors: &[String], generated_fonts: &[String]) -> DesignTokens {
    let palette = brand.colors.values();
    let mut seen: HashSet<String> = palette.iter().map(|c| c.to_lowercase()).collect();
    let mut colors: Vec<String> = palette.iter().map(|c| c.to_string()).collect();
    colors.extend(
        generated_colors
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty() && seen.insert(c.to_lowercase())),
    );

    let mut seen = HashSet::new();
    let mut fonts: Vec<String> = generated_fonts
        .iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty() && seen.insert(f.to_lowercase()))
        .take(MAX_FONTS)
        .collect();
    if fonts.is_empty() {
        fonts = DEFAULT_FONTS.iter().map(|f| f.to_string()).collect();
    }

    DesignTokens { colors, fonts }
}

fn build_design_prompt(request: &str, brand: &BrandContext, plan: &MasterPlan) -> String {
    format!(
        "You are the visual design stage of a website generator.\n\
         Return ONLY one JSON object with keys: designBrief (string, 3-6 sentences), \
         colors (hex string[] - supporting shades only), fonts (string[], at most {max}).\n\n\
         User request: {request}\n\
         Brand: {name} - {tagline}\n\
         Required palette: primary {p}, secondary {s}, accent {a}, background {b}, text {t}\n\
         Plan objective: {objective}\nSections: {sections}",
        max = MAX_FONTS,
        request = request,
        name = brand.name,
        tagline = brand.tagline,
        p = brand.colors.primary,
        s = brand.colors.secondary,
        a = brand.colors.accent,
        b = brand.colors.background,
        t = brand.colors.text,
        objective = plan.objective,
        sections = plan.sections.join(", "),
    )
}

/// 由品牌字段拼出的确定性设计简报
pub fn fallback_brief(brand: &BrandContext) -> String {
    format!(
        "{name} uses {p} as its primary color with {s} as secondary and {a} as accent, \
         on a {b} background with {t} text. Typography pairs {f1} for body copy with {f2} for headings. \
         The tone speaks to {audience} in the {category} space with generous spacing and clear calls to action.",
        name = brand.name,
        p = brand.colors.primary,
        s = brand.colors.secondary,
        a = brand.colors.accent,
        b = brand.colors.background,
        t = brand.colors.text,
        f1 = DEFAULT_FONTS[0],
        f2 = DEFAULT_FONTS[1],
        audience = brand.audience_or_default(),
        category = brand.category_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::pipeline::planner::fallback_plan;
    use crate::pipeline::types::sample_brand;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn control() -> StageControl {
        StageControl::new(Duration::from_secs(5), CancellationToken::new())
    }

    #[test]
    fn test_palette_always_injected_and_deduped() {
        let brand = sample_brand();
        let tokens = merge_tokens(
            &brand,
            &["#1a73e8".to_string(), "#EEEEEE".to_string(), "#eeeeee".to_string()],
            &[],
        );
        assert_eq!(&tokens.colors[..5], &brand.colors.values().map(str::to_string)[..]);
        assert_eq!(tokens.colors.len(), 6);
        assert_eq!(tokens.fonts, vec!["Inter", "Space Grotesk"]);
    }

    #[test]
    fn test_palette_roles_kept_when_case_differs() {
        let mut brand = sample_brand();
        brand.colors.background = "#FFFFFF".to_string();
        brand.colors.text = "#ffffff".to_string();
        let tokens = merge_tokens(&brand, &["#FfFfFf".to_string(), "#123456".to_string()], &[]);
        assert_eq!(&tokens.colors[..5], &brand.colors.values().map(str::to_string)[..]);
        assert_eq!(tokens.colors[3], "#FFFFFF");
        assert_eq!(tokens.colors[4], "#ffffff");
        assert_eq!(&tokens.colors[5..], &["#123456".to_string()]);
    }

    #[test]
    fn test_fonts_deduped_and_capped() {
        let fonts: Vec<String> = ["Inter", "inter", "Lora", "Poppins", "Roboto", "Merriweather"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let tokens = merge_tokens(&sample_brand(), &[], &fonts);
        assert_eq!(tokens.fonts, vec!["Inter", "Lora", "Poppins", "Roboto"]);
    }

    #[tokio::test]
    async fn test_model_output_used() {
        let mock = Arc::new(MockLlmClient::scripted([
            r##"{"designBrief": "Warm and earthy.", "colors": ["#6F4E37"], "fonts": ["Fraunces"]}"##,
        ]));
        let brand = sample_brand();
        let out = Designer::new(mock, "m")
            .design("x", &brand, &fallback_plan(&brand), GenerationQuality::Balanced, &control())
            .await
            .unwrap();
        assert_eq!(out.brief, "Warm and earthy.");
        assert!(out.tokens.colors.contains(&"#6F4E37".to_string()));
        assert_eq!(out.tokens.fonts, vec!["Fraunces"]);
        assert!(!out.source.is_fallback());
    }

    #[tokio::test]
    async fn test_failure_uses_brand_brief() {
        let brand = sample_brand();
        let out = Designer::new(Arc::new(MockLlmClient::new()), "m")
            .design("x", &brand, &fallback_plan(&brand), GenerationQuality::Speed, &control())
            .await
            .unwrap();
        assert!(out.source.is_fallback());
        assert!(out.brief.contains("#1A73E8"));
        assert_eq!(out.tokens.colors.len(), 5);
    }
}
