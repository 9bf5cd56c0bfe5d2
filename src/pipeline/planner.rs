//! Planner：根据请求与品牌上下文产出主计划（MasterPlan）
//!
//! 调用 LLM 得到主计划 JSON；任何失败（网络、超时、解析、缺少 objective/sections）
//! 都退回到只依赖品牌字段构造的确定性计划，不向调用方抛错（取消除外）。

use std::sync::Arc;

use crate::core::PipelineError;
use crate::llm::LlmClient;
use crate::pipeline::stage::request_json;
use crate::pipeline::{
    BrandContext, ComponentPlan, GenerationQuality, MasterPlan, QualityProfile, StageControl,
    StageSource,
};

/// 主计划必须覆盖的页面分区（顺序即页面顺序）
pub const REQUIRED_SECTIONS: [&str; 6] = [
    "navigation",
    "hero",
    "stats",
    "features",
    "call-to-action",
    "footer",
];

/// Planner 输出
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: MasterPlan,
    pub source: StageSource,
}

/// Planner：持有 LLM 与模型名
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    pub async fn plan(
        &self,
        request: &str,
        brand: &BrandContext,
        quality: GenerationQuality,
        control: &StageControl,
    ) -> Result<PlanOutcome, PipelineError> {
        let profile = QualityProfile::for_quality(quality);
        let prompt = build_plan_prompt(request, brand);
        let options = profile.plan_options(&self.model, 0.4);

        let failure = match request_json::<MasterPlan>(self.llm.as_ref(), &prompt, &options, control).await {
            Ok((plan, stage)) => match accept_plan(plan) {
                Ok(plan) => {
                    tracing::info!(sections = plan.sections.len(), "Master plan generated");
                    return Ok(PlanOutcome {
                        plan,
                        source: StageSource::Model(stage),
                    });
                }
                Err(reason) => reason,
            },
            Err(failure) => failure.into_reason()?,
        };

        tracing::warn!(reason = %failure, "Planner failed, using deterministic plan");
        Ok(PlanOutcome {
            plan: fallback_plan(brand),
            source: StageSource::Fallback { reason: failure },
        })
    }
}

/// 结构校验：objective 与 sections 非空；组件计划为空时补默认组件
fn accept_plan(mut plan: MasterPlan) -> Result<MasterPlan, String> {
    if plan.objective.trim().is_empty() {
        return Err("plan is missing objective".to_string());
    }
    plan.sections.retain(|s| !s.trim().is_empty());
    if plan.sections.is_empty() {
        return Err("plan is missing sections".to_string());
    }
    plan.component_plan
        .retain(|c| !c.file.trim().is_empty() && !c.responsibility.trim().is_empty());
    if plan.component_plan.is_empty() {
        plan.component_plan = default_component_plan();
    }
    Ok(plan)
}

fn build_plan_prompt(request: &str, brand: &BrandContext) -> String {
    let insights = &brand.insights;
    format!(
        "You are the planning stage of a website generator. Produce an implementation plan.\n\
         Return ONLY one JSON object with keys: objective (string), sections (string[]), \
         componentPlan ({{file, responsibility}}[]), implementationNotes (string[]), acceptanceCriteria (string[]).\n\
         The sections MUST include, in order: {sections}.\n\n\
         User request: {request}\n\
         Brand: {name} - {tagline}\n\
         Category: {category}\nTarget audience: {audience}\n\
         Keywords: {keywords}\nPain points: {pains}\nOpportunities: {opps}\n\
         Palette: primary {p}, secondary {s}, accent {a}, background {b}, text {t}",
        sections = REQUIRED_SECTIONS.join(", "),
        request = request,
        name = brand.name,
        tagline = brand.tagline,
        category = brand.category_or_default(),
        audience = brand.audience_or_default(),
        keywords = insights.keywords.join(", "),
        pains = insights.pain_points.join("; "),
        opps = insights.opportunities.join("; "),
        p = brand.colors.primary,
        s = brand.colors.secondary,
        a = brand.colors.accent,
        b = brand.colors.background,
        t = brand.colors.text,
    )
}

fn default_component_plan() -> Vec<ComponentPlan> {
    [
        ("src/main.tsx", "Mount the React root and import the global stylesheet"),
        ("src/App.tsx", "Compose all page sections inside semantic landmarks"),
        ("src/components/Navbar.tsx", "Brand logo, anchor links and primary call-to-action"),
        ("src/components/Hero.tsx", "Headline, tagline and primary call-to-action"),
        ("src/components/Stats.tsx", "Metrics and social-proof band"),
        ("src/components/Features.tsx", "Feature grid with icons"),
        ("src/components/CallToAction.tsx", "Closing conversion section"),
        ("src/components/Footer.tsx", "Links, contact and copyright"),
        ("src/index.css", "Brand CSS custom properties and base styles"),
    ]
    .into_iter()
    .map(|(file, responsibility)| ComponentPlan {
        file: file.to_string(),
        responsibility: responsibility.to_string(),
    })
    .collect()
}

/// 只由品牌字段构造的确定性主计划（不调用推理服务）
pub fn fallback_plan(brand: &BrandContext) -> MasterPlan {
    let tagline = if brand.tagline.trim().is_empty() {
        String::new()
    } else {
        format!(" ({})", brand.tagline.trim())
    };
    MasterPlan {
        objective: format!(
            "Build a conversion-focused {} landing page for {}{} aimed at {}.",
            brand.category_or_default(),
            brand.name,
            tagline,
            brand.audience_or_default()
        ),
        sections: REQUIRED_SECTIONS.iter().map(|s| s.to_string()).collect(),
        component_plan: default_component_plan(),
        implementation_notes: vec![
            "Expose every brand color as a CSS custom property in src/index.css".to_string(),
            "Use lucide-react icons for features and stats".to_string(),
            "Keep text contrast readable against the background color".to_string(),
        ],
        acceptance_criteria: vec![
            "src/main.tsx, src/App.tsx and src/index.css exist".to_string(),
            format!(
                "Brand palette {} is used",
                brand.colors.values().join(", ")
            ),
            "App.tsx wraps content in a <main> landmark".to_string(),
            "A stats / social-proof section is present".to_string(),
        ],
    }
}
