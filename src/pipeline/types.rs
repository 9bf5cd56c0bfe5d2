//! 流水线数据模型：品牌上下文、策略 / 质量档位、主计划、设计令牌、文件集、生成结果

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 五色调色板（primary / secondary / accent / background / text）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPalette {
    pub primary: String,
    pub secondary: String,
    pub accent: String,
    pub background: String,
    pub text: String,
}

impl ColorPalette {
    /// 按固定角色顺序返回五个色值
    pub fn values(&self) -> [&str; 5] {
        [
            &self.primary,
            &self.secondary,
            &self.accent,
            &self.background,
            &self.text,
        ]
    }

    /// (角色名, 色值)，用于生成 CSS 变量
    pub fn roles(&self) -> [(&'static str, &str); 5] {
        [
            ("primary", &self.primary),
            ("secondary", &self.secondary),
            ("accent", &self.accent),
            ("background", &self.background),
            ("text", &self.text),
        ]
    }
}

/// 验证洞察（品类、目标用户、关键词、痛点、机会）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationInsights {
    pub category: String,
    pub target_audience: String,
    pub keywords: Vec<String>,
    pub pain_points: Vec<String>,
    pub opportunities: Vec<String>,
}

/// 品牌上下文：每次调用由调用方重新提供，流水线只读
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandContext {
    pub name: String,
    #[serde(default)]
    pub tagline: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    pub colors: ColorPalette,
    #[serde(default)]
    pub insights: ValidationInsights,
}

impl BrandContext {
    /// 品类；为空时回退到通用描述
    pub fn category_or_default(&self) -> &str {
        if self.insights.category.trim().is_empty() {
            "business"
        } else {
            &self.insights.category
        }
    }

    pub fn audience_or_default(&self) -> &str {
        if self.insights.target_audience.trim().is_empty() {
            "customers"
        } else {
            &self.insights.target_audience
        }
    }
}

/// 质量档位：决定推理深度与各阶段 token 预算，与策略正交
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationQuality {
    Speed,
    #[default]
    Balanced,
    High,
}

/// 生成策略：决定运行哪条阶段序列
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStrategy {
    FastJson,
    #[default]
    PlanDriven,
    TemplateFill,
}

impl GenerationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStrategy::FastJson => "fast_json",
            GenerationStrategy::PlanDriven => "plan_driven",
            GenerationStrategy::TemplateFill => "template_fill",
        }
    }
}

/// 组件计划：文件 -> 职责
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentPlan {
    pub file: String,
    pub responsibility: String,
}

/// 主计划：在 plan_driven 策略下于编码前产出，编码阶段只读使用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterPlan {
    pub objective: String,
    pub sections: Vec<String>,
    #[serde(default)]
    pub component_plan: Vec<ComponentPlan>,
    #[serde(default)]
    pub implementation_notes: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

/// 设计令牌：去重（大小写不敏感）的颜色集合与有序字体列表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignTokens {
    pub colors: Vec<String>,
    pub fonts: Vec<String>,
}

/// 文件集：路径 -> 完整内容；只允许追加或覆盖
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSet(BTreeMap<String, String>);

/// 两个阶段之间的单个文件差异
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Created { path: String, content: String },
    Edited { path: String, content: String },
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) -> Option<String> {
        self.0.insert(path.into(), content.into())
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    /// 显式删除（仅 agentic 工具 delete_file 使用）
    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.0.remove(path)
    }

    /// 只保留 keep 中列出的路径
    pub fn retain_paths(&mut self, keep: &[String]) {
        self.0.retain(|path, _| keep.iter().any(|k| k == path));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 覆盖式合并：other 中的路径新增或替换，未涉及的路径保持不变
    pub fn overlay(&mut self, other: &FileSet) {
        for (path, content) in other.iter() {
            self.0.insert(path.to_string(), content.to_string());
        }
    }

    /// 所有文件内容拼接并转小写（用于颜色 / 关键词检查）
    pub fn concatenated_lowercase(&self) -> String {
        let mut out = String::new();
        for content in self.0.values() {
            out.push_str(&content.to_lowercase());
            out.push('\n');
        }
        out
    }

    /// 计算相对 previous 的差异：新路径为 Created，内容变化的已有路径为 Edited
    pub fn diff_against(&self, previous: &FileSet) -> Vec<FileChange> {
        self.0
            .iter()
            .filter_map(|(path, content)| match previous.get(path) {
                None => Some(FileChange::Created {
                    path: path.clone(),
                    content: content.clone(),
                }),
                Some(old) if old != content => Some(FileChange::Edited {
                    path: path.clone(),
                    content: content.clone(),
                }),
                Some(_) => None,
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FileSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// 哪一步解析产出了最终结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStage {
    /// 整段文本即合法 JSON
    Direct,
    /// 从前后夹杂文字的输出中提取出 JSON 对象
    Extracted,
    /// agentic 工具调用累积
    ToolCalls,
    /// 本地确定性内容（静态模板 / 本地补丁）
    #[default]
    Deterministic,
}

/// 走过的兜底路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPath {
    /// 模板填充内容生成失败，使用静态内容
    StaticContent,
    /// fast 处理器失败，改用 agentic
    FastFailedAgentic,
    /// 远程修复被采纳
    RemoteRepair,
    /// 远程修复失败，使用本地确定性补丁
    LocalRepair,
    /// 修复后仍无效，丢弃候选并以空种子调用 agentic
    AgenticAfterRepair,
    /// agentic 兜底也失败，对最佳候选打本地补丁
    LocalPatchAfterAgentic,
}

/// 生成产物记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationArtifacts {
    pub master_plan: Option<MasterPlan>,
    pub design_brief: Option<String>,
    pub design_tokens: Option<DesignTokens>,
    pub repair_attempts: u32,
    pub strategy: GenerationStrategy,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

/// 生成结果：文件集、说明、产物记录与诊断字段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub files: FileSet,
    pub message: String,
    #[serde(default)]
    pub artifacts: GenerationArtifacts,
    #[serde(default)]
    pub fallback_path: Option<FallbackPath>,
    #[serde(default)]
    pub parse_stage: ParseStage,
    #[serde(default)]
    pub generation_duration_ms: u64,
}

impl GenerationResult {
    /// 处理器返回的最小结果（产物记录由编排器补全）
    pub fn from_files(files: FileSet, message: impl Into<String>, parse_stage: ParseStage) -> Self {
        Self {
            files,
            message: message.into(),
            parse_stage,
            ..Self::default()
        }
    }
}

/// 入站请求（来自请求路由）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub message: String,
    pub brand_context: BrandContext,
    #[serde(default)]
    pub current_files: FileSet,
    #[serde(default)]
    pub strategy: Option<GenerationStrategy>,
    #[serde(default)]
    pub quality: Option<GenerationQuality>,
    #[serde(default)]
    pub template_id: Option<String>,
}

#[cfg(test)]
pub(crate) fn sample_brand() -> BrandContext {
    BrandContext {
        name: "Acme Roasters".to_string(),
        tagline: "Small-batch coffee, delivered".to_string(),
        logo_url: None,
        colors: ColorPalette {
            primary: "#1A73E8".to_string(),
            secondary: "#34A853".to_string(),
            accent: "#FBBC05".to_string(),
            background: "#FFFFFF".to_string(),
            text: "#202124".to_string(),
        },
        insights: ValidationInsights {
            category: "Coffee subscription".to_string(),
            target_audience: "Home baristas".to_string(),
            keywords: vec!["fresh".to_string(), "ethical".to_string()],
            pain_points: vec!["stale supermarket beans".to_string()],
            opportunities: vec!["direct trade storytelling".to_string()],
        },
    }
}
