//! Repairer：根据校验问题修复文件集
//!
//! 先请求模型返回完整修正后的文件集（`{message, files}`），只有解析出非空文件映射才采纳；
//! 否则执行本地确定性修复：缺失 CSS 变量时注入由品牌色派生的变量块，缺失根组件 / 入口时合成最小版本。
//! 本地修复不调用推理服务且总能返回结果，是推理服务完全不可用时流水线终止的保证。

use std::sync::Arc;

use serde::Deserialize;

use crate::core::PipelineError;
use crate::llm::LlmClient;
use crate::pipeline::stage::request_json;
use crate::pipeline::validator::{
    ENTRY_FILE, REQUIRED_CSS_VARIABLES, ROOT_FILE, STYLESHEET_FILE,
};
use crate::pipeline::{
    BrandContext, FileSet, GenerationQuality, QualityProfile, StageControl, StageSource,
};

#[derive(Debug, Deserialize)]
struct RepairResponse {
    #[serde(default)]
    message: Option<String>,
    files: FileSet,
}

/// 修复输出：合并后的完整候选文件集
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub files: FileSet,
    pub message: String,
    pub source: StageSource,
}

pub struct Repairer {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl Repairer {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    pub async fn repair(
        &self,
        request: &str,
        brand: &BrandContext,
        files: &FileSet,
        issues: &[String],
        quality: GenerationQuality,
        control: &StageControl,
    ) -> Result<RepairOutcome, PipelineError> {
        let profile = QualityProfile::for_quality(quality);
        let prompt = build_repair_prompt(request, brand, files, issues);
        let options = profile.repair_options(&self.model);

        let reason = match request_json::<RepairResponse>(self.llm.as_ref(), &prompt, &options, control).await {
            Ok((resp, stage)) if !resp.files.is_empty() => {
                let mut repaired = files.clone();
                repaired.overlay(&resp.files);
                tracing::info!(changed = resp.files.len(), "Remote repair accepted");
                return Ok(RepairOutcome {
                    files: repaired,
                    message: resp
                        .message
                        .unwrap_or_else(|| "Applied fixes for validation issues.".to_string()),
                    source: StageSource::Model(stage),
                });
            }
            Ok(_) => "repair returned no files".to_string(),
            Err(failure) => failure.into_reason()?,
        };

        tracing::warn!(reason = %reason, "Remote repair failed, applying local patch");
        Ok(RepairOutcome {
            files: local_repair(files, brand),
            message: "Applied local fixes for missing structure and brand variables.".to_string(),
            source: StageSource::Fallback { reason },
        })
    }
}

fn build_repair_prompt(request: &str, brand: &BrandContext, files: &FileSet, issues: &[String]) -> String {
    let mut prompt = format!(
        "You are the repair stage of a website generator. The generated project failed validation.\n\
         Return ONLY one JSON object: {{\"message\": string, \"files\": {{\"<path>\": \"<full content>\"}}}} \
         containing the COMPLETE corrected content of every file you change.\n\n\
         Original request: {request}\nBrand: {name}\n\
         Required CSS variables in {css}: {vars}\n\
         Palette: {palette}\n\nIssues:\n",
        request = request,
        name = brand.name,
        css = STYLESHEET_FILE,
        vars = REQUIRED_CSS_VARIABLES.join(", "),
        palette = brand.colors.values().join(", "),
    );
    for issue in issues {
        prompt.push_str("- ");
        prompt.push_str(issue);
        prompt.push('\n');
    }
    prompt.push_str("\nCurrent files:\n");
    for (path, content) in files.iter() {
        prompt.push_str(&format!("=== {} ===\n{}\n", path, content));
    }
    prompt
}

/// 由品牌色直接派生的 CSS 变量块
pub fn css_variables_block(brand: &BrandContext) -> String {
    let mut block = String::from(":root {\n");
    for (role, value) in brand.colors.roles() {
        block.push_str(&format!("  --color-{}: {};\n", role, value));
    }
    block.push_str("}\n");
    block
}

fn minimal_root(brand: &BrandContext) -> String {
    format!(
        r#"import {{ Sparkles, Users }} from 'lucide-react';

export default function App() {{
  return (
    <main className="app">
      <section className="hero">
        <Sparkles aria-hidden="true" />
        <h1>{name}</h1>
        <p>{tagline}</p>
      </section>
      <section className="stats" aria-label="Stats">
        <Users aria-hidden="true" />
        <p>Trusted by customers who care about {category}.</p>
      </section>
    </main>
  );
}}
"#,
        name = brand.name,
        tagline = brand.tagline,
        category = brand.category_or_default(),
    )
}

fn minimal_entry() -> String {
    r#"import React from 'react';
import ReactDOM from 'react-dom/client';
import App from './App';
import './index.css';

ReactDOM.createRoot(document.getElementById('root')!).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>,
);
"#
    .to_string()
}

/// 本地确定性修复：只追加或覆盖，从不删除路径
pub fn local_repair(files: &FileSet, brand: &BrandContext) -> FileSet {
    let mut repaired = files.clone();

    let css = files.get(STYLESHEET_FILE).unwrap_or_default();
    if REQUIRED_CSS_VARIABLES.iter().any(|v| !css.contains(v)) {
        repaired.insert(STYLESHEET_FILE, format!("{}\n{}", css_variables_block(brand), css));
    }
    if !files.contains(ROOT_FILE) {
        repaired.insert(ROOT_FILE, minimal_root(brand));
    }
    if !files.contains(ENTRY_FILE) {
        repaired.insert(ENTRY_FILE, minimal_entry());
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::pipeline::types::sample_brand;
    use crate::pipeline::SemanticValidator;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn control() -> StageControl {
        StageControl::new(Duration::from_secs(5), CancellationToken::new())
    }

    #[test]
    fn test_local_repair_from_empty_is_valid() {
        let brand = sample_brand();
        let repaired = local_repair(&FileSet::new(), &brand);
        let report = SemanticValidator::default().validate(&repaired, &brand, None);
        assert!(report.is_valid, "{:?}", report.issues);
    }

    #[test]
    fn test_local_repair_keeps_existing_paths() {
        let brand = sample_brand();
        let files: FileSet = [("src/index.css", "body { margin: 0; }"), ("README.md", "hi")]
            .into_iter()
            .collect();
        let repaired = local_repair(&files, &brand);
        assert_eq!(repaired.get("README.md"), Some("hi"));
        let css = repaired.get(STYLESHEET_FILE).unwrap();
        assert!(css.contains("--color-primary: #1A73E8;"));
        assert!(css.contains("body { margin: 0; }"));
    }

    #[tokio::test]
    async fn test_remote_repair_overlays() {
        let mock = Arc::new(MockLlmClient::scripted([
            r#"{"message": "fixed", "files": {"src/App.tsx": "<main>ok</main>"}}"#,
        ]));
        let files: FileSet = [("src/App.tsx", "broken"), ("src/main.tsx", "entry")]
            .into_iter()
            .collect();
        let out = Repairer::new(mock.clone(), "m")
            .repair("x", &sample_brand(), &files, &["bad".to_string()], GenerationQuality::High, &control())
            .await
            .unwrap();
        assert_eq!(out.message, "fixed");
        assert_eq!(out.files.get("src/App.tsx"), Some("<main>ok</main>"));
        assert_eq!(out.files.get("src/main.tsx"), Some("entry"));
        assert_eq!(mock.calls()[0].options.max_output_tokens, Some(32768));
    }

    #[tokio::test]
    async fn test_empty_file_map_falls_back_to_local() {
        let mock = Arc::new(MockLlmClient::scripted([r#"{"message": "nothing", "files": {}}"#]));
        let out = Repairer::new(mock, "m")
            .repair("x", &sample_brand(), &FileSet::new(), &[], GenerationQuality::Speed, &control())
            .await
            .unwrap();
        assert!(out.source.is_fallback());
        assert!(out.files.contains(ROOT_FILE));
    }
}
