//! 语义校验：检查候选文件集是否满足结构与内容要求
//!
//! 纯函数，按顺序检查：必需文件、品牌/设计颜色出现情况、样式表 CSS 变量、根组件语义地标、
//! 图标库引入、数据/社会证明关键词。没有追加任何问题时才判定有效。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::pipeline::{BrandContext, DesignTokens, FileSet};

pub const ENTRY_FILE: &str = "src/main.tsx";
pub const ROOT_FILE: &str = "src/App.tsx";
pub const STYLESHEET_FILE: &str = "src/index.css";
pub const REQUIRED_FILES: [&str; 3] = [ENTRY_FILE, ROOT_FILE, STYLESHEET_FILE];

/// 样式表必须声明的 CSS 自定义属性
pub const REQUIRED_CSS_VARIABLES: [&str; 5] = [
    "--color-primary",
    "--color-secondary",
    "--color-accent",
    "--color-background",
    "--color-text",
];

pub const ICON_LIBRARY: &str = "lucide-react";

const STATS_KEYWORDS: [&str; 6] = ["stats", "metrics", "testimonial", "trusted by", "customers", "reviews"];

fn landmark_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(main|header|nav|section|footer)[\s>]").expect("valid regex"))
}

fn icon_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*import\s[^;]*from\s+['"]lucide-react['"]"#).expect("valid regex")
    })
}

/// 校验结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
}

/// 语义校验器；颜色缺失容忍度可配置
#[derive(Debug, Clone)]
pub struct SemanticValidator {
    max_missing_colors: usize,
}

impl Default for SemanticValidator {
    fn default() -> Self {
        Self::new(2)
    }
}

impl SemanticValidator {
    pub fn new(max_missing_colors: usize) -> Self {
        Self { max_missing_colors }
    }

    pub fn validate(
        &self,
        files: &FileSet,
        brand: &BrandContext,
        tokens: Option<&DesignTokens>,
    ) -> ValidationReport {
        let mut issues = Vec::new();

        // (a) 必需文件
        for path in REQUIRED_FILES {
            if !files.contains(path) {
                issues.push(format!("Missing required file: {}", path));
            }
        }

        // (b) 颜色出现情况（品牌五色 + 设计色，大小写不敏感）
        let corpus = files.concatenated_lowercase();
        let mut expected: Vec<String> = brand
            .colors
            .values()
            .iter()
            .map(|c| c.to_lowercase())
            .collect();
        if let Some(tokens) = tokens {
            for c in &tokens.colors {
                let c = c.to_lowercase();
                if !expected.contains(&c) {
                    expected.push(c);
                }
            }
        }
        let missing: Vec<&String> = expected
            .iter()
            .filter(|c| !c.is_empty() && !corpus.contains(c.as_str()))
            .collect();
        if missing.len() > self.max_missing_colors {
            issues.push(format!(
                "Brand colors missing from output: {}",
                missing.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ")
            ));
        }

        // (c) CSS 自定义属性
        if let Some(css) = files.get(STYLESHEET_FILE) {
            let absent: Vec<&str> = REQUIRED_CSS_VARIABLES
                .iter()
                .copied()
                .filter(|v| !css.contains(v))
                .collect();
            if !absent.is_empty() {
                issues.push(format!("Stylesheet missing CSS variables: {}", absent.join(", ")));
            }
        }

        // (d) 根组件语义地标
        if let Some(root) = files.get(ROOT_FILE) {
            if !landmark_regex().is_match(root) {
                issues.push(format!("{} has no semantic landmark element", ROOT_FILE));
            }
        }

        // (e) 图标库引入
        if !files.iter().any(|(_, content)| icon_import_regex().is_match(content)) {
            issues.push(format!("No {} icon import found", ICON_LIBRARY));
        }

        // (f) 数据 / 社会证明
        if !STATS_KEYWORDS.iter().any(|k| corpus.contains(k)) {
            issues.push("No stats or social-proof section found".to_string());
        }

        ValidationReport {
            is_valid: issues.is_empty(),
            issues,
        }
    }
}

#[cfg(test)]
pub(crate) fn minimal_valid_files(brand: &BrandContext) -> FileSet {
    let c = &brand.colors;
    [
        (ENTRY_FILE.to_string(), "import './index.css';\nimport App from './App';".to_string()),
        (
            ROOT_FILE.to_string(),
            "import { Star } from 'lucide-react';\nexport default function App() {\n  return <main><section id=\"stats\"><Star /> 10k customers</section></main>;\n}".to_string(),
        ),
        (
            STYLESHEET_FILE.to_string(),
            format!(
                ":root {{ --color-primary: {}; --color-secondary: {}; --color-accent: {}; --color-background: {}; --color-text: {}; }}",
                c.primary, c.secondary, c.accent, c.background, c.text
            ),
        ),
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::sample_brand;

    #[test]
    fn test_minimal_set_is_valid() {
        let brand = sample_brand();
        let report = SemanticValidator::default().validate(&minimal_valid_files(&brand), &brand, None);
        assert!(report.is_valid, "{:?}", report.issues);
    }

    #[test]
    fn test_each_missing_required_file_invalidates() {
        let brand = sample_brand();
        for path in REQUIRED_FILES {
            let mut files = FileSet::new();
            for (p, c) in minimal_valid_files(&brand).iter() {
                if p != path {
                    files.insert(p, c);
                }
            }
            let report = SemanticValidator::default().validate(&files, &brand, None);
            assert!(!report.is_valid);
            assert!(report.issues.iter().any(|i| i.contains(path)));
        }
    }

    #[test]
    fn test_color_tolerance_is_configurable() {
        let brand = sample_brand();
        let mut files = minimal_valid_files(&brand);
        let tokens = DesignTokens {
            colors: vec!["#000001".into(), "#000002".into(), "#000003".into()],
            fonts: vec![],
        };
        // 3 个设计色缺失 > 默认容忍 2
        let report = SemanticValidator::default().validate(&files, &brand, Some(&tokens));
        assert!(!report.is_valid);
        assert!(SemanticValidator::new(3).validate(&files, &brand, Some(&tokens)).is_valid);

        files.insert("src/extra.css", ".x { color: #000001; }");
        assert!(SemanticValidator::default().validate(&files, &brand, Some(&tokens)).is_valid);
    }

    #[test]
    fn test_content_markers() {
        let brand = sample_brand();
        let mut files = minimal_valid_files(&brand);
        files.insert(ROOT_FILE, "export default function App() { return <div>hello</div>; }");
        let report = SemanticValidator::default().validate(&files, &brand, None);
        assert!(!report.is_valid);
        assert_eq!(report.issues.len(), 3, "{:?}", report.issues);
    }

    #[test]
    fn test_css_variables_checked() {
        let brand = sample_brand();
        let mut files = minimal_valid_files(&brand);
        let css = files.get(STYLESHEET_FILE).unwrap().replace("--color-accent", "--accent");
        files.insert(STYLESHEET_FILE, css);
        let report = SemanticValidator::default().validate(&files, &brand, None);
        assert_eq!(report.issues, vec!["Stylesheet missing CSS variables: --color-accent".to_string()]);
    }
}
