//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BRANDSMITH__*` 覆盖（双下划线表示嵌套，如 `BRANDSMITH__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::pipeline::{GenerationQuality, GenerationStrategy};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub server: ServerSection,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 单次推理请求超时（秒）；生成通常需要数十秒到数分钟
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

/// [pipeline] 段：默认策略 / 质量档位、校验容忍度、事件通道容量、agentic 步数上限
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default)]
    pub default_strategy: GenerationStrategy,
    #[serde(default)]
    pub default_quality: GenerationQuality,
    /// 允许缺失的品牌/设计颜色数量（超过即判定为问题）
    #[serde(default = "default_max_missing_colors")]
    pub max_missing_colors: usize,
    /// 事件通道容量（有界）
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default = "default_agentic_max_steps")]
    pub agentic_max_steps: usize,
    /// 单个阶段推理超时（秒），超时按阶段失败处理
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            default_strategy: GenerationStrategy::default(),
            default_quality: GenerationQuality::default(),
            max_missing_colors: default_max_missing_colors(),
            event_buffer: default_event_buffer(),
            agentic_max_steps: default_agentic_max_steps(),
            stage_timeout_secs: default_stage_timeout(),
        }
    }
}

fn default_max_missing_colors() -> usize {
    2
}

fn default_event_buffer() -> usize {
    64
}

fn default_agentic_max_steps() -> usize {
    8
}

fn default_stage_timeout() -> u64 {
    240
}

/// [server] 段：监听地址与生成登记表的过期清理
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// 已结束的生成记录保留时长（秒）
    #[serde(default = "default_registry_ttl")]
    pub registry_ttl_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            registry_ttl_secs: default_registry_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_registry_ttl() -> u64 {
    600
}

fn default_sweep_interval() -> u64 {
    60
}

/// 编排器运行参数（由 AppConfig 派生，传入 Orchestrator）
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model: String,
    pub default_strategy: GenerationStrategy,
    pub default_quality: GenerationQuality,
    pub max_missing_colors: usize,
    pub event_buffer: usize,
    pub agentic_max_steps: usize,
    pub stage_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            model: cfg.llm.model.clone(),
            default_strategy: cfg.pipeline.default_strategy,
            default_quality: cfg.pipeline.default_quality,
            max_missing_colors: cfg.pipeline.max_missing_colors,
            event_buffer: cfg.pipeline.event_buffer.max(1),
            agentic_max_steps: cfg.pipeline.agentic_max_steps.max(1),
            stage_timeout: Duration::from_secs(cfg.pipeline.stage_timeout_secs),
        }
    }
}

/// 从 config 目录加载配置，环境变量 BRANDSMITH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BRANDSMITH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BRANDSMITH")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.pipeline.max_missing_colors, 2);
        assert_eq!(cfg.pipeline.event_buffer, 64);
        assert_eq!(cfg.pipeline.default_strategy, GenerationStrategy::PlanDriven);
        assert_eq!(cfg.pipeline.default_quality, GenerationQuality::Balanced);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[pipeline]\nmax_missing_colors = 4\ndefault_strategy = \"template_fill\"\ndefault_quality = \"high\"\n\n[llm]\nmodel = \"test-model\""
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.pipeline.max_missing_colors, 4);
        assert_eq!(cfg.pipeline.default_strategy, GenerationStrategy::TemplateFill);
        assert_eq!(cfg.pipeline.default_quality, GenerationQuality::High);

        let pipeline = PipelineConfig::from(&cfg);
        assert_eq!(pipeline.model, "test-model");
        assert_eq!(pipeline.stage_timeout, Duration::from_secs(240));
    }
}
