//! 基于 LlmClient 的生成处理器实现
//!
//! - fast：单次调用，要求返回 `{message, files}`，文件映射为空即失败
//! - agentic：有限步数的工具循环（list_files / read_file / write_file / delete_file / finish），
//!   在以 currentFiles 为种子的工作集上操作；每步的 JSON 工具调用用同一套提取逻辑解析

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::core::HandlerError;
use crate::llm::{complete_messages, generate_content, CompletionOptions, LlmClient, Message};
use crate::pipeline::coder::GenerationHandlers;
use crate::pipeline::{decode_json, BrandContext, FileSet, GenerationResult, ParseStage};

/// 单次 fast 生成允许的输出上限
const FAST_MAX_TOKENS: u32 = 32768;
/// agentic 单步输出上限（一次只写一个文件）
const AGENT_STEP_MAX_TOKENS: u32 = 16384;
/// 文件内容预览最大字符数（read_file 之外的场景）
const OBSERVATION_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct FastResponse {
    #[serde(default)]
    message: Option<String>,
    files: FileSet,
}

/// 模型输出的工具调用：{"tool": "write_file", "args": {...}}
#[derive(Debug, Clone, Deserialize)]
pub struct AgentToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl AgentToolCall {
    fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }
}

/// 工具执行结果
enum StepResult {
    Observation(String),
    Finish(String),
}

/// LLM 驱动的 fast / agentic 处理器
pub struct LlmHandlers {
    llm: Arc<dyn LlmClient>,
    model: String,
    timeout: Duration,
    max_steps: usize,
}

impl LlmHandlers {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, timeout: Duration, max_steps: usize) -> Self {
        Self {
            llm,
            model: model.into(),
            timeout,
            max_steps: max_steps.max(1),
        }
    }

    fn options(&self, max_tokens: u32) -> CompletionOptions {
        CompletionOptions::json()
            .with_model(self.model.clone())
            .with_temperature(0.3)
            .with_max_output_tokens(max_tokens)
    }

    /// 执行单个工具调用，作用于工作集
    fn execute_tool(call: &AgentToolCall, working: &mut FileSet, written: &mut usize) -> StepResult {
        match call.tool.as_str() {
            "list_files" => {
                let paths: Vec<&str> = working.paths().collect();
                if paths.is_empty() {
                    StepResult::Observation("(no files yet)".to_string())
                } else {
                    StepResult::Observation(paths.join("\n"))
                }
            }
            "read_file" => match call.arg("path") {
                Some(path) => StepResult::Observation(
                    working
                        .get(path)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("File not found: {}", path)),
                ),
                None => StepResult::Observation("read_file requires args.path".to_string()),
            },
            "write_file" => match (call.arg("path"), call.arg("content")) {
                (Some(path), Some(content)) if !path.trim().is_empty() => {
                    let existed = working.insert(path.trim(), content).is_some();
                    *written += 1;
                    let preview: String = content.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
                    StepResult::Observation(format!(
                        "{} {} ({} chars): {}",
                        if existed { "Updated" } else { "Created" },
                        path.trim(),
                        content.len(),
                        preview
                    ))
                }
                _ => StepResult::Observation("write_file requires args.path and args.content".to_string()),
            },
            "delete_file" => match call.arg("path") {
                Some(path) if working.remove(path).is_some() => {
                    StepResult::Observation(format!("Deleted {}", path))
                }
                Some(path) => StepResult::Observation(format!("File not found: {}", path)),
                None => StepResult::Observation("delete_file requires args.path".to_string()),
            },
            "finish" => StepResult::Finish(
                call.arg("message")
                    .unwrap_or("Generated the project files.")
                    .to_string(),
            ),
            other => StepResult::Observation(format!(
                "Unknown tool '{}'. Available: list_files, read_file, write_file, delete_file, finish",
                other
            )),
        }
    }
}

fn brand_summary(brand: &BrandContext) -> String {
    format!(
        "Brand: {} - {}\nCategory: {}\nAudience: {}\nPalette: primary {}, secondary {}, accent {}, background {}, text {}",
        brand.name,
        brand.tagline,
        brand.category_or_default(),
        brand.audience_or_default(),
        brand.colors.primary,
        brand.colors.secondary,
        brand.colors.accent,
        brand.colors.background,
        brand.colors.text,
    )
}

fn files_listing(files: &FileSet) -> String {
    if files.is_empty() {
        return "(empty project)".to_string();
    }
    let mut out = String::new();
    for (path, content) in files.iter() {
        out.push_str(&format!("=== {} ===\n{}\n", path, content));
    }
    out
}

const AGENT_SYSTEM_PROMPT: &str = "You build React + Vite + TypeScript websites by calling tools. \
Respond with exactly ONE JSON object per turn: {\"tool\": \"<name>\", \"args\": {...}}.\n\
Tools:\n\
- list_files {}\n\
- read_file {\"path\"}\n\
- write_file {\"path\", \"content\"} (full file content)\n\
- delete_file {\"path\"}\n\
- finish {\"message\"} when the project is complete.\n\
Always write src/main.tsx, src/App.tsx and src/index.css.";

#[async_trait]
impl GenerationHandlers for LlmHandlers {
    async fn run_fast(
        &self,
        message: &str,
        brand: &BrandContext,
        current_files: &FileSet,
    ) -> Result<GenerationResult, HandlerError> {
        let prompt = format!(
            "You generate complete React + Vite + TypeScript websites.\n\
             Return ONLY one JSON object: {{\"message\": string, \"files\": {{\"<path>\": \"<full content>\"}}}}.\n\
             Always include src/main.tsx, src/App.tsx and src/index.css.\n\n\
             {brand}\n\nCurrent files:\n{files}\n\nRequest:\n{message}",
            brand = brand_summary(brand),
            files = files_listing(current_files),
            message = message,
        );
        let text = generate_content(
            self.llm.as_ref(),
            &prompt,
            &self.options(FAST_MAX_TOKENS),
            self.timeout,
            &CancellationToken::new(),
        )
        .await?;
        let (resp, stage) =
            decode_json::<FastResponse>(&text).map_err(|e| HandlerError::JsonParse(e.to_string()))?;
        if resp.files.is_empty() {
            return Err(HandlerError::EmptyFileSet);
        }
        Ok(GenerationResult::from_files(
            resp.files,
            resp.message.unwrap_or_else(|| "Generated the project files.".to_string()),
            stage,
        ))
    }

    async fn run_agentic(
        &self,
        message: &str,
        brand: &BrandContext,
        current_files: &FileSet,
    ) -> Result<GenerationResult, HandlerError> {
        let mut working = current_files.clone();
        let mut written = 0usize;
        let mut messages = vec![
            Message::system(AGENT_SYSTEM_PROMPT),
            Message::user(format!(
                "{}\n\nExisting files: {}\n\nRequest:\n{}",
                brand_summary(brand),
                if working.is_empty() {
                    "(none)".to_string()
                } else {
                    working.paths().collect::<Vec<_>>().join(", ")
                },
                message
            )),
        ];
        let options = self.options(AGENT_STEP_MAX_TOKENS);
        let no_cancel = CancellationToken::new();

        for step in 1..=self.max_steps {
            let text = complete_messages(self.llm.as_ref(), &messages, &options, self.timeout, &no_cancel).await?;
            messages.push(Message::assistant(text.clone()));

            let call = match decode_json::<AgentToolCall>(&text) {
                Ok((call, _)) if !call.tool.trim().is_empty() => call,
                Ok(_) | Err(_) => {
                    tracing::debug!(step, "Agent produced no tool call");
                    messages.push(Message::user(
                        "Your last reply was not a valid tool call. Reply with exactly one JSON object: {\"tool\": \"...\", \"args\": {...}}.",
                    ));
                    continue;
                }
            };

            tracing::debug!(step, tool = %call.tool, "Agent tool call");
            match Self::execute_tool(&call, &mut working, &mut written) {
                StepResult::Finish(summary) => {
                    if written == 0 {
                        return Err(HandlerError::EmptyFileSet);
                    }
                    return Ok(GenerationResult::from_files(working, summary, ParseStage::ToolCalls));
                }
                StepResult::Observation(obs) => {
                    messages.push(Message::user(format!("Observation: {}", obs)));
                }
            }
        }

        if written == 0 {
            return Err(HandlerError::StepLimit(self.max_steps));
        }
        tracing::warn!(steps = self.max_steps, "Agent step limit reached, keeping written files");
        Ok(GenerationResult::from_files(
            working,
            format!("Stopped after {} steps.", self.max_steps),
            ParseStage::ToolCalls,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::pipeline::types::sample_brand;

    fn handlers(mock: Arc<MockLlmClient>, steps: usize) -> LlmHandlers {
        LlmHandlers::new(mock, "m", Duration::from_secs(5), steps)
    }

    #[tokio::test]
    async fn test_fast_decodes_files() {
        let mock = Arc::new(MockLlmClient::scripted([
            r#"```json
{"message": "done", "files": {"src/App.tsx": "<main/>"}}
```"#,
        ]));
        let res = handlers(mock, 4)
            .run_fast("site", &sample_brand(), &FileSet::new())
            .await
            .unwrap();
        assert_eq!(res.message, "done");
        assert_eq!(res.parse_stage, ParseStage::Extracted);
        assert!(res.files.contains("src/App.tsx"));
    }

    #[tokio::test]
    async fn test_fast_empty_files_is_error() {
        let mock = Arc::new(MockLlmClient::scripted([r#"{"files": {}}"#]));
        let err = handlers(mock, 4)
            .run_fast("site", &sample_brand(), &FileSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::EmptyFileSet));
    }

    #[tokio::test]
    async fn test_agentic_tool_loop() {
        let mock = Arc::new(MockLlmClient::scripted([
            r#"{"tool": "list_files", "args": {}}"#,
            "I think I should write a file now",
            r#"{"tool": "write_file", "args": {"path": "src/App.tsx", "content": "<main/>"}}"#,
            r#"{"tool": "write_file", "args": {"path": "src/index.css", "content": ":root{}"}}"#,
            r#"{"tool": "finish", "args": {"message": "All set"}}"#,
        ]));
        let seed: FileSet = [("README.md", "seed")].into_iter().collect();
        let res = handlers(mock.clone(), 8)
            .run_agentic("site", &sample_brand(), &seed)
            .await
            .unwrap();
        assert_eq!(res.message, "All set");
        assert_eq!(res.parse_stage, ParseStage::ToolCalls);
        assert_eq!(res.files.len(), 3);
        assert_eq!(mock.call_count(), 5);
        // 第二步的观察结果回灌给模型
        assert!(mock.calls()[1].prompt.contains("README.md"));
    }

    #[tokio::test]
    async fn test_agentic_step_limit_without_writes() {
        let mock = Arc::new(
            MockLlmClient::new().with_fallback(crate::llm::MockReply::Text(r#"{"tool": "list_files"}"#.to_string())),
        );
        let err = handlers(mock, 3)
            .run_agentic("site", &sample_brand(), &FileSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::StepLimit(3)));
    }
}
