//! 编排器：按策略串联各阶段，执行重试 / 兜底策略并推送进度事件
//!
//! 状态机：planning -> designing -> coding -> validating -> [repairing -> revalidating -> agentic_fallback] -> finalizing。
//! - template_fill：只跑模板填充，直接进入 finalizing
//! - plan_driven：编码前先跑 Planner 与 Designer；fast_json 直接编码
//! - 校验失败：最多一次远程修复，修复后仍无效则丢弃候选，以空种子调用 agentic 并无条件采纳
//! 阶段严格串行；每个阶段之间的文件差异立即以 file_created / file_edited 推送。

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::PipelineConfig;
use crate::core::{HandlerError, PipelineError};
use crate::llm::LlmClient;
use crate::pipeline::coder::{build_coder_prompt, GenerationHandlers, HandlerKind};
use crate::pipeline::repairer::local_repair;
use crate::pipeline::{
    Designer, DoneSummary, EventSink, FallbackPath, FileSet, GenerationArtifacts,
    GenerationQuality, GenerationRequest, GenerationResult, GenerationStrategy, ParseStage,
    PipelineStage, Planner, Repairer, SemanticValidator, StageControl, StageSource, StreamEvent,
    TemplateFill,
};

/// 单次调用的可变状态
struct RunState<'a> {
    request: &'a GenerationRequest,
    strategy: GenerationStrategy,
    quality: GenerationQuality,
    control: StageControl,
    sink: &'a EventSink,
    /// 已推送给调用方的文件视图（以请求的 currentFiles 为起点）
    emitted: FileSet,
    artifacts: GenerationArtifacts,
    fallback_path: Option<FallbackPath>,
    started: Instant,
}

impl RunState<'_> {
    /// 进入新阶段：先检查取消，再推送 status
    async fn enter(&self, stage: PipelineStage, message: impl Into<String>) -> Result<(), PipelineError> {
        self.control.checkpoint()?;
        tracing::info!(?stage, "Pipeline stage");
        self.sink.emit(StreamEvent::status(stage, message)).await;
        Ok(())
    }

    /// 推送 candidate 相对已推送视图的差异
    async fn emit_diff(&mut self, candidate: &FileSet) {
        for change in candidate.diff_against(&self.emitted) {
            self.sink.emit(change.into()).await;
        }
        self.emitted.overlay(candidate);
    }
}

/// 编排器：持有各阶段与注入的生成处理器，可跨调用共享（自身无调用间状态）
pub struct Orchestrator {
    handlers: Arc<dyn GenerationHandlers>,
    planner: Planner,
    designer: Designer,
    repairer: Repairer,
    template: TemplateFill,
    validator: SemanticValidator,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        handlers: Arc<dyn GenerationHandlers>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            handlers,
            planner: Planner::new(Arc::clone(&llm), config.model.clone()),
            designer: Designer::new(Arc::clone(&llm), config.model.clone()),
            repairer: Repairer::new(Arc::clone(&llm), config.model.clone()),
            template: TemplateFill::new(llm, config.model.clone()),
            validator: SemanticValidator::new(config.max_missing_colors),
            config,
        }
    }

    /// 在后台任务中运行一次生成，返回有界事件通道接收端与结果句柄
    pub fn spawn(
        self: &Arc<Self>,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> (
        mpsc::Receiver<StreamEvent>,
        JoinHandle<Result<GenerationResult, PipelineError>>,
    ) {
        let (tx, rx) = mpsc::channel(self.config.event_buffer);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let sink = EventSink::new(tx);
            this.run(&request, &sink, cancel).await
        });
        (rx, handle)
    }

    /// 调用方边界：运行流水线并推送恰好一个终止帧
    ///
    /// 成功 -> done；取消 -> status(cancelled) + error(cancelled)；其它错误 -> message + error。
    /// 已推送的文件不会回滚。
    pub async fn run(
        &self,
        request: &GenerationRequest,
        sink: &EventSink,
        cancel: CancellationToken,
    ) -> Result<GenerationResult, PipelineError> {
        let strategy = request.strategy.unwrap_or(self.config.default_strategy);
        let quality = request.quality.unwrap_or(self.config.default_quality);
        let span = tracing::info_span!(
            "generation",
            id = %uuid::Uuid::new_v4(),
            strategy = strategy.as_str(),
            quality = ?quality
        );

        async move {
            let outcome = self.run_inner(request, strategy, quality, sink, cancel).await;
            match &outcome {
                Ok(result) => {
                    sink.emit(StreamEvent::Done(DoneSummary {
                        files: result.files.paths().map(str::to_string).collect(),
                        file_count: result.files.len(),
                        strategy,
                        fallback_path: result.fallback_path,
                        parse_stage: result.parse_stage,
                        repair_attempts: result.artifacts.repair_attempts,
                        duration_ms: result.generation_duration_ms,
                    }))
                    .await;
                }
                Err(e) if e.is_cancelled() => {
                    tracing::info!("Generation cancelled");
                    sink.emit(StreamEvent::status(PipelineStage::Cancelled, "Generation cancelled"))
                        .await;
                    sink.emit(StreamEvent::Error {
                        message: PipelineError::Cancelled.to_string(),
                        cancelled: true,
                    })
                    .await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Generation failed");
                    sink.emit(StreamEvent::Message {
                        text: "Sorry, the generation could not be completed. Files created so far were kept."
                            .to_string(),
                    })
                    .await;
                    sink.emit(StreamEvent::Error {
                        message: e.to_string(),
                        cancelled: false,
                    })
                    .await;
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_inner(
        &self,
        request: &GenerationRequest,
        strategy: GenerationStrategy,
        quality: GenerationQuality,
        sink: &EventSink,
        cancel: CancellationToken,
    ) -> Result<GenerationResult, PipelineError> {
        let mut state = RunState {
            request,
            strategy,
            quality,
            control: StageControl::new(self.config.stage_timeout, cancel),
            sink,
            emitted: request.current_files.clone(),
            artifacts: GenerationArtifacts {
                strategy,
                template_id: request.template_id.clone(),
                ..GenerationArtifacts::default()
            },
            fallback_path: None,
            started: Instant::now(),
        };

        let (files, message, parse_stage) = match strategy {
            GenerationStrategy::TemplateFill => self.run_template(&mut state).await?,
            GenerationStrategy::FastJson | GenerationStrategy::PlanDriven => {
                self.run_generative(&mut state).await?
            }
        };

        self.finalize(state, files, message, parse_stage).await
    }

    async fn run_template(
        &self,
        state: &mut RunState<'_>,
    ) -> Result<(FileSet, String, ParseStage), PipelineError> {
        state
            .enter(PipelineStage::TemplateFilling, "Filling template content")
            .await?;
        let out = self
            .template
            .fill(
                &state.request.message,
                &state.request.brand_context,
                state.quality,
                state.request.template_id.as_deref(),
                &state.control,
            )
            .await?;
        if out.source.is_fallback() {
            state.fallback_path = Some(FallbackPath::StaticContent);
        }
        state.emit_diff(&out.files).await;
        let message = format!(
            "Generated {} files from the {:?} template.",
            out.files.len(),
            out.variant
        );
        Ok((out.files, message, out.source.parse_stage()))
    }

    async fn run_generative(
        &self,
        state: &mut RunState<'_>,
    ) -> Result<(FileSet, String, ParseStage), PipelineError> {
        let request = state.request;
        let brand = &request.brand_context;

        if state.strategy == GenerationStrategy::PlanDriven {
            state.enter(PipelineStage::Planning, "Planning the site structure").await?;
            let plan = self
                .planner
                .plan(&request.message, brand, state.quality, &state.control)
                .await?;

            state.enter(PipelineStage::Designing, "Choosing design tokens").await?;
            let design = self
                .designer
                .design(&request.message, brand, &plan.plan, state.quality, &state.control)
                .await?;

            state.artifacts.master_plan = Some(plan.plan);
            state.artifacts.design_brief = Some(design.brief);
            state.artifacts.design_tokens = Some(design.tokens);
        }

        let prompt = build_coder_prompt(
            &request.message,
            state.artifacts.master_plan.as_ref(),
            state.artifacts.design_brief.as_deref(),
            state.artifacts.design_tokens.as_ref(),
        );

        // coding：fast 失败时改走 agentic
        state.enter(PipelineStage::Coding, "Writing code").await?;
        let coded = match self
            .invoke(state, HandlerKind::Fast, &prompt, &request.current_files)
            .await?
        {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Fast handler failed, switching to agentic");
                state.fallback_path = Some(FallbackPath::FastFailedAgentic);
                match self
                    .invoke(state, HandlerKind::Agentic, &prompt, &request.current_files)
                    .await?
                {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!(error = %e, "Agentic handler failed, applying local patch");
                        state.fallback_path = Some(FallbackPath::LocalPatchAfterAgentic);
                        let patched = local_repair(&request.current_files, brand);
                        state.emit_diff(&patched).await;
                        return Ok((
                            patched,
                            "Generated a minimal project from the brand settings.".to_string(),
                            ParseStage::Deterministic,
                        ));
                    }
                }
            }
        };
        // 处理器只返回改动过的文件，在请求的 currentFiles 上叠加
        let mut candidate = request.current_files.clone();
        candidate.overlay(&coded.files);
        let mut message = coded.message;
        let mut parse_stage = coded.parse_stage;
        state.emit_diff(&candidate).await;

        state.enter(PipelineStage::Validating, "Validating output").await?;
        let tokens = state.artifacts.design_tokens.clone();
        let report = self.validator.validate(&candidate, brand, tokens.as_ref());
        if report.is_valid {
            return Ok((candidate, message, parse_stage));
        }
        tracing::info!(issues = report.issues.len(), "Validation failed, repairing");

        // 远程修复每次生成最多一次
        state.artifacts.repair_attempts += 1;
        state
            .enter(
                PipelineStage::Repairing,
                format!("Fixing {} issue(s)", report.issues.len()),
            )
            .await?;
        let repaired = self
            .repairer
            .repair(
                &request.message,
                brand,
                &candidate,
                &report.issues,
                state.quality,
                &state.control,
            )
            .await?;
        state.fallback_path = Some(match repaired.source {
            StageSource::Model(_) => FallbackPath::RemoteRepair,
            StageSource::Fallback { .. } => FallbackPath::LocalRepair,
        });
        candidate = repaired.files;
        message = repaired.message;
        parse_stage = repaired.source.parse_stage();
        state.emit_diff(&candidate).await;

        state.enter(PipelineStage::Revalidating, "Re-validating output").await?;
        let report = self.validator.validate(&candidate, brand, tokens.as_ref());
        if report.is_valid {
            return Ok((candidate, message, parse_stage));
        }

        // 不进行第三次校验：丢弃修复候选，以空种子调用 agentic，结果无条件采纳
        tracing::warn!(issues = report.issues.len(), "Still invalid after repair, using agentic fallback");
        state
            .enter(PipelineStage::AgenticFallback, "Regenerating from scratch")
            .await?;
        match self
            .invoke(state, HandlerKind::Agentic, &prompt, &FileSet::new())
            .await?
        {
            Ok(result) => {
                state.fallback_path = Some(FallbackPath::AgenticAfterRepair);
                state.emit_diff(&result.files).await;
                Ok((result.files, result.message, result.parse_stage))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Agentic fallback failed, patching repaired candidate");
                state.fallback_path = Some(FallbackPath::LocalPatchAfterAgentic);
                let patched = local_repair(&candidate, brand);
                state.emit_diff(&patched).await;
                Ok((patched, message, ParseStage::Deterministic))
            }
        }
    }

    /// 调用处理器；外层 Err 只表示取消（进行中的调用被直接丢弃）
    async fn invoke(
        &self,
        state: &RunState<'_>,
        kind: HandlerKind,
        prompt: &str,
        seed: &FileSet,
    ) -> Result<Result<GenerationResult, HandlerError>, PipelineError> {
        state.control.checkpoint()?;
        state
            .sink
            .emit(StreamEvent::ToolCall {
                tool: kind.tool_name().to_string(),
                args: json!({
                    "strategy": state.strategy.as_str(),
                    "seedFiles": seed.len(),
                }),
            })
            .await;

        let brand = &state.request.brand_context;
        let fut = async {
            match kind {
                HandlerKind::Fast => self.handlers.run_fast(prompt, brand, seed).await,
                HandlerKind::Agentic => self.handlers.run_agentic(prompt, brand, seed).await,
            }
        };
        tokio::select! {
            _ = state.control.cancel.cancelled() => Err(PipelineError::Cancelled),
            res = fut => match res {
                Err(HandlerError::Cancelled) => Err(PipelineError::Cancelled),
                Ok(result) if result.files.is_empty() => Ok(Err(HandlerError::EmptyFileSet)),
                other => Ok(other),
            },
        }
    }

    async fn finalize(
        &self,
        mut state: RunState<'_>,
        files: FileSet,
        message: String,
        parse_stage: ParseStage,
    ) -> Result<GenerationResult, PipelineError> {
        state.enter(PipelineStage::Finalizing, "Finalizing").await?;

        let packages = detect_packages(&files);
        if !packages.is_empty() {
            state
                .sink
                .emit(StreamEvent::InstallPackages { packages })
                .await;
        }
        state
            .sink
            .emit(StreamEvent::Message {
                text: message.clone(),
            })
            .await;

        let duration_ms = state.started.elapsed().as_millis() as u64;
        state.artifacts.duration_ms = duration_ms;
        tracing::info!(
            files = files.len(),
            duration_ms,
            fallback = ?state.fallback_path,
            "Generation finished"
        );

        Ok(GenerationResult {
            files,
            message,
            artifacts: state.artifacts,
            fallback_path: state.fallback_path,
            parse_stage,
            generation_duration_ms: duration_ms,
        })
    }
}

/// 从 package.json 的 dependencies / devDependencies 中取包名（排序去重）
pub fn detect_packages(files: &FileSet) -> Vec<String> {
    let Some(raw) = files.get("package.json") else {
        return Vec::new();
    };
    let Ok(manifest) = serde_json::from_str::<serde_json::Value>(raw) else {
        tracing::debug!("package.json is not valid JSON, skipping install");
        return Vec::new();
    };
    let mut packages: Vec<String> = ["dependencies", "devDependencies"]
        .iter()
        .filter_map(|key| manifest.get(*key).and_then(|v| v.as_object()))
        .flat_map(|deps| deps.keys().cloned())
        .collect();
    packages.sort();
    packages.dedup();
    packages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_packages() {
        let files: FileSet = [(
            "package.json",
            r#"{"dependencies": {"react": "^18", "lucide-react": "^0.4"}, "devDependencies": {"vite": "^5", "react": "^18"}}"#,
        )]
        .into_iter()
        .collect();
        assert_eq!(detect_packages(&files), vec!["lucide-react", "react", "vite"]);
        assert!(detect_packages(&FileSet::new()).is_empty());
    }
}
