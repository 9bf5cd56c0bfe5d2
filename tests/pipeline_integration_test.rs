//! 流水线集成测试：脚本化 LLM + 生成处理器替身，端到端驱动编排器

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use brandsmith::config::PipelineConfig;
use brandsmith::core::HandlerError;
use brandsmith::llm::{InferenceDepth, MockLlmClient, MockReply};
use brandsmith::pipeline::template::TEMPLATE_PATHS;
use brandsmith::pipeline::{
    local_repair, BrandContext, ColorPalette, EventSink, FallbackPath, FileSet,
    GenerationHandlers, GenerationQuality, GenerationRequest, GenerationResult,
    GenerationStrategy, Orchestrator, ParseStage, PipelineStage, StreamConsumer, StreamEvent,
    StreamOutcome, ValidationInsights,
};

fn brand(name: &str, primary: &str) -> BrandContext {
    BrandContext {
        name: name.to_string(),
        tagline: "Crafted with care".to_string(),
        logo_url: None,
        colors: ColorPalette {
            primary: primary.to_string(),
            secondary: "#34A853".to_string(),
            accent: "#FBBC05".to_string(),
            background: "#FFFFFF".to_string(),
            text: "#202124".to_string(),
        },
        insights: ValidationInsights::default(),
    }
}

fn request(strategy: GenerationStrategy, quality: GenerationQuality) -> GenerationRequest {
    GenerationRequest {
        message: "Build a landing page for our coffee subscription".to_string(),
        brand_context: brand("Acme Roasters", "#1A73E8"),
        current_files: FileSet::new(),
        strategy: Some(strategy),
        quality: Some(quality),
        template_id: None,
    }
}

/// 通过校验的最小项目
fn valid_files(brand: &BrandContext) -> FileSet {
    local_repair(&FileSet::new(), brand)
}

/// 缺少样式表与地标，校验必然失败
fn invalid_files() -> FileSet {
    [("src/App.tsx", "export default () => <div>hello</div>;")]
        .into_iter()
        .collect()
}

fn ok(files: FileSet, message: &str) -> Result<GenerationResult, HandlerError> {
    Ok(GenerationResult::from_files(files, message, ParseStage::Direct))
}

/// 生成处理器替身：按顺序弹出预设结果，并记录每次调用的 prompt 与种子大小
#[derive(Default)]
struct ScriptedHandlers {
    fast: Mutex<VecDeque<Result<GenerationResult, HandlerError>>>,
    agentic: Mutex<VecDeque<Result<GenerationResult, HandlerError>>>,
    fast_prompts: Mutex<Vec<String>>,
    agentic_seeds: Mutex<Vec<usize>>,
}

impl ScriptedHandlers {
    fn with_fast(self, result: Result<GenerationResult, HandlerError>) -> Self {
        self.fast.lock().unwrap().push_back(result);
        self
    }

    fn with_agentic(self, result: Result<GenerationResult, HandlerError>) -> Self {
        self.agentic.lock().unwrap().push_back(result);
        self
    }

    fn agentic_seeds(&self) -> Vec<usize> {
        self.agentic_seeds.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationHandlers for ScriptedHandlers {
    async fn run_fast(
        &self,
        message: &str,
        _brand: &BrandContext,
        _current_files: &FileSet,
    ) -> Result<GenerationResult, HandlerError> {
        self.fast_prompts.lock().unwrap().push(message.to_string());
        self.fast
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(HandlerError::Llm("fast unavailable".to_string())))
    }

    async fn run_agentic(
        &self,
        _message: &str,
        _brand: &BrandContext,
        current_files: &FileSet,
    ) -> Result<GenerationResult, HandlerError> {
        self.agentic_seeds.lock().unwrap().push(current_files.len());
        self.agentic
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(HandlerError::Llm("agentic unavailable".to_string())))
    }
}

fn orchestrator(llm: Arc<MockLlmClient>, handlers: Arc<ScriptedHandlers>) -> Arc<Orchestrator> {
    orchestrator_with_timeout(llm, handlers, Duration::from_secs(5))
}

fn orchestrator_with_timeout(
    llm: Arc<MockLlmClient>,
    handlers: Arc<ScriptedHandlers>,
    stage_timeout: Duration,
) -> Arc<Orchestrator> {
    let config = PipelineConfig {
        stage_timeout,
        ..PipelineConfig::default()
    };
    Arc::new(Orchestrator::new(llm, handlers, config))
}

async fn collect(mut rx: tokio::sync::mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    events
}

fn stages(events: &[StreamEvent]) -> Vec<PipelineStage> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Status { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect()
}

fn terminal_count(events: &[StreamEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

#[tokio::test]
async fn test_repair_runs_once_then_agentic_is_accepted() {
    let agentic_files: FileSet = [("src/App.tsx", "<div>still not great</div>")]
        .into_iter()
        .collect();
    let handlers = Arc::new(
        ScriptedHandlers::default()
            .with_fast(ok(invalid_files(), "first try"))
            .with_agentic(ok(agentic_files.clone(), "from scratch")),
    );
    // 远程修复返回的内容仍无效
    let llm = Arc::new(MockLlmClient::scripted([
        r#"{"message": "patched", "files": {"src/App.tsx": "<div>patched</div>"}}"#,
    ]));
    let orch = orchestrator(llm.clone(), handlers.clone());

    let (rx, handle) = orch.spawn(
        request(GenerationStrategy::FastJson, GenerationQuality::Balanced),
        CancellationToken::new(),
    );
    let events = collect(rx).await;
    let result = handle.await.unwrap().unwrap();

    assert_eq!(
        stages(&events),
        vec![
            PipelineStage::Coding,
            PipelineStage::Validating,
            PipelineStage::Repairing,
            PipelineStage::Revalidating,
            PipelineStage::AgenticFallback,
            PipelineStage::Finalizing,
        ]
    );
    assert_eq!(llm.call_count(), 1);
    assert_eq!(result.artifacts.repair_attempts, 1);
    assert_eq!(result.fallback_path, Some(FallbackPath::AgenticAfterRepair));
    // agentic 以空种子调用，结果即使无效也无条件采纳
    assert_eq!(handlers.agentic_seeds(), vec![0]);
    assert_eq!(result.files, agentic_files);
    assert_eq!(result.message, "from scratch");
    assert_eq!(terminal_count(&events), 1);
    assert!(matches!(events.last(), Some(StreamEvent::Done(s)) if s.repair_attempts == 1));
}

#[tokio::test]
async fn test_planner_outage_still_finalizes() {
    let b = brand("Acme Roasters", "#1A73E8");
    let handlers = Arc::new(ScriptedHandlers::default().with_fast(ok(valid_files(&b), "done")));
    // 所有推理调用失败：规划与设计走本地兜底
    let llm = Arc::new(MockLlmClient::new());
    let orch = orchestrator(llm.clone(), handlers.clone());

    let (rx, handle) = orch.spawn(
        request(GenerationStrategy::PlanDriven, GenerationQuality::Balanced),
        CancellationToken::new(),
    );
    let events = collect(rx).await;
    let result = handle.await.unwrap().unwrap();

    assert_eq!(
        stages(&events),
        vec![
            PipelineStage::Planning,
            PipelineStage::Designing,
            PipelineStage::Coding,
            PipelineStage::Validating,
            PipelineStage::Finalizing,
        ]
    );
    assert_eq!(llm.call_count(), 2);
    let plan = result.artifacts.master_plan.as_ref().unwrap();
    assert!(!plan.sections.is_empty());
    let tokens = result.artifacts.design_tokens.as_ref().unwrap();
    assert_eq!(tokens.colors[0], "#1A73E8");
    assert_eq!(result.fallback_path, None);
    assert_eq!(result.artifacts.repair_attempts, 0);

    // 编码 prompt 嵌入了主计划
    let prompts = handlers.fast_prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(&plan.objective));
    assert!(matches!(events.last(), Some(StreamEvent::Done(_))));
}

#[tokio::test]
async fn test_fast_failure_switches_to_agentic() {
    let b = brand("Acme Roasters", "#1A73E8");
    let handlers = Arc::new(
        ScriptedHandlers::default()
            .with_fast(Err(HandlerError::JsonParse("truncated".to_string())))
            .with_agentic(ok(valid_files(&b), "agentic")),
    );
    let orch = orchestrator(Arc::new(MockLlmClient::new()), handlers.clone());

    let (rx, handle) = orch.spawn(
        request(GenerationStrategy::FastJson, GenerationQuality::Speed),
        CancellationToken::new(),
    );
    let events = collect(rx).await;
    let result = handle.await.unwrap().unwrap();

    assert_eq!(result.fallback_path, Some(FallbackPath::FastFailedAgentic));
    let tools: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ToolCall { tool, .. } => Some(tool.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tools, vec!["run_fast", "run_agentic"]);
    assert_eq!(result.message, "agentic");
}

#[tokio::test]
async fn test_template_fill_topology_for_any_brand() {
    for b in [brand("Acme Roasters", "#1A73E8"), brand("Zed", "#010203")] {
        let handlers = Arc::new(ScriptedHandlers::default());
        let orch = orchestrator(Arc::new(MockLlmClient::new()), handlers.clone());
        let mut req = request(GenerationStrategy::TemplateFill, GenerationQuality::Speed);
        req.brand_context = b.clone();

        let (rx, handle) = orch.spawn(req, CancellationToken::new());
        let mut consumer = StreamConsumer::new();
        let outcome = consumer.consume(rx).await.cloned();
        let result = handle.await.unwrap().unwrap();

        let mut expected = TEMPLATE_PATHS.to_vec();
        expected.sort();
        assert_eq!(result.files.paths().collect::<Vec<_>>(), expected);
        assert_eq!(consumer.files(), &result.files);
        assert_eq!(result.fallback_path, Some(FallbackPath::StaticContent));
        assert_eq!(result.artifacts.repair_attempts, 0);
        assert!(result.files.get("src/index.css").unwrap().contains(&b.colors.primary));
        assert!(handlers.fast_prompts.lock().unwrap().is_empty());
        assert!(matches!(outcome, Some(StreamOutcome::Done(_))));
    }
}

#[tokio::test]
async fn test_quality_changes_budgets_only() {
    let mut summaries = Vec::new();
    for quality in [GenerationQuality::Speed, GenerationQuality::High] {
        let b = brand("Acme Roasters", "#1A73E8");
        let handlers = Arc::new(ScriptedHandlers::default().with_fast(ok(valid_files(&b), "done")));
        let llm = Arc::new(MockLlmClient::new());
        let orch = orchestrator(llm.clone(), handlers);

        let (rx, handle) = orch.spawn(
            request(GenerationStrategy::PlanDriven, quality),
            CancellationToken::new(),
        );
        let events = collect(rx).await;
        let result = handle.await.unwrap().unwrap();

        let calls = llm.calls();
        let planner_call = &calls[0];
        match quality {
            GenerationQuality::Speed => {
                assert_eq!(planner_call.options.depth, Some(InferenceDepth::Minimal));
                assert_eq!(planner_call.options.max_output_tokens, Some(2048));
            }
            _ => {
                assert_eq!(planner_call.options.depth, Some(InferenceDepth::Medium));
                assert_eq!(planner_call.options.max_output_tokens, Some(8192));
            }
        }
        summaries.push((stages(&events), result.files.len(), result.fallback_path));
    }
    assert_eq!(summaries[0], summaries[1]);
}

#[tokio::test]
async fn test_cancel_keeps_emitted_files_and_ends_once() {
    let handlers = Arc::new(ScriptedHandlers::default().with_fast(ok(invalid_files(), "first try")));
    // 修复调用永不返回，等待取消
    let llm = Arc::new(MockLlmClient::new());
    llm.push(MockReply::Hang);
    let orch = orchestrator(llm, handlers.clone());

    let cancel = CancellationToken::new();
    let (mut rx, handle) = orch.spawn(
        request(GenerationStrategy::FastJson, GenerationQuality::Balanced),
        cancel.clone(),
    );

    let mut consumer = StreamConsumer::new();
    consumer.begin();
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        if matches!(ev, StreamEvent::Status { stage: PipelineStage::Repairing, .. }) {
            cancel.cancel();
        }
        consumer.apply(ev.clone());
        events.push(ev);
    }
    let err = handle.await.unwrap().unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(terminal_count(&events), 1);
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Done(_))));
    assert_eq!(stages(&events).last(), Some(&PipelineStage::Cancelled));
    assert!(matches!(
        consumer.outcome(),
        Some(StreamOutcome::Failed { cancelled: true, .. })
    ));
    assert_eq!(consumer.files(), &invalid_files());
    assert!(handlers.agentic_seeds().is_empty());
}

#[tokio::test]
async fn test_detached_sink_returns_result() {
    let b = brand("Acme Roasters", "#1A73E8");
    let mut req = request(GenerationStrategy::FastJson, GenerationQuality::Balanced);
    req.current_files = [("README.md", "existing")].into_iter().collect();
    let handlers = Arc::new(ScriptedHandlers::default().with_fast(ok(valid_files(&b), "done")));
    let orch = orchestrator(Arc::new(MockLlmClient::new()), handlers);

    let result = orch
        .run(&req, &EventSink::detached(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.parse_stage, ParseStage::Direct);
    assert_eq!(result.artifacts.strategy, GenerationStrategy::FastJson);
    assert!(result.artifacts.master_plan.is_none());
    assert_eq!(result.files.get("README.md"), Some("existing"));
}

#[tokio::test]
async fn test_consumer_matches_result_after_agentic_fallback() {
    let agentic_files: FileSet = [("src/App.tsx", "<main>from scratch</main>")]
        .into_iter()
        .collect();
    let handlers = Arc::new(
        ScriptedHandlers::default()
            .with_fast(ok(invalid_files(), "first try"))
            .with_agentic(ok(agentic_files.clone(), "from scratch")),
    );
    // 修复候选多出一个组件，且仍然无效
    let llm = Arc::new(MockLlmClient::scripted([
        r#"{"message": "patched", "files": {"src/App.tsx": "<div>patched</div>", "src/components/Stale.tsx": "export const Stale = () => null;"}}"#,
    ]));
    let orch = orchestrator(llm, handlers);

    let (mut rx, handle) = orch.spawn(
        request(GenerationStrategy::FastJson, GenerationQuality::Balanced),
        CancellationToken::new(),
    );
    let mut consumer = StreamConsumer::new();
    consumer.begin();
    let mut saw_stale = false;
    while let Some(ev) = rx.recv().await {
        if matches!(&ev, StreamEvent::FileCreated { path, .. } if path == "src/components/Stale.tsx") {
            saw_stale = true;
        }
        consumer.apply(ev);
    }
    let result = handle.await.unwrap().unwrap();

    assert!(saw_stale);
    assert_eq!(result.files, agentic_files);
    assert_eq!(consumer.files(), &result.files);
    assert!(!consumer.files().contains("src/components/Stale.tsx"));
    match consumer.outcome() {
        Some(StreamOutcome::Done(summary)) => {
            assert_eq!(summary.files, vec!["src/App.tsx".to_string()]);
            assert_eq!(summary.file_count, 1);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_coding_keeps_untouched_seed_files() {
    let b = brand("Acme Roasters", "#1A73E8");
    let mut req = request(GenerationStrategy::FastJson, GenerationQuality::Balanced);
    req.current_files = [
        ("README.md", "existing"),
        ("src/components/Pricing.tsx", "export const Pricing = () => <section>Plans</section>;"),
    ]
    .into_iter()
    .collect();
    let handlers = Arc::new(ScriptedHandlers::default().with_fast(ok(valid_files(&b), "done")));
    let orch = orchestrator(Arc::new(MockLlmClient::new()), handlers);

    let (rx, handle) = orch.spawn(req, CancellationToken::new());
    let mut consumer = StreamConsumer::new();
    consumer.consume(rx).await;
    let result = handle.await.unwrap().unwrap();

    assert_eq!(result.files.len(), valid_files(&b).len() + 2);
    assert_eq!(result.files.get("README.md"), Some("existing"));
    assert!(result.files.contains("src/components/Pricing.tsx"));
    // 种子文件未改动，不会作为事件推送
    assert!(!consumer.files().contains("README.md"));
    assert!(matches!(consumer.outcome(), Some(StreamOutcome::Done(s)) if s.files.contains(&"README.md".to_string())));
}

#[tokio::test]
async fn test_stage_timeouts_fall_back_and_finalize() {
    let b = brand("Acme Roasters", "#1A73E8");
    let handlers = Arc::new(ScriptedHandlers::default().with_fast(ok(valid_files(&b), "done")));
    // 每次推理都挂起，只能靠阶段超时结束
    let llm = Arc::new(MockLlmClient::new().with_fallback(MockReply::Hang));
    let orch = orchestrator_with_timeout(llm.clone(), handlers, Duration::from_millis(20));

    let (rx, handle) = orch.spawn(
        request(GenerationStrategy::PlanDriven, GenerationQuality::Balanced),
        CancellationToken::new(),
    );
    let events = tokio::time::timeout(Duration::from_secs(5), collect(rx))
        .await
        .expect("pipeline should not hang");
    let result = handle.await.unwrap().unwrap();

    assert_eq!(
        stages(&events),
        vec![
            PipelineStage::Planning,
            PipelineStage::Designing,
            PipelineStage::Coding,
            PipelineStage::Validating,
            PipelineStage::Finalizing,
        ]
    );
    assert_eq!(llm.call_count(), 2);
    assert!(!result.artifacts.master_plan.as_ref().unwrap().sections.is_empty());
    assert_eq!(result.artifacts.design_tokens.as_ref().unwrap().colors[0], "#1A73E8");
    assert_eq!(terminal_count(&events), 1);
    assert!(matches!(events.last(), Some(StreamEvent::Done(_))));
}
