//! Brandsmith 命令行入口
//!
//! 用法: brandsmith <request.json> [--out DIR] [--seed DIR]
//! - request.json：GenerationRequest（camelCase）
//! - --seed：把目录下已有文件作为 currentFiles
//! - --out：把最终文件集写入目录（默认 ./generated）
//! 事件帧以 NDJSON 输出到 stdout，日志输出到 stderr。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use brandsmith::config::{load_config, PipelineConfig};
use brandsmith::llm::create_llm_from_config;
use brandsmith::pipeline::{
    FileSet, GenerationRequest, LlmHandlers, Orchestrator, StreamConsumer, StreamOutcome,
};

struct CliArgs {
    request: PathBuf,
    out: PathBuf,
    seed: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut args = std::env::args().skip(1);
    let mut request = None;
    let mut out = PathBuf::from("generated");
    let mut seed = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out" => out = PathBuf::from(args.next().context("--out requires a directory")?),
            "--seed" => seed = Some(PathBuf::from(args.next().context("--seed requires a directory")?)),
            _ if request.is_none() => request = Some(PathBuf::from(&arg)),
            other => bail!("Unexpected argument: {}", other),
        }
    }
    let Some(request) = request else {
        bail!("Usage: brandsmith <request.json> [--out DIR] [--seed DIR]");
    };
    Ok(CliArgs { request, out, seed })
}

/// 读取目录下所有文本文件（跳过 node_modules 与隐藏目录）
fn read_seed_files(dir: &Path) -> anyhow::Result<FileSet> {
    let mut files = FileSet::new();
    let walker = WalkDir::new(dir).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        e.depth() == 0 || !(name.starts_with('.') || name == "node_modules")
    });
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir)?;
        match std::fs::read_to_string(entry.path()) {
            Ok(content) => {
                files.insert(rel.to_string_lossy().replace('\\', "/"), content);
            }
            Err(e) => tracing::debug!("Skipping {}: {}", rel.display(), e),
        }
    }
    Ok(files)
}

fn write_files(dir: &Path, files: &FileSet) -> anyhow::Result<()> {
    for (path, content) in files.iter() {
        let target = dir.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&target, content)
            .with_context(|| format!("Failed to write {}", target.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    brandsmith::observability::init();

    let args = parse_args()?;
    let cfg = load_config(None).context("Failed to load config")?;

    let raw = std::fs::read_to_string(&args.request)
        .with_context(|| format!("Failed to read {}", args.request.display()))?;
    let mut request: GenerationRequest =
        serde_json::from_str(&raw).context("Invalid generation request")?;
    if let Some(seed_dir) = &args.seed {
        let seeded = read_seed_files(seed_dir)?;
        tracing::info!(files = seeded.len(), "Loaded seed files");
        request.current_files.overlay(&seeded);
    }

    let llm = create_llm_from_config(&cfg);
    let pipeline_cfg = PipelineConfig::from(&cfg);
    let handlers = Arc::new(LlmHandlers::new(
        Arc::clone(&llm),
        pipeline_cfg.model.clone(),
        Duration::from_secs(cfg.llm.request_timeout_secs),
        pipeline_cfg.agentic_max_steps,
    ));
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&llm), handlers, pipeline_cfg));

    // Ctrl-C 取消本次生成
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let (mut rx, handle) = orchestrator.spawn(request, cancel);
    let mut consumer = StreamConsumer::new();
    consumer.begin();
    let stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        {
            let mut out = stdout.lock();
            out.write_all(event.to_ndjson_line().as_bytes())?;
            out.flush()?;
        }
        if !consumer.apply(event) {
            break;
        }
    }

    let result = handle.await.context("Generation task failed")?;
    let (prompt_tokens, completion_tokens, total_tokens) = llm.token_usage();
    tracing::info!(prompt_tokens, completion_tokens, total_tokens, "Token usage");

    // 成功时写最终文件集；失败或取消时写已推送的部分文件
    let files = match &result {
        Ok(done) => &done.files,
        Err(_) => consumer.files(),
    };
    write_files(&args.out, files)?;
    eprintln!("Wrote {} files to {}", files.len(), args.out.display());

    match (consumer.outcome(), result) {
        (Some(StreamOutcome::Done(_)), Ok(_)) => Ok(()),
        (_, Err(e)) => Err(e).context("Generation did not complete"),
        (_, Ok(_)) => bail!("Event stream ended without a terminal frame"),
    }
}
