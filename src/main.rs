// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;

use harvestrs::config::Settings;
use harvestrs::domain::models::job::{Job, JobConfig};
use harvestrs::domain::models::template::Template;
use harvestrs::domain::repositories::{InMemoryResultStorage, InMemoryTemplateStore};
use harvestrs::engines::default_strategies;
use harvestrs::extraction::adaptive::SelectorStatsStore;
use harvestrs::proxy::{ProxyPool, ProxyPoolConfig, SelectionStrategy};
use harvestrs::utils::telemetry;
use harvestrs::workers::events::ProgressSink;
use harvestrs::workers::{JobManager, JobOrchestrator};

/// 主函数
///
/// 单机运行模式：从命令行读取模板文件与起始URL，
/// 执行一个任务并把提取结果逐行输出为JSON
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();

    let mut args = std::env::args().skip(1);
    let (template_path, start_url) = match (args.next(), args.next()) {
        (Some(t), Some(u)) => (PathBuf::from(t), u),
        _ => bail!("usage: harvestrs <template.json> <start-url>"),
    };

    // 2. Load configuration
    let settings = Settings::new().context("configuration load failed")?;
    info!("Configuration loaded");

    // 3. Load and register the template
    let raw = std::fs::read_to_string(&template_path)
        .with_context(|| format!("cannot read template file {}", template_path.display()))?;
    let template: Template = serde_json::from_str(&raw).context("template does not parse")?;
    template
        .validate()
        .map_err(|reason| anyhow::anyhow!("invalid template: {}", reason))?;

    let templates = Arc::new(InMemoryTemplateStore::new());
    let template_id = templates.insert(template);

    // 4. Wire up the pipeline
    let storage = Arc::new(InMemoryResultStorage::new());
    let pool = Arc::new(ProxyPool::new(
        SelectionStrategy::RoundRobin,
        ProxyPoolConfig::from(&settings.proxy),
    ));
    let (sink, mut progress) = ProgressSink::channel(64);
    let orchestrator = Arc::new(JobOrchestrator::new(
        pool,
        default_strategies(),
        Arc::new(SelectorStatsStore::new(settings.adaptive.min_uses)),
        storage.clone(),
        templates,
        &settings,
        sink,
    ));
    let manager = JobManager::new(orchestrator, settings.concurrency.max_running_jobs);

    // 5. Run one job to completion
    let job = Job::new(
        template_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("job"),
        template_id,
        start_url,
        JobConfig::from_settings(&settings.scrape),
    );
    let job_id = manager.submit(job);

    tokio::spawn(async move {
        while let Some(event) = progress.recv().await {
            info!(
                job_id = %event.job_id,
                page = event.page_index,
                scraped = event.items_scraped,
                failed = event.items_failed,
                status = %event.status,
                "progress"
            );
        }
    });

    let status = manager.wait(job_id).await;
    info!(job_id = %job_id, status = ?status, "job finished");

    for page in storage.pages(job_id) {
        println!("{}", serde_json::Value::Object(page.item));
    }

    if let Some(job) = storage.job_state(job_id) {
        if let Some(error) = job.last_error {
            eprintln!("last error: {}", error);
        }
    }
    Ok(())
}
