// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 任务编排器
//!
//! 驱动单个任务的页面循环：租用代理、按策略抓取、提取、
//! 持久化、分页决策、节流。取消是协作式的，在每次迭代
//! 开始与各等待点检查，已发出的请求从不中途切断。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::Settings;
use crate::domain::models::job::{Job, JobConfig};
use crate::domain::models::template::{StrategyKind, Template};
use crate::domain::repositories::{ResultStorage, TemplateStore};
use crate::engines::traits::{FetchError, FetchRequest, FetchStrategy};
use crate::extraction::adaptive::{SelectorObservations, SelectorStatsStore};
use crate::extraction::ExtractionEngine;
use crate::pagination::{PageDecision, PaginationController, StopReason};
use crate::proxy::{LeaseOutcome, ProxyPool, ProxyRequirements};
use crate::utils::retry_policy::{RetryDecision, RetryPolicy};
use crate::workers::events::{ProgressEvent, ProgressSink};

/// 任务的终止方式
enum Terminal {
    Completed,
    Stopped,
    Failed(String),
}

/// 单页抓取的结局
enum PageFetch {
    Ok(String),
    Failed(FetchError),
    Exhausted,
    Cancelled,
}

/// 任务编排器
///
/// 无状态服务对象，可在任务间共享；每次run调用驱动
/// 一个任务从Running到终止状态
pub struct JobOrchestrator {
    pool: Arc<ProxyPool>,
    strategies: HashMap<StrategyKind, Arc<dyn FetchStrategy>>,
    stats: Arc<SelectorStatsStore>,
    storage: Arc<dyn ResultStorage>,
    templates: Arc<dyn TemplateStore>,
    engine: ExtractionEngine,
    retry_policy: RetryPolicy,
    exhausted_cooldown: Duration,
    exhausted_ceiling: u32,
    sink: ProgressSink,
}

impl JobOrchestrator {
    /// # 参数
    ///
    /// * `pool` - 代理池，空池表示直连
    /// * `strategies` - 按策略种类注册的抓取实现
    /// * `stats` - 自适应选择器统计存储
    /// * `storage` - 结果与任务状态持久化
    /// * `templates` - 模板读取与统计回写
    /// * `settings` - 全局配置
    /// * `sink` - 进度事件发送端
    pub fn new(
        pool: Arc<ProxyPool>,
        strategies: HashMap<StrategyKind, Arc<dyn FetchStrategy>>,
        stats: Arc<SelectorStatsStore>,
        storage: Arc<dyn ResultStorage>,
        templates: Arc<dyn TemplateStore>,
        settings: &Settings,
        sink: ProgressSink,
    ) -> Self {
        Self {
            pool,
            strategies,
            stats,
            storage,
            templates,
            engine: ExtractionEngine::new(),
            retry_policy: RetryPolicy::with_max_retries(settings.scrape.max_retries),
            exhausted_cooldown: Duration::from_secs(settings.proxy.exhausted_cooldown_secs),
            exhausted_ceiling: settings.proxy.exhausted_ceiling,
            sink,
        }
    }

    /// 执行一个任务直到终止状态
    ///
    /// # 参数
    ///
    /// * `job` - Pending状态的任务
    /// * `cancel` - 取消信号，置true后在下一个检查点生效
    ///
    /// # 返回值
    ///
    /// 终止状态的任务（Completed/Failed/Stopped）
    pub async fn run(&self, job: Job, mut cancel: watch::Receiver<bool>) -> Job {
        let template = match self.templates.get(job.template_id).await {
            Ok(t) => t,
            Err(e) => {
                return self
                    .finish_failed(job, format!("Template load failed: {}", e))
                    .await;
            }
        };
        if let Err(reason) = template.validate() {
            return self
                .finish_failed(job, format!("Invalid template: {}", reason))
                .await;
        }
        let Some(strategy) = self.strategies.get(&template.strategy).cloned() else {
            return self
                .finish_failed(job, format!("No fetch strategy registered for '{}'", template.strategy))
                .await;
        };
        let start_url = match Url::parse(&job.url) {
            Ok(u) => u,
            Err(e) => {
                let reason = format!("Invalid start url '{}': {}", job.url, e);
                return self.finish_failed(job, reason).await;
            }
        };

        // Chain order is frozen for the whole job from the stats snapshot
        let template = self.stats.snapshot().reorder(&template);

        let mut job = match job.clone().start() {
            Ok(j) => j,
            Err(_) => return job,
        };
        self.persist_state(&job).await;
        info!(job_id = %job.id, template = %template.name, strategy = %template.strategy, "Job started");

        let mut pagination =
            PaginationController::new(template.pagination.clone(), job.config.max_pages);
        pagination.start(&start_url);

        let mut observations = SelectorObservations::new();
        let mut page_rates: Vec<f64> = Vec::new();
        let mut current_url = start_url;
        let mut page_index: u32 = 1;
        let mut exhausted_streak: u32 = 0;
        let requirements = ProxyRequirements::default();

        let terminal = loop {
            // Cancellation checkpoint at the top of every iteration
            if *cancel.borrow() {
                break Terminal::Stopped;
            }

            let fetched = self
                .fetch_page(
                    &current_url,
                    &job.config,
                    strategy.as_ref(),
                    &requirements,
                    &mut cancel,
                    &mut exhausted_streak,
                )
                .await;

            let body = match fetched {
                PageFetch::Ok(body) => body,
                PageFetch::Cancelled => break Terminal::Stopped,
                PageFetch::Exhausted => {
                    break Terminal::Failed("Proxy pool exhausted".to_string());
                }
                PageFetch::Failed(err) => {
                    // A page that exhausted its retries still counts as
                    // attempted, keeping items <= pages_fetched * fields
                    job.pages_fetched += 1;
                    job.items_failed += 1;
                    job.update_progress();
                    if page_index == 1 || job.config.fail_on_any_page {
                        break Terminal::Failed(format!(
                            "Page {} fetch failed: {}",
                            page_index, err
                        ));
                    }
                    warn!(job_id = %job.id, page_index, error = %err, "Page skipped after retries");
                    job.last_error = Some(format!("page {}: {}", page_index, err));
                    // No body means no next link; pattern pagination can still advance
                    String::new()
                }
            };

            if !body.is_empty() {
                let result = self.engine.extract(&template, &body, &current_url);
                observations.record_page(&template, &result);
                page_rates.push(result.success_rate);

                if result.required_ok(&template) {
                    job.items_scraped += 1;
                } else {
                    job.items_failed += 1;
                    debug!(job_id = %job.id, page_index, errors = ?result.errors, "Page extracted with missing required fields");
                }

                if let Err(e) = self.storage.persist(job.id, page_index, &result).await {
                    break Terminal::Failed(format!("Result persistence failed: {}", e));
                }
                job.pages_fetched += 1;
                job.update_progress();
            }

            self.persist_state(&job).await;
            self.sink.emit(ProgressEvent {
                job_id: job.id,
                page_index,
                items_scraped: job.items_scraped,
                items_failed: job.items_failed,
                current_url: current_url.to_string(),
                status: job.status,
            });

            match pagination.next(page_index, &current_url, &body) {
                PageDecision::Next(next) => {
                    current_url = next;
                    page_index += 1;
                }
                PageDecision::Stop(reason) => {
                    debug!(job_id = %job.id, ?reason, "Pagination finished");
                    if reason == StopReason::Cycle {
                        counter!("pagination_cycles_total").increment(1);
                    }
                    break Terminal::Completed;
                }
            }

            if !self.throttle(&job.config, &mut cancel).await {
                break Terminal::Stopped;
            }
        };

        // Weakly consistent bookkeeping, only for jobs that actually ran
        self.stats.commit(observations);
        if !page_rates.is_empty() {
            let avg = page_rates.iter().sum::<f64>() / page_rates.len() as f64;
            if let Err(e) = self.templates.record_usage(job.template_id, avg).await {
                warn!(job_id = %job.id, error = %e, "Template usage update failed");
            }
        }

        let final_job = match terminal {
            Terminal::Completed => {
                counter!("jobs_completed_total").increment(1);
                job.clone().complete()
            }
            Terminal::Stopped => {
                counter!("jobs_stopped_total").increment(1);
                job.clone().stop()
            }
            Terminal::Failed(reason) => {
                counter!("jobs_failed_total").increment(1);
                job.clone().fail(reason)
            }
        }
        .unwrap_or(job);

        self.persist_state(&final_job).await;
        // The terminal event gets an index past the last page so the
        // per-job stream stays strictly increasing
        self.sink.emit(ProgressEvent {
            job_id: final_job.id,
            page_index: page_index + 1,
            items_scraped: final_job.items_scraped,
            items_failed: final_job.items_failed,
            current_url: current_url.to_string(),
            status: final_job.status,
        });
        info!(
            job_id = %final_job.id,
            status = %final_job.status,
            pages = final_job.pages_fetched,
            items = final_job.items_scraped,
            "Job finished"
        );
        final_job
    }

    /// 抓取单个页面，含重试与代理轮换
    ///
    /// 每次尝试独立租用代理：要求轮换的失败会把刚用过的代理
    /// 从下一次租用中排除，封禁类失败还会加重其健康惩罚。
    /// 正在进行的请求从不被取消信号切断，取消只在退避等待
    /// 与租用等待中生效。
    async fn fetch_page(
        &self,
        url: &Url,
        config: &JobConfig,
        strategy: &dyn FetchStrategy,
        requirements: &ProxyRequirements,
        cancel: &mut watch::Receiver<bool>,
        exhausted_streak: &mut u32,
    ) -> PageFetch {
        let mut attempt: u32 = 1;
        let mut rotate_from: Option<Uuid> = None;
        loop {
            let lease = if self.pool.is_empty() {
                // Direct connection when no proxies are configured
                None
            } else {
                let mut wanted = requirements.clone();
                wanted.exclude = rotate_from;
                match self.pool.acquire(&wanted) {
                    Ok(lease) => {
                        *exhausted_streak = 0;
                        Some(lease)
                    }
                    Err(e) => {
                        *exhausted_streak += 1;
                        if *exhausted_streak >= self.exhausted_ceiling {
                            warn!(streak = *exhausted_streak, "Giving up on proxy acquisition");
                            return PageFetch::Exhausted;
                        }
                        debug!(streak = *exhausted_streak, error = %e, "Proxy pool exhausted, cooling down");
                        if !wait_or_cancel(self.exhausted_cooldown, cancel).await {
                            return PageFetch::Cancelled;
                        }
                        continue;
                    }
                }
            };

            let leased_id = lease.as_ref().map(|l| l.proxy.id);
            let mut request = FetchRequest::new(url.as_str()).with_timeout(config.timeout());
            if let Some(lease) = &lease {
                request = request.with_proxy(lease.proxy.clone());
            }

            let started = Instant::now();
            match strategy.fetch(&request).await {
                Ok(result) => {
                    if let Some(lease) = lease {
                        self.pool.release(
                            lease,
                            &LeaseOutcome::Success {
                                latency: started.elapsed(),
                            },
                        );
                    }
                    counter!("pages_fetched_total").increment(1);
                    debug!(url = %url, status = result.status_code, strategy = result.strategy, "Page fetched");
                    return PageFetch::Ok(result.body);
                }
                Err(err) => {
                    if let Some(lease) = lease {
                        self.pool.release(
                            lease,
                            &LeaseOutcome::Failure {
                                blocked: err.penalizes_proxy(),
                            },
                        );
                    }
                    counter!("fetch_errors_total").increment(1);
                    match self.retry_policy.decide(attempt, &err) {
                        RetryDecision::RetryAfter {
                            delay,
                            rotate_proxy,
                        } => {
                            rotate_from = if rotate_proxy { leased_id } else { None };
                            debug!(
                                url = %url,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                rotate_proxy,
                                error = %err,
                                "Retrying page fetch"
                            );
                            if !wait_or_cancel(delay, cancel).await {
                                return PageFetch::Cancelled;
                            }
                            attempt += 1;
                        }
                        RetryDecision::GiveUp => return PageFetch::Failed(err),
                    }
                }
            }
        }
    }

    /// 页面之间的随机间隔，人类化节流
    ///
    /// 返回false表示等待期间收到取消信号
    async fn throttle(&self, config: &JobConfig, cancel: &mut watch::Receiver<bool>) -> bool {
        if config.delay_max_ms == 0 {
            return !*cancel.borrow();
        }
        let ms = if config.delay_min_ms >= config.delay_max_ms {
            config.delay_min_ms
        } else {
            rand::random_range(config.delay_min_ms..=config.delay_max_ms)
        };
        wait_or_cancel(Duration::from_millis(ms), cancel).await
    }

    /// 以失败状态结束一个未能开始执行的任务
    async fn finish_failed(&self, job: Job, reason: String) -> Job {
        warn!(job_id = %job.id, reason = %reason, "Job failed before execution");
        counter!("jobs_failed_total").increment(1);
        let failed = job.clone().fail(reason).unwrap_or(job);
        self.persist_state(&failed).await;
        failed
    }

    /// 持久化任务状态，失败只记日志不影响执行
    async fn persist_state(&self, job: &Job) {
        if let Err(e) = self.storage.update_job_state(job).await {
            warn!(job_id = %job.id, error = %e, "Job state persistence failed");
        }
    }
}

/// 可取消的等待
///
/// 取消信号在等待期间置true时返回false；信号源已关闭则
/// 完成整个等待后返回true
async fn wait_or_cancel(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return false;
    }
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = cancel.changed() => {
                if changed.is_err() {
                    sleep.as_mut().await;
                    return true;
                }
                if *cancel.borrow() {
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
