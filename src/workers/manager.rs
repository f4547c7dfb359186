// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 任务管理器
//!
//! 接收任务提交，用信号量控制同时运行的任务数（先到先得），
//! 并为每个任务维护取消信号与最新状态。

use std::sync::Arc;

use dashmap::DashMap;
use metrics::gauge;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::job::{Job, JobStatus};
use crate::workers::orchestrator::JobOrchestrator;

/// 单个已提交任务的句柄
struct JobHandle {
    cancel_tx: watch::Sender<bool>,
    status: Arc<RwLock<JobStatus>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// 任务管理器
///
/// 提交的任务先进入等待队列（信号量排队是公平的），
/// 获得槽位后交给编排器执行
pub struct JobManager {
    orchestrator: Arc<JobOrchestrator>,
    slots: Arc<Semaphore>,
    jobs: DashMap<Uuid, Arc<JobHandle>>,
}

impl JobManager {
    /// # 参数
    ///
    /// * `orchestrator` - 共享的任务编排器
    /// * `max_running_jobs` - 同时运行的任务数上限
    pub fn new(orchestrator: Arc<JobOrchestrator>, max_running_jobs: usize) -> Self {
        Self {
            orchestrator,
            slots: Arc::new(Semaphore::new(max_running_jobs)),
            jobs: DashMap::new(),
        }
    }

    /// 提交任务
    ///
    /// 立即返回任务ID；任务在后台排队等待运行槽位
    pub fn submit(&self, job: Job) -> Uuid {
        let job_id = job.id;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let status = Arc::new(RwLock::new(job.status));
        let handle = Arc::new(JobHandle {
            cancel_tx,
            status: status.clone(),
            join: Mutex::new(None),
        });

        let orchestrator = self.orchestrator.clone();
        let slots = self.slots.clone();
        let join = tokio::spawn(async move {
            let _permit = match slots.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(job_id = %job_id, "Run slot semaphore closed, dropping job");
                    return;
                }
            };
            gauge!("jobs_running").increment(1.0);
            *status.write() = JobStatus::Running;

            let final_job = orchestrator.run(job, cancel_rx).await;
            *status.write() = final_job.status;
            gauge!("jobs_running").decrement(1.0);
        });

        *handle.join.lock() = Some(join);
        self.jobs.insert(job_id, handle);
        info!(job_id = %job_id, "Job submitted");
        job_id
    }

    /// 请求取消任务
    ///
    /// 协作式取消：信号在任务的下一个检查点生效，
    /// 已经终止的任务不受影响
    ///
    /// # 返回值
    ///
    /// 任务存在时返回true
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.jobs.get(&job_id) {
            Some(handle) => {
                info!(job_id = %job_id, "Cancellation requested");
                handle.cancel_tx.send(true).is_ok()
            }
            None => false,
        }
    }

    /// 任务当前状态
    pub fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.jobs.get(&job_id).map(|handle| *handle.status.read())
    }

    /// 等待任务终止并返回最终状态
    ///
    /// 每个任务只能等待一次，后续调用返回当前状态
    pub async fn wait(&self, job_id: Uuid) -> Option<JobStatus> {
        let join = self
            .jobs
            .get(&job_id)
            .and_then(|handle| handle.join.lock().take());
        if let Some(join) = join {
            if let Err(e) = join.await {
                warn!(job_id = %job_id, error = %e, "Job task panicked");
            }
        }
        self.status(job_id)
    }

    /// 已提交（含已终止）的任务数
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;
