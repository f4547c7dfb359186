// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::settings::ScrapeSettings;

/// 任务实体
///
/// 表示一次模板驱动的抓取工作单元。任务持有启动时捕获的
/// 不可变配置快照、运行状态、进度以及条目计数。状态仅由
/// 编排器通过本实体的转换方法修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// 任务唯一标识符
    pub id: Uuid,
    /// 任务名称
    pub name: String,
    /// 使用的模板ID
    pub template_id: Uuid,
    /// 目标URL，抓取的起始页面
    pub url: String,
    /// 任务配置快照，启动后不再变更
    pub config: JobConfig,
    /// 任务状态
    pub status: JobStatus,
    /// 进度百分比 (0.0 - 100.0)
    pub progress: f32,
    /// 已抓取条目数
    pub items_scraped: u64,
    /// 失败条目数
    pub items_failed: u64,
    /// 已抓取页数
    pub pages_fetched: u32,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 开始执行时间
    pub started_at: Option<DateTime<Utc>>,
    /// 完成时间
    pub completed_at: Option<DateTime<Utc>>,
    /// 最后一条错误信息，面向用户的失败描述
    pub last_error: Option<String>,
}

/// 任务配置快照
///
/// 在任务启动时从全局配置与任务参数合并得到，
/// 运行期间全局配置的变更不会影响已捕获的快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// 请求间隔下限（毫秒）
    pub delay_min_ms: u64,
    /// 请求间隔上限（毫秒）
    pub delay_max_ms: u64,
    /// 单页最大重试次数
    pub max_retries: u32,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
    /// 最大页数
    pub max_pages: u32,
    /// 任意页失败是否导致任务失败
    ///
    /// 默认false：仅首页失败导致任务失败，后续页失败只降低完整性
    pub fail_on_any_page: bool,
}

impl JobConfig {
    /// 从全局抓取配置创建任务配置快照
    pub fn from_settings(settings: &ScrapeSettings) -> Self {
        Self {
            delay_min_ms: settings.delay_min_ms,
            delay_max_ms: settings.delay_max_ms,
            max_retries: settings.max_retries,
            timeout_secs: settings.timeout_secs,
            max_pages: settings.max_pages,
            fail_on_any_page: false,
        }
    }

    /// 请求超时时间
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 任务状态枚举
///
/// 状态转换遵循以下流程：
/// Pending → Running → Completed/Failed/Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// 等待中，任务已创建但尚未获得运行槽位
    #[default]
    Pending,
    /// 运行中，跨页面迭代期间保持此状态
    Running,
    /// 已完成，分页耗尽或达到页数上限
    Completed,
    /// 已失败，首页抓取失败或启动时配置错误
    Failed,
    /// 已停止，外部取消请求在安全检查点生效
    Stopped,
}

impl JobStatus {
    /// 判断是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Stopped => write!(f, "stopped"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "stopped" => Ok(JobStatus::Stopped),
            _ => Err(()),
        }
    }
}

/// 领域错误类型
#[derive(Error, Debug)]
pub enum DomainError {
    /// 无效的状态转换，当任务状态转换不符合业务规则时发生
    #[error("Invalid state transition")]
    InvalidStateTransition,

    /// 验证错误，当输入数据不符合领域规则时发生
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl Job {
    /// 创建一个新的任务
    ///
    /// # 参数
    ///
    /// * `name` - 任务名称
    /// * `template_id` - 模板ID
    /// * `url` - 目标URL
    /// * `config` - 任务配置快照
    ///
    /// # 返回值
    ///
    /// 返回新创建的任务实例
    pub fn new(name: impl Into<String>, template_id: Uuid, url: impl Into<String>, config: JobConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            template_id,
            url: url.into(),
            config,
            status: JobStatus::Pending,
            progress: 0.0,
            items_scraped: 0,
            items_failed: 0,
            pages_fetched: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    /// 启动任务
    ///
    /// 将任务状态从Pending变更为Running
    ///
    /// # 返回值
    ///
    /// * `Ok(Job)` - 成功启动的任务
    /// * `Err(DomainError)` - 状态转换失败
    pub fn start(mut self) -> Result<Self, DomainError> {
        match self.status {
            JobStatus::Pending => {
                self.status = JobStatus::Running;
                self.started_at = Some(Utc::now());
                Ok(self)
            }
            _ => Err(DomainError::InvalidStateTransition),
        }
    }

    /// 完成任务
    ///
    /// 将任务状态从Running变更为Completed
    ///
    /// # 返回值
    ///
    /// * `Ok(Job)` - 成功完成的任务
    /// * `Err(DomainError)` - 状态转换失败
    pub fn complete(mut self) -> Result<Self, DomainError> {
        match self.status {
            JobStatus::Running => {
                self.status = JobStatus::Completed;
                self.progress = 100.0;
                self.completed_at = Some(Utc::now());
                Ok(self)
            }
            _ => Err(DomainError::InvalidStateTransition),
        }
    }

    /// 标记任务失败
    ///
    /// 记录面向用户的错误描述并进入Failed状态。
    /// Pending状态下的启动期配置错误也可以直接失败。
    ///
    /// # 参数
    ///
    /// * `reason` - 人类可读的失败原因
    ///
    /// # 返回值
    ///
    /// * `Ok(Job)` - 失败的任务
    /// * `Err(DomainError)` - 状态转换失败
    pub fn fail(mut self, reason: impl Into<String>) -> Result<Self, DomainError> {
        match self.status {
            JobStatus::Pending | JobStatus::Running => {
                self.status = JobStatus::Failed;
                self.last_error = Some(reason.into());
                self.completed_at = Some(Utc::now());
                Ok(self)
            }
            _ => Err(DomainError::InvalidStateTransition),
        }
    }

    /// 停止任务
    ///
    /// 协作式取消在安全检查点生效后调用，不视为错误
    ///
    /// # 返回值
    ///
    /// * `Ok(Job)` - 已停止的任务
    /// * `Err(DomainError)` - 状态转换失败
    pub fn stop(mut self) -> Result<Self, DomainError> {
        match self.status {
            JobStatus::Pending | JobStatus::Running => {
                self.status = JobStatus::Stopped;
                self.completed_at = Some(Utc::now());
                Ok(self)
            }
            _ => Err(DomainError::InvalidStateTransition),
        }
    }

    /// 更新进度百分比
    ///
    /// 基于已抓取页数与页数上限估算
    pub fn update_progress(&mut self) {
        if self.config.max_pages > 0 {
            let pct = (self.pages_fetched as f32 / self.config.max_pages as f32) * 100.0;
            self.progress = pct.min(100.0);
        }
    }
}
