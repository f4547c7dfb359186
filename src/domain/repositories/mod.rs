// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 存储协作方接口
//!
//! 编排器只依赖这两个trait；具体持久化由部署方提供。
//! 内存实现用于测试与单机运行。

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::job::Job;
use crate::domain::models::template::Template;
use crate::extraction::ExtractionResult;

pub use memory::{InMemoryResultStorage, InMemoryTemplateStore};

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    /// 模板不存在
    #[error("Template not found: {0}")]
    TemplateNotFound(Uuid),

    /// 底层存储失败
    #[error("Storage failure: {0}")]
    Backend(String),
}

/// 提取结果与任务状态的持久化接口
#[async_trait]
pub trait ResultStorage: Send + Sync {
    /// 持久化一个页面的提取结果
    ///
    /// # 参数
    ///
    /// * `job_id` - 所属任务
    /// * `page_index` - 页面序号（从1开始）
    /// * `result` - 该页的字段结果
    async fn persist(
        &self,
        job_id: Uuid,
        page_index: u32,
        result: &ExtractionResult,
    ) -> Result<(), StoreError>;

    /// 持久化任务的当前状态与进度
    async fn update_job_state(&self, job: &Job) -> Result<(), StoreError>;
}

/// 模板读取与使用统计回写接口
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// 按ID读取模板
    async fn get(&self, template_id: Uuid) -> Result<Template, StoreError>;

    /// 记录一次使用观测（弱一致，任务完成后调用）
    async fn record_usage(&self, template_id: Uuid, success_rate: f64) -> Result<(), StoreError>;
}
