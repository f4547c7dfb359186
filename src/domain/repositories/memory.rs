// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::models::job::Job;
use crate::domain::models::template::Template;
use crate::domain::repositories::{ResultStorage, StoreError, TemplateStore};
use crate::extraction::ExtractionResult;

/// 内存结果存储
///
/// 按任务聚合页面条目，任务状态整体覆盖写入
#[derive(Debug, Default)]
pub struct InMemoryResultStorage {
    items: DashMap<Uuid, Vec<StoredPage>>,
    jobs: DashMap<Uuid, Job>,
}

/// 已存储的单页结果
#[derive(Debug, Clone)]
pub struct StoredPage {
    pub page_index: u32,
    pub item: serde_json::Map<String, serde_json::Value>,
    pub success_rate: f64,
}

impl InMemoryResultStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 任务已存储的页面数
    pub fn page_count(&self, job_id: Uuid) -> usize {
        self.items
            .get(&job_id)
            .map(|pages| pages.value().len())
            .unwrap_or(0)
    }

    /// 任务的全部已存页面，按写入顺序
    pub fn pages(&self, job_id: Uuid) -> Vec<StoredPage> {
        self.items
            .get(&job_id)
            .map(|pages| pages.value().clone())
            .unwrap_or_default()
    }

    /// 任务最后一次写入的状态
    pub fn job_state(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.get(&job_id).map(|j| j.value().clone())
    }
}

#[async_trait]
impl ResultStorage for InMemoryResultStorage {
    async fn persist(
        &self,
        job_id: Uuid,
        page_index: u32,
        result: &ExtractionResult,
    ) -> Result<(), StoreError> {
        self.items.entry(job_id).or_default().push(StoredPage {
            page_index,
            item: result.to_item(),
            success_rate: result.success_rate,
        });
        Ok(())
    }

    async fn update_job_state(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }
}

/// 内存模板存储
#[derive(Debug, Default)]
pub struct InMemoryTemplateStore {
    templates: DashMap<Uuid, Template>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记模板，返回其ID
    pub fn insert(&self, template: Template) -> Uuid {
        let id = template.id;
        self.templates.insert(id, template);
        id
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get(&self, template_id: Uuid) -> Result<Template, StoreError> {
        self.templates
            .get(&template_id)
            .map(|t| t.value().clone())
            .ok_or(StoreError::TemplateNotFound(template_id))
    }

    async fn record_usage(&self, template_id: Uuid, success_rate: f64) -> Result<(), StoreError> {
        let mut entry = self
            .templates
            .get_mut(&template_id)
            .ok_or(StoreError::TemplateNotFound(template_id))?;
        entry.stats.record(success_rate);
        Ok(())
    }
}
