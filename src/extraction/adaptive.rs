// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 自适应选择器统计
//!
//! 按 (模板, 字段, 选择器表达式) 维护命中统计。任务开始时
//! 读取一份不可变快照并据此重排回退链；任务执行期间只在
//! 本地累积观测，任务结束后一次性合并回存储。读路径无锁
//! 竞争，写路径单次提交，统计属于弱一致数据。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::models::template::Template;
use crate::extraction::engine::ExtractionResult;

/// 样本不足时使用的中性评分
const NEUTRAL_SCORE: f64 = 0.5;

/// 单个选择器的累计观测
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorStat {
    /// 被尝试的次数
    pub uses: u64,
    /// 命中（至少匹配一个元素）的次数
    pub hits: u64,
}

impl SelectorStat {
    /// 评分：样本不足时返回中性值，避免早期波动导致频繁重排
    fn score(&self, min_uses: u64) -> f64 {
        if self.uses < min_uses {
            NEUTRAL_SCORE
        } else {
            self.hits as f64 / self.uses as f64
        }
    }
}

type FieldKey = (Uuid, String);

/// 不可变统计快照
///
/// 任务在整个生命周期内持有同一份快照，中途的提交
/// 不影响已经开始的任务
#[derive(Debug, Default)]
pub struct StatsSnapshot {
    version: u64,
    stats: HashMap<FieldKey, HashMap<String, SelectorStat>>,
    min_uses: u64,
}

impl StatsSnapshot {
    /// 快照版本号，随每次提交递增
    pub fn version(&self) -> u64 {
        self.version
    }

    /// 按历史命中率重排模板的回退链
    ///
    /// 仅当模板开启 adaptive_selectors 时生效；排序稳定，
    /// 评分相同的选择器保持模板声明顺序
    pub fn reorder(&self, template: &Template) -> Template {
        if !template.adaptive_selectors {
            return template.clone();
        }

        let mut reordered = template.clone();
        for field in &mut reordered.fields {
            let key = (template.id, field.name.clone());
            let Some(per_selector) = self.stats.get(&key) else {
                continue;
            };
            field.selectors.sort_by(|a, b| {
                let score_a = per_selector
                    .get(&a.expr)
                    .map(|s| s.score(self.min_uses))
                    .unwrap_or(NEUTRAL_SCORE);
                let score_b = per_selector
                    .get(&b.expr)
                    .map(|s| s.score(self.min_uses))
                    .unwrap_or(NEUTRAL_SCORE);
                score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        reordered
    }
}

/// 任务本地的观测累积
///
/// 执行期间只写本地，不碰共享存储
#[derive(Debug, Default)]
pub struct SelectorObservations {
    counts: HashMap<FieldKey, HashMap<String, SelectorStat>>,
}

impl SelectorObservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个页面的提取结果
    ///
    /// # 参数
    ///
    /// * `template` - 本次实际使用的模板（重排后的链序）
    /// * `result` - 页面提取结果，字段顺序与模板一致
    pub fn record_page(&mut self, template: &Template, result: &ExtractionResult) {
        for (rule, outcome) in template.fields.iter().zip(result.fields.iter()) {
            let key = (template.id, rule.name.clone());
            let per_selector = self.counts.entry(key).or_default();
            for (index, spec) in rule.selectors.iter().enumerate().take(outcome.attempted) {
                let stat = per_selector.entry(spec.expr.clone()).or_default();
                stat.uses += 1;
                if outcome.winning_selector == Some(index) {
                    stat.hits += 1;
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// 选择器统计存储
///
/// 读者取 Arc 快照，写者整体替换；提交粒度为一个任务
#[derive(Debug)]
pub struct SelectorStatsStore {
    snapshot: RwLock<Arc<StatsSnapshot>>,
    min_uses: u64,
}

impl SelectorStatsStore {
    /// # 参数
    ///
    /// * `min_uses` - 选择器参与重排所需的最小样本量
    pub fn new(min_uses: u64) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(StatsSnapshot {
                min_uses,
                ..StatsSnapshot::default()
            })),
            min_uses,
        }
    }

    /// 获取当前快照
    pub fn snapshot(&self) -> Arc<StatsSnapshot> {
        self.snapshot.read().clone()
    }

    /// 合并一个任务的观测并发布新快照
    pub fn commit(&self, observations: SelectorObservations) {
        if observations.is_empty() {
            return;
        }

        let mut guard = self.snapshot.write();
        let mut stats = guard.stats.clone();
        for (key, per_selector) in observations.counts {
            let merged = stats.entry(key).or_default();
            for (expr, stat) in per_selector {
                let entry = merged.entry(expr).or_default();
                entry.uses += stat.uses;
                entry.hits += stat.hits;
            }
        }

        let version = guard.version + 1;
        debug!(version, "Published selector stats snapshot");
        *guard = Arc::new(StatsSnapshot {
            version,
            stats,
            min_uses: self.min_uses,
        });
    }
}
