// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use rand::Rng;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::models::proxy::ProxyHealth;

/// 候选代理的健康快照视图
///
/// 选择策略只读取快照，从不触碰池内可变状态
#[derive(Debug, Clone)]
pub struct CandidateView {
    /// 代理ID
    pub id: Uuid,
    /// 健康层级
    pub health: ProxyHealth,
    /// 滚动成功率 (0.0 - 1.0)
    pub success_rate: f64,
    /// 平均延迟
    pub avg_latency: Duration,
    /// 地理区域
    pub region: Option<String>,
}

impl CandidateView {
    /// 综合评分：成功率 × 延迟倒数
    fn score(&self) -> f64 {
        let latency_secs = self.avg_latency.as_secs_f64().max(0.001);
        self.success_rate * (1.0 / latency_secs)
    }
}

/// 代理选择策略
///
/// 封闭的策略集合，每个变体都是对当前健康快照的纯函数
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionStrategy {
    /// 轮询：稳定循环顺序
    RoundRobin,
    /// 随机，可按成功率×延迟倒数加权
    Random {
        /// 是否加权
        weighted: bool,
    },
    /// 健康优先：排除低于成功率阈值的代理，取最高评分
    HealthBased {
        /// 成功率下限
        min_success_rate: f64,
    },
    /// 地理：先按区域过滤，再回退到健康优先
    Geographic {
        /// 要求的区域
        region: String,
    },
}

impl SelectionStrategy {
    /// 在候选快照上执行选择
    ///
    /// # 参数
    ///
    /// * `candidates` - 稳定顺序的候选快照
    /// * `cursor` - 外部轮询游标（仅轮询策略使用）
    ///
    /// # 返回值
    ///
    /// 选中的代理ID，候选为空时返回None
    pub fn select(&self, candidates: &[CandidateView], cursor: usize) -> Option<Uuid> {
        if candidates.is_empty() {
            return None;
        }
        match self {
            SelectionStrategy::RoundRobin => {
                Some(candidates[cursor % candidates.len()].id)
            }
            SelectionStrategy::Random { weighted: false } => {
                let idx = rand::rng().random_range(0..candidates.len());
                Some(candidates[idx].id)
            }
            SelectionStrategy::Random { weighted: true } => Self::weighted_random(candidates),
            SelectionStrategy::HealthBased { min_success_rate } => {
                Self::health_based(candidates, *min_success_rate)
            }
            SelectionStrategy::Geographic { region } => {
                let filtered: Vec<CandidateView> = candidates
                    .iter()
                    .filter(|c| c.region.as_deref() == Some(region.as_str()))
                    .cloned()
                    .collect();
                // Fall back to the full set when no proxy matches the region
                let set = if filtered.is_empty() {
                    candidates
                } else {
                    &filtered[..]
                };
                Self::health_based(set, 0.0)
            }
        }
    }

    /// 按评分加权的随机选择
    fn weighted_random(candidates: &[CandidateView]) -> Option<Uuid> {
        let total: f64 = candidates.iter().map(|c| c.score()).sum();
        if total <= 0.0 {
            let idx = rand::rng().random_range(0..candidates.len());
            return Some(candidates[idx].id);
        }
        let mut roll = rand::rng().random_range(0.0..total);
        for candidate in candidates {
            roll -= candidate.score();
            if roll <= 0.0 {
                return Some(candidate.id);
            }
        }
        candidates.last().map(|c| c.id)
    }

    /// 健康优先选择：过滤低成功率，健康层级优先，其次评分
    fn health_based(candidates: &[CandidateView], min_success_rate: f64) -> Option<Uuid> {
        let mut eligible: Vec<&CandidateView> = candidates
            .iter()
            .filter(|c| c.success_rate >= min_success_rate)
            .collect();
        // When the threshold excludes everyone, degrade gracefully
        if eligible.is_empty() {
            eligible = candidates.iter().collect();
        }
        eligible
            .into_iter()
            .max_by(|a, b| {
                let tier = |c: &CandidateView| match c.health {
                    ProxyHealth::Healthy => 2,
                    ProxyHealth::Degraded => 1,
                    ProxyHealth::Quarantined => 0,
                };
                tier(a)
                    .cmp(&tier(b))
                    .then_with(|| a.score().partial_cmp(&b.score()).unwrap_or(std::cmp::Ordering::Equal))
            })
            .map(|c| c.id)
    }
}
