// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::settings::ProxySettings;
use crate::domain::models::proxy::{Proxy, ProxyHealth};
use crate::proxy::strategy::{CandidateView, SelectionStrategy};

/// 代理池错误类型
///
/// Exhausted与抓取失败是不同的错误：它意味着任务应当
/// 等待或失败，而不是对某个具体代理重试
#[derive(Error, Debug)]
pub enum ProxyError {
    /// 没有符合条件的代理可用
    #[error("No proxy available")]
    Exhausted,
    /// 未知代理
    #[error("Unknown proxy: {0}")]
    UnknownProxy(Uuid),
}

/// 代理池配置
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// 连续失败多少次后隔离
    pub quarantine_threshold: u32,
    /// 首次隔离时长
    pub quarantine_base: Duration,
    /// 隔离时长上限
    pub quarantine_max: Duration,
    /// 成功率低于此阈值降级
    pub degraded_success_rate: f64,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            quarantine_threshold: 5,
            quarantine_base: Duration::from_secs(60),
            quarantine_max: Duration::from_secs(3600),
            degraded_success_rate: 0.5,
        }
    }
}

impl From<&ProxySettings> for ProxyPoolConfig {
    fn from(settings: &ProxySettings) -> Self {
        Self {
            quarantine_threshold: settings.quarantine_threshold,
            quarantine_base: Duration::from_secs(settings.quarantine_base_secs),
            quarantine_max: Duration::from_secs(settings.quarantine_max_secs),
            degraded_success_rate: settings.degraded_success_rate,
        }
    }
}

/// 代理租约
///
/// acquire返回的凭证，持有期间计入该代理的并发配额。
/// 使用完毕必须通过release归还并上报结果。
#[derive(Debug)]
pub struct ProxyLease {
    /// 租用的代理
    pub proxy: Proxy,
    /// 租用时刻
    pub acquired_at: Instant,
}

/// 租约结果
#[derive(Debug, Clone, Copy)]
pub enum LeaseOutcome {
    /// 抓取成功
    Success {
        /// 本次请求耗时
        latency: Duration,
    },
    /// 抓取失败
    Failure {
        /// 是否为封禁类失败（计入更重的代理惩罚）
        blocked: bool,
    },
}

/// 代理选择要求
#[derive(Debug, Clone, Default)]
pub struct ProxyRequirements {
    /// 要求的地理区域
    pub region: Option<String>,
    /// 强制轮换时要排除的代理（上一次失败的那个）。
    /// 若排除后没有其他候选，则忽略该排除以免饿死任务
    pub exclude: Option<Uuid>,
}

/// 池内代理条目
///
/// 健康状态与滚动指标仅由代理池修改，调用方从不直接触碰
#[derive(Debug, Clone)]
struct ProxyEntry {
    proxy: Proxy,
    health: ProxyHealth,
    success_count: u64,
    failure_count: u64,
    consecutive_failures: u32,
    avg_latency: Duration,
    quarantine_until: Option<Instant>,
    offenses: u32,
    in_flight: usize,
}

impl ProxyEntry {
    fn new(proxy: Proxy) -> Self {
        Self {
            proxy,
            health: ProxyHealth::Healthy,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            avg_latency: Duration::from_millis(500),
            quarantine_until: None,
            offenses: 0,
            in_flight: 0,
        }
    }

    /// 滚动成功率，无样本时乐观地视为1.0
    fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    /// 隔离计时器是否仍在生效
    fn quarantine_active(&self, now: Instant) -> bool {
        self.health == ProxyHealth::Quarantined
            && self.quarantine_until.is_some_and(|until| until > now)
    }

    /// 是否可参与选择
    fn eligible(&self, now: Instant) -> bool {
        !self.quarantine_active(now) && self.in_flight < self.proxy.max_concurrency
    }
}

/// 代理池管理器
///
/// 持有代理集合、健康状态与选择策略。所有状态变更
/// （租用、归还、隔离、指标更新）都经由池自身的内部
/// 同步串行化。
pub struct ProxyPool {
    /// 代理条目映射
    entries: RwLock<HashMap<Uuid, ProxyEntry>>,
    /// 稳定的循环顺序（按加入顺序）
    order: RwLock<Vec<Uuid>>,
    /// 当前轮询索引
    round_robin_index: Mutex<usize>,
    /// 选择策略
    strategy: SelectionStrategy,
    /// 配置
    config: ProxyPoolConfig,
}

impl ProxyPool {
    /// 创建新的代理池
    ///
    /// # 参数
    ///
    /// * `strategy` - 选择策略
    /// * `config` - 池配置
    ///
    /// # 返回值
    ///
    /// 返回新的代理池实例
    pub fn new(strategy: SelectionStrategy, config: ProxyPoolConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            round_robin_index: Mutex::new(0),
            strategy,
            config,
        }
    }

    /// 向池中加入代理
    pub fn add(&self, proxy: Proxy) {
        let id = proxy.id;
        self.entries.write().insert(id, ProxyEntry::new(proxy));
        self.order.write().push(id);
        gauge!("proxy_pool_size").set(self.order.read().len() as f64);
    }

    /// 从池中移除代理
    pub fn remove(&self, id: Uuid) {
        self.entries.write().remove(&id);
        self.order.write().retain(|pid| *pid != id);
        gauge!("proxy_pool_size").set(self.order.read().len() as f64);
    }

    /// 池中代理数量
    pub fn len(&self) -> usize {
        self.order.read().len()
    }

    /// 池是否为空
    pub fn is_empty(&self) -> bool {
        self.order.read().is_empty()
    }

    /// 租用一个代理
    ///
    /// 按照配置的策略在当前健康快照上选择。被隔离且计时器
    /// 未到期的代理、已达并发上限的代理不参与选择。
    ///
    /// # 参数
    ///
    /// * `requirements` - 选择要求（如地理区域）
    ///
    /// # 返回值
    ///
    /// * `Ok(ProxyLease)` - 成功租用的代理
    /// * `Err(ProxyError::Exhausted)` - 没有符合条件的代理
    pub fn acquire(&self, requirements: &ProxyRequirements) -> Result<ProxyLease, ProxyError> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let order = self.order.read();

        // Snapshot of eligible candidates in stable order
        let candidates: Vec<CandidateView> = order
            .iter()
            .filter_map(|id| entries.get(id))
            .filter(|entry| entry.eligible(now))
            .filter(|entry| match &requirements.region {
                Some(region) => entry.proxy.region.as_deref() == Some(region.as_str()),
                None => true,
            })
            .map(|entry| CandidateView {
                id: entry.proxy.id,
                health: entry.health,
                success_rate: entry.success_rate(),
                avg_latency: entry.avg_latency,
                region: entry.proxy.region.clone(),
            })
            .collect();

        if candidates.is_empty() {
            counter!("proxy_pool_exhausted_total").increment(1);
            return Err(ProxyError::Exhausted);
        }

        // Forced rotation drops the just-failed proxy unless it is the
        // only remaining choice
        let candidates: Vec<CandidateView> = match requirements.exclude {
            Some(excluded) if candidates.iter().any(|c| c.id != excluded) => candidates
                .into_iter()
                .filter(|c| c.id != excluded)
                .collect(),
            _ => candidates,
        };

        let index = {
            let mut rr = self.round_robin_index.lock();
            let current = *rr;
            *rr = rr.wrapping_add(1);
            current
        };

        let chosen = self
            .strategy
            .select(&candidates, index)
            .ok_or(ProxyError::Exhausted)?;

        let entry = entries
            .get_mut(&chosen)
            .ok_or(ProxyError::UnknownProxy(chosen))?;
        entry.in_flight += 1;

        Ok(ProxyLease {
            proxy: entry.proxy.clone(),
            acquired_at: now,
        })
    }

    /// 归还租约并上报结果
    ///
    /// # 参数
    ///
    /// * `lease` - 要归还的租约
    /// * `outcome` - 本次使用的结果
    pub fn release(&self, lease: ProxyLease, outcome: &LeaseOutcome) {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&lease.proxy.id) else {
            // Proxy was removed while leased
            return;
        };
        entry.in_flight = entry.in_flight.saturating_sub(1);

        match outcome {
            LeaseOutcome::Success { latency } => {
                entry.success_count += 1;
                entry.consecutive_failures = 0;

                // EWMA latency update
                let alpha = 0.1;
                let current_ns = entry.avg_latency.as_nanos() as f64;
                let sample_ns = latency.as_nanos() as f64;
                entry.avg_latency =
                    Duration::from_nanos((current_ns * (1.0 - alpha) + sample_ns * alpha) as u64);

                if entry.health != ProxyHealth::Quarantined {
                    entry.health = self.classify(entry.success_rate());
                }
            }
            LeaseOutcome::Failure { blocked } => {
                entry.failure_count += 1;
                // Blocked outcomes count double against the proxy
                entry.consecutive_failures += if *blocked { 2 } else { 1 };

                if entry.consecutive_failures >= self.config.quarantine_threshold {
                    Self::quarantine(entry, &self.config);
                } else if entry.health != ProxyHealth::Quarantined {
                    entry.health = self.classify(entry.success_rate());
                }
            }
        }
    }

    /// 根据成功率划分健康层级
    fn classify(&self, success_rate: f64) -> ProxyHealth {
        if success_rate < self.config.degraded_success_rate {
            ProxyHealth::Degraded
        } else {
            ProxyHealth::Healthy
        }
    }

    /// 隔离代理，隔离时长随累犯次数倍增并封顶
    fn quarantine(entry: &mut ProxyEntry, config: &ProxyPoolConfig) {
        entry.offenses += 1;
        let factor = 2u32.saturating_pow(entry.offenses.saturating_sub(1).min(16));
        let duration = config
            .quarantine_base
            .saturating_mul(factor)
            .min(config.quarantine_max);
        entry.health = ProxyHealth::Quarantined;
        entry.quarantine_until = Some(Instant::now() + duration);
        entry.consecutive_failures = 0;

        warn!(
            "Proxy {} quarantined for {:?} (offense #{})",
            entry.proxy.id, duration, entry.offenses
        );
        counter!("proxy_pool_quarantined_total").increment(1);
    }

    /// 隔离计时器已到期、等待探测的代理列表
    ///
    /// 供后台健康检查使用
    pub fn quarantined_due(&self) -> Vec<Proxy> {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|entry| {
                entry.health == ProxyHealth::Quarantined && !entry.quarantine_active(now)
            })
            .map(|entry| entry.proxy.clone())
            .collect()
    }

    /// 探测成功后恢复代理
    pub fn restore(&self, id: Uuid) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&id) {
            entry.health = ProxyHealth::Healthy;
            entry.quarantine_until = None;
            entry.consecutive_failures = 0;
            info!("Proxy {} restored to healthy after probe", id);
            counter!("proxy_pool_restored_total").increment(1);
        }
    }

    /// 探测失败后延长隔离（按新一次累犯计算时长）
    pub fn extend_quarantine(&self, id: Uuid) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&id) {
            Self::quarantine(entry, &self.config);
        }
    }

    /// 查询代理当前健康状态（测试与观测用）
    pub fn health_of(&self, id: Uuid) -> Option<ProxyHealth> {
        self.entries.read().get(&id).map(|entry| entry.health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::proxy::ProxyProtocol;

    fn pool_with(count: usize, strategy: SelectionStrategy) -> (ProxyPool, Vec<Uuid>) {
        let pool = ProxyPool::new(strategy, ProxyPoolConfig::default());
        let mut ids = Vec::new();
        for i in 0..count {
            let proxy = Proxy::new(format!("10.0.0.{}", i + 1), 8080, ProxyProtocol::Http);
            ids.push(proxy.id);
            pool.add(proxy);
        }
        (pool, ids)
    }

    #[test]
    fn test_empty_pool_is_exhausted() {
        let pool = ProxyPool::new(SelectionStrategy::RoundRobin, ProxyPoolConfig::default());
        assert!(matches!(
            pool.acquire(&ProxyRequirements::default()),
            Err(ProxyError::Exhausted)
        ));
    }

    #[test]
    fn test_round_robin_cycles_in_order() {
        let (pool, ids) = pool_with(3, SelectionStrategy::RoundRobin);
        let mut seen = Vec::new();
        for _ in 0..3 {
            let lease = pool.acquire(&ProxyRequirements::default()).unwrap();
            seen.push(lease.proxy.id);
            pool.release(
                lease,
                &LeaseOutcome::Success {
                    latency: Duration::from_millis(100),
                },
            );
        }
        assert_eq!(seen, ids);
    }

    #[test]
    fn test_quarantined_proxy_excluded_until_expiry() {
        let config = ProxyPoolConfig {
            quarantine_threshold: 3,
            quarantine_base: Duration::from_secs(60),
            ..ProxyPoolConfig::default()
        };
        let pool = ProxyPool::new(SelectionStrategy::RoundRobin, config);
        let proxy = Proxy::new("10.0.0.1", 8080, ProxyProtocol::Http);
        let id = proxy.id;
        pool.add(proxy);

        // Cross the consecutive-failure threshold
        for _ in 0..3 {
            let lease = pool.acquire(&ProxyRequirements::default()).unwrap();
            pool.release(lease, &LeaseOutcome::Failure { blocked: false });
        }
        assert_eq!(pool.health_of(id), Some(ProxyHealth::Quarantined));

        // acquire never returns a quarantined proxy before expiry
        assert!(matches!(
            pool.acquire(&ProxyRequirements::default()),
            Err(ProxyError::Exhausted)
        ));
    }

    #[test]
    fn test_blocked_outcomes_count_double() {
        let config = ProxyPoolConfig {
            quarantine_threshold: 4,
            ..ProxyPoolConfig::default()
        };
        let pool = ProxyPool::new(SelectionStrategy::RoundRobin, config);
        let proxy = Proxy::new("10.0.0.1", 8080, ProxyProtocol::Http);
        let id = proxy.id;
        pool.add(proxy);

        for _ in 0..2 {
            let lease = pool.acquire(&ProxyRequirements::default()).unwrap();
            pool.release(lease, &LeaseOutcome::Failure { blocked: true });
        }
        assert_eq!(pool.health_of(id), Some(ProxyHealth::Quarantined));
    }

    #[test]
    fn test_restore_after_probe() {
        let config = ProxyPoolConfig {
            quarantine_threshold: 1,
            ..ProxyPoolConfig::default()
        };
        let pool = ProxyPool::new(SelectionStrategy::RoundRobin, config);
        let proxy = Proxy::new("10.0.0.1", 8080, ProxyProtocol::Http);
        let id = proxy.id;
        pool.add(proxy);

        let lease = pool.acquire(&ProxyRequirements::default()).unwrap();
        pool.release(lease, &LeaseOutcome::Failure { blocked: false });
        assert_eq!(pool.health_of(id), Some(ProxyHealth::Quarantined));

        pool.restore(id);
        assert_eq!(pool.health_of(id), Some(ProxyHealth::Healthy));
        assert!(pool.acquire(&ProxyRequirements::default()).is_ok());
    }

    #[test]
    fn test_per_proxy_concurrency_cap() {
        let pool = ProxyPool::new(SelectionStrategy::RoundRobin, ProxyPoolConfig::default());
        let mut proxy = Proxy::new("10.0.0.1", 8080, ProxyProtocol::Http);
        proxy.max_concurrency = 2;
        pool.add(proxy);

        let first = pool.acquire(&ProxyRequirements::default()).unwrap();
        let _second = pool.acquire(&ProxyRequirements::default()).unwrap();
        // Cap reached, third lease must fail
        assert!(matches!(
            pool.acquire(&ProxyRequirements::default()),
            Err(ProxyError::Exhausted)
        ));

        pool.release(
            first,
            &LeaseOutcome::Success {
                latency: Duration::from_millis(50),
            },
        );
        assert!(pool.acquire(&ProxyRequirements::default()).is_ok());
    }

    #[test]
    fn test_region_requirement_filters() {
        let pool = ProxyPool::new(SelectionStrategy::RoundRobin, ProxyPoolConfig::default());
        let eu = Proxy::new("10.0.0.1", 8080, ProxyProtocol::Http).with_region("eu-west");
        let us = Proxy::new("10.0.0.2", 8080, ProxyProtocol::Http).with_region("us-east");
        let eu_id = eu.id;
        pool.add(eu);
        pool.add(us);

        let requirements = ProxyRequirements {
            region: Some("eu-west".to_string()),
            exclude: None,
        };
        for _ in 0..3 {
            let lease = pool.acquire(&requirements).unwrap();
            assert_eq!(lease.proxy.id, eu_id);
            pool.release(
                lease,
                &LeaseOutcome::Success {
                    latency: Duration::from_millis(50),
                },
            );
        }
    }

    #[test]
    fn test_exclusion_overrides_health_score() {
        let pool = ProxyPool::new(
            SelectionStrategy::HealthBased {
                min_success_rate: 0.0,
            },
            ProxyPoolConfig::default(),
        );
        let strong = Proxy::new("10.0.0.1", 8080, ProxyProtocol::Http);
        let weak = Proxy::new("10.0.0.2", 8080, ProxyProtocol::Http);
        let strong_id = strong.id;
        let weak_id = weak.id;
        pool.add(strong);
        pool.add(weak);

        // Build up a score gap: 9 successes for one, 9 slow ones for the other
        for _ in 0..9 {
            let requirements = ProxyRequirements {
                exclude: Some(weak_id),
                ..ProxyRequirements::default()
            };
            let lease = pool.acquire(&requirements).unwrap();
            assert_eq!(lease.proxy.id, strong_id);
            pool.release(
                lease,
                &LeaseOutcome::Success {
                    latency: Duration::from_millis(10),
                },
            );
        }

        // One fresh failure does not dent the strong proxy's score, yet a
        // rotation request must still steer the next lease away from it
        let lease = pool.acquire(&ProxyRequirements::default()).unwrap();
        assert_eq!(lease.proxy.id, strong_id);
        pool.release(lease, &LeaseOutcome::Failure { blocked: true });

        let rotated = ProxyRequirements {
            exclude: Some(strong_id),
            ..ProxyRequirements::default()
        };
        let lease = pool.acquire(&rotated).unwrap();
        assert_eq!(lease.proxy.id, weak_id);
    }

    #[test]
    fn test_exclusion_ignored_for_sole_candidate() {
        let (pool, ids) = pool_with(1, SelectionStrategy::RoundRobin);

        let requirements = ProxyRequirements {
            exclude: Some(ids[0]),
            ..ProxyRequirements::default()
        };
        let lease = pool.acquire(&requirements).unwrap();
        assert_eq!(lease.proxy.id, ids[0]);
    }

    #[test]
    fn test_repeat_offender_duration_grows() {
        let config = ProxyPoolConfig {
            quarantine_threshold: 1,
            quarantine_base: Duration::from_secs(10),
            quarantine_max: Duration::from_secs(60),
            ..ProxyPoolConfig::default()
        };
        let pool = ProxyPool::new(SelectionStrategy::RoundRobin, config);
        let proxy = Proxy::new("10.0.0.1", 8080, ProxyProtocol::Http);
        let id = proxy.id;
        pool.add(proxy);

        let lease = pool.acquire(&ProxyRequirements::default()).unwrap();
        pool.release(lease, &LeaseOutcome::Failure { blocked: false });

        // Second and third offenses extend the quarantine, capped at max
        pool.extend_quarantine(id);
        pool.extend_quarantine(id);

        let entries = pool.entries.read();
        let entry = entries.get(&id).unwrap();
        assert_eq!(entry.offenses, 3);
        let remaining = entry.quarantine_until.unwrap() - Instant::now();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(30));
    }
}
