// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

use crate::engines::traits::FetchError;

/// 重试决策
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// 等待给定时长后重试
    RetryAfter {
        /// 退避时长
        delay: Duration,
        /// 下次尝试前是否强制更换代理
        rotate_proxy: bool,
    },
    /// 放弃
    GiveUp,
}

/// 重试策略配置
///
/// 指数退避加抖动，避免共享同一代理的并发任务
/// 在同一时刻扎堆重试
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 初始退避时间
    pub initial_backoff: Duration,
    /// 最大退避时间
    pub max_backoff: Duration,
    /// 退避乘数
    pub backoff_multiplier: f64,
    /// 抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
    /// 是否启用抖动
    pub enable_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            enable_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// 创建标准重试策略
    pub fn standard() -> Self {
        Self::default()
    }

    /// 以指定最大重试次数创建策略
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// 计算下次重试的退避时间
    ///
    /// # 参数
    ///
    /// * `attempt` - 当前尝试序号（从1开始）
    ///
    /// # 返回值
    ///
    /// 退避时长，含抖动
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        // 计算指数退避
        let backoff_secs = self.initial_backoff.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        // 限制最大退避时间
        let capped_backoff = backoff_secs.min(self.max_backoff.as_secs_f64());

        // 添加抖动
        let final_backoff = if self.enable_jitter && self.jitter_factor > 0.0 {
            let jitter_range = capped_backoff * self.jitter_factor;
            let jitter = rand::random_range(-jitter_range..jitter_range);
            (capped_backoff + jitter).max(0.0)
        } else {
            capped_backoff
        };

        Duration::from_secs_f64(final_backoff)
    }

    /// 根据错误分类与尝试次数给出重试决策
    ///
    /// Blocked与Connection错误在下次尝试前强制更换代理；
    /// 不可重试的错误（如响应解析问题）立即放弃，
    /// 它们属于提取层而非重试层的职责
    ///
    /// # 参数
    ///
    /// * `attempt` - 已完成的尝试次数
    /// * `error` - 本次失败的错误
    ///
    /// # 返回值
    ///
    /// * `RetryDecision::RetryAfter` - 按退避等待后重试
    /// * `RetryDecision::GiveUp` - 放弃，由上层记为页级失败
    pub fn decide(&self, attempt: u32, error: &FetchError) -> RetryDecision {
        if attempt >= self.max_retries || !error.is_retryable() {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter {
            delay: self.calculate_backoff(attempt),
            rotate_proxy: error.forces_rotation(),
        }
    }
}
