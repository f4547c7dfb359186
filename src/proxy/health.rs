// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::settings::ProxySettings;
use crate::engines::traits::{FetchRequest, FetchStrategy};
use crate::proxy::pool::ProxyPool;

/// 健康检查配置
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// 检查间隔
    pub check_interval: Duration,
    /// 探测超时时间
    pub timeout: Duration,
    /// 探测目标URL
    pub target_url: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
            target_url: "https://www.google.com/generate_204".to_string(),
        }
    }
}

impl From<&ProxySettings> for HealthCheckConfig {
    fn from(settings: &ProxySettings) -> Self {
        Self {
            check_interval: Duration::from_secs(settings.health_check_interval_secs),
            timeout: Duration::from_secs(10),
            target_url: settings.health_check_url.clone(),
        }
    }
}

/// 代理健康检查器
///
/// 后台周期任务：对隔离计时器已到期的代理发起轻量探测，
/// 探测成功恢复为健康，失败则按累犯延长隔离
pub struct ProxyHealthChecker {
    /// 代理池
    pool: Arc<ProxyPool>,
    /// 探测用的抓取策略
    strategy: Arc<dyn FetchStrategy>,
    /// 配置
    config: HealthCheckConfig,
}

impl ProxyHealthChecker {
    /// 创建新的健康检查器
    pub fn new(
        pool: Arc<ProxyPool>,
        strategy: Arc<dyn FetchStrategy>,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            pool,
            strategy,
            config,
        }
    }

    /// 启动后台检查任务
    ///
    /// # 返回值
    ///
    /// 返回后台任务的句柄
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.check_interval);
            loop {
                ticker.tick().await;
                self.probe_due_proxies().await;
            }
        })
    }

    /// 探测所有到期的隔离代理
    pub async fn probe_due_proxies(&self) {
        let due = self.pool.quarantined_due();
        if due.is_empty() {
            debug!("Health check tick: no quarantined proxies due");
            return;
        }

        info!("Probing {} quarantined proxies", due.len());
        for proxy in due {
            let id = proxy.id;
            let request = FetchRequest::new(self.config.target_url.clone())
                .with_proxy(proxy)
                .with_timeout(self.config.timeout);

            match self.strategy.fetch(&request).await {
                Ok(_) => self.pool.restore(id),
                Err(e) => {
                    warn!("Probe for proxy {} failed: {}", id, e);
                    self.pool.extend_quarantine(id);
                }
            }
        }
    }
}
