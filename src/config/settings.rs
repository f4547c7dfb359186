// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// 应用程序配置设置
///
/// 包含抓取、代理池、并发控制和自适应选择器等所有配置项
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// 抓取配置
    pub scrape: ScrapeSettings,
    /// 代理池配置
    pub proxy: ProxySettings,
    /// 并发控制配置
    pub concurrency: ConcurrencySettings,
    /// 自适应选择器配置
    pub adaptive: AdaptiveSettings,
}

/// 抓取配置设置
///
/// 新任务在启动时捕获这些默认值作为不可变快照，
/// 运行中的任务不受后续配置变更影响
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeSettings {
    /// 请求间隔下限（毫秒）
    pub delay_min_ms: u64,
    /// 请求间隔上限（毫秒）
    pub delay_max_ms: u64,
    /// 默认最大重试次数
    pub max_retries: u32,
    /// 默认请求超时时间（秒）
    pub timeout_secs: u64,
    /// 默认最大页数
    pub max_pages: u32,
}

/// 代理池配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ProxySettings {
    /// 连续失败多少次后隔离代理
    pub quarantine_threshold: u32,
    /// 首次隔离时长（秒）
    pub quarantine_base_secs: u64,
    /// 隔离时长上限（秒）
    pub quarantine_max_secs: u64,
    /// 健康检查间隔（秒）
    pub health_check_interval_secs: u64,
    /// 健康检查探测URL
    pub health_check_url: String,
    /// 成功率低于此阈值降级
    pub degraded_success_rate: f64,
    /// 池耗尽时的冷却时间（秒）
    pub exhausted_cooldown_secs: u64,
    /// 池耗尽重试上限，超过后任务失败
    pub exhausted_ceiling: u32,
}

/// 并发控制配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencySettings {
    /// 同时处于运行状态的任务数上限
    pub max_running_jobs: usize,
    /// 单个代理的默认并发上限
    pub default_proxy_limit: usize,
}

/// 自适应选择器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct AdaptiveSettings {
    /// 选择器重排序前所需的最小使用次数
    pub min_uses: u64,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 从环境变量加载配置，支持默认值
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Config::builder()
            // Default scrape settings
            .set_default("scrape.delay_min_ms", 500)?
            .set_default("scrape.delay_max_ms", 2000)?
            .set_default("scrape.max_retries", 3)?
            .set_default("scrape.timeout_secs", 30)?
            .set_default("scrape.max_pages", 50)?
            // Default proxy pool settings
            .set_default("proxy.quarantine_threshold", 5)?
            .set_default("proxy.quarantine_base_secs", 60)?
            .set_default("proxy.quarantine_max_secs", 3600)?
            .set_default("proxy.health_check_interval_secs", 60)?
            .set_default("proxy.health_check_url", "https://www.google.com/generate_204")?
            .set_default("proxy.degraded_success_rate", 0.5)?
            .set_default("proxy.exhausted_cooldown_secs", 5)?
            .set_default("proxy.exhausted_ceiling", 6)?
            // Default concurrency settings
            .set_default("concurrency.max_running_jobs", 4)?
            .set_default("concurrency.default_proxy_limit", 4)?
            // Default adaptive selector settings
            .set_default("adaptive.min_uses", 20)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("HARVESTRS").separator("__"));

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
