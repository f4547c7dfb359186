// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::{FetchError, FetchRequest, FetchResult, FetchStrategy};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::engines::http_engine::HttpStrategy;

/// 桌面浏览器User-Agent池
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.8",
    "en-US,en;q=0.9,de;q=0.7",
    "en-US,en;q=0.8,fr;q=0.6",
];

/// 隐身抓取策略
///
/// 在基本HTTP抓取之上叠加随机化请求头（User-Agent、
/// Accept-Language、Referer）与请求前的人类化时序抖动，
/// 降低被目标站点指纹识别的概率
pub struct StealthStrategy {
    /// 请求前抖动下限（毫秒）
    pub jitter_min_ms: u64,
    /// 请求前抖动上限（毫秒）
    pub jitter_max_ms: u64,
}

impl Default for StealthStrategy {
    fn default() -> Self {
        Self {
            jitter_min_ms: 50,
            jitter_max_ms: 400,
        }
    }
}

impl StealthStrategy {
    /// 随机挑选一个User-Agent
    pub(crate) fn pick_user_agent() -> &'static str {
        let idx = rand::rng().random_range(0..USER_AGENTS.len());
        USER_AGENTS[idx]
    }

    /// 生成本次请求的随机化浏览器头
    pub(crate) fn stealth_headers(url: &str) -> HeaderMap {
        let mut rng = rand::rng();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        let lang = ACCEPT_LANGUAGES[rng.random_range(0..ACCEPT_LANGUAGES.len())];
        if let Ok(v) = HeaderValue::from_str(lang) {
            headers.insert(ACCEPT_LANGUAGE, v);
        }
        // Occasionally claim arrival from a search engine
        if rng.random_bool(0.5) {
            if let Ok(v) = HeaderValue::from_str("https://www.google.com/") {
                headers.insert(REFERER, v);
            }
        } else if let Ok(v) = HeaderValue::from_str(url) {
            headers.insert(REFERER, v);
        }
        headers
    }
}

#[async_trait]
impl FetchStrategy for StealthStrategy {
    /// 执行隐身抓取
    ///
    /// # 参数
    ///
    /// * `request` - 抓取请求
    ///
    /// # 返回值
    ///
    /// * `Ok(FetchResult)` - 抓取结果
    /// * `Err(FetchError)` - 抓取过程中出现的错误
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        // Human-like jitter before the request
        if self.jitter_max_ms > self.jitter_min_ms {
            let jitter = rand::rng().random_range(self.jitter_min_ms..self.jitter_max_ms);
            debug!("stealth jitter {}ms before {}", jitter, request.url);
            sleep(Duration::from_millis(jitter)).await;
        }

        let user_agent = Self::pick_user_agent();

        // Each request gets a fresh client for cookie isolation
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(request.timeout)
            .cookie_store(true);

        if let Some(proxy) = &request.proxy {
            let proxy = reqwest::Proxy::all(proxy.url())
                .map_err(|e| FetchError::InvalidProxy(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::Other(e.to_string()))?;

        let mut headers = Self::stealth_headers(&request.url);
        // Caller-supplied headers take precedence over generated ones
        for (k, v) in HttpStrategy::build_headers(request) {
            if let Some(k) = k {
                headers.insert(k, v);
            }
        }

        HttpStrategy::execute(request, client, headers, self.name()).await
    }

    /// 获取策略名称
    fn name(&self) -> &'static str {
        "stealth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_user_agent_pool() {
        // Drawn from the pool, and the pool is actually used
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let ua = StealthStrategy::pick_user_agent();
            assert!(USER_AGENTS.contains(&ua));
            seen.insert(ua);
        }
        assert!(seen.len() > 1, "user agent should rotate");
    }

    #[test]
    fn test_stealth_headers_present() {
        let headers = StealthStrategy::stealth_headers("https://example.com/list");
        assert!(headers.contains_key(ACCEPT));
        assert!(headers.contains_key(ACCEPT_LANGUAGE));
        assert!(headers.contains_key(REFERER));
    }

    #[tokio::test]
    async fn test_jitter_stays_within_bound() {
        let strategy = StealthStrategy {
            jitter_min_ms: 1,
            jitter_max_ms: 20,
        };
        let start = std::time::Instant::now();
        // Connection to a closed port fails fast after jitter
        let request = crate::engines::traits::FetchRequest::new("http://127.0.0.1:1")
            .with_timeout(Duration::from_secs(2));
        let _ = strategy.fetch(&request).await;
        assert!(start.elapsed() >= Duration::from_millis(1));
    }
}
