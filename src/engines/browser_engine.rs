// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::{detect_block, FetchError, FetchRequest, FetchResult, FetchStrategy};
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

// Global browser instance to avoid re-launching Chrome on every request.
// This significantly improves performance for browser-based scraping.
static BROWSER_INSTANCE: OnceCell<Browser> = OnceCell::const_new();

// Asynchronously gets or initializes the shared browser instance.
// This function ensures that the browser is launched only once.
async fn get_browser(proxy_url: Option<&str>) -> Result<&'static Browser, FetchError> {
    BROWSER_INSTANCE
        .get_or_try_init(|| async {
            let remote_debugging_url = std::env::var("CHROMIUM_REMOTE_DEBUGGING_URL").ok();

            let (browser, mut handler) = if let Some(ref url) = remote_debugging_url {
                tracing::info!("Connecting to remote Chrome instance at: {}", url);
                Browser::connect(url).await.map_err(|e| {
                    FetchError::Browser(format!("Failed to connect to remote Chrome: {}", e))
                })?
            } else {
                let mut builder = BrowserConfig::builder()
                    .no_sandbox()
                    .request_timeout(Duration::from_secs(30));

                builder = builder.arg("--disable-gpu").arg("--disable-dev-shm-usage");

                // The shared instance is launched once; the proxy of the first
                // request that reaches the browser strategy is applied at launch
                if let Some(proxy) = proxy_url {
                    builder = builder.arg(format!("--proxy-server={}", proxy));
                }

                Browser::launch(
                    builder
                        .build()
                        .map_err(|e| FetchError::Browser(e.to_string()))?,
                )
                .await
                .map_err(|e| FetchError::Browser(e.to_string()))?
            };

            // Spawn a handler to process browser events
            tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if h.is_err() {
                        break;
                    }
                }
            });

            Ok(browser)
        })
        .await
}

/// 无头浏览器抓取策略
///
/// 基于chromiumoxide实现，用于脚本渲染的页面。
/// 浏览器实例全局共享，首次请求时启动。
pub struct BrowserStrategy;

#[async_trait]
impl FetchStrategy for BrowserStrategy {
    /// 执行浏览器渲染抓取
    ///
    /// # 参数
    ///
    /// * `request` - 抓取请求
    ///
    /// # 返回值
    ///
    /// * `Ok(FetchResult)` - 渲染后的页面内容
    /// * `Err(FetchError)` - 抓取过程中出现的错误
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        let start = Instant::now();
        let proxy_url = request.proxy.as_ref().map(|p| p.url());

        // Wrap the entire operation in a timeout
        let body = tokio::time::timeout(request.timeout, async {
            let browser = get_browser(proxy_url.as_deref()).await?;

            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| FetchError::Browser(e.to_string()))?;

            // goto waits for the load event by default
            page.goto(&request.url)
                .await
                .map_err(|e| FetchError::Browser(e.to_string()))?;

            let content = page
                .content()
                .await
                .map_err(|e| FetchError::Browser(e.to_string()))?;

            let _ = page.close().await;
            Ok::<String, FetchError>(content)
        })
        .await
        .map_err(|_| FetchError::Timeout(request.timeout))??;

        // chromiumoxide's goto does not expose the HTTP status; challenge
        // pages are still recognizable from the rendered body
        if let Some(reason) = detect_block(200, &body) {
            return Err(FetchError::Blocked {
                status: 200,
                reason,
            });
        }

        Ok(FetchResult {
            status_code: 200,
            body,
            elapsed: start.elapsed(),
            proxy_id: request.proxy.as_ref().map(|p| p.id),
            strategy: self.name(),
        })
    }

    /// 获取策略名称
    fn name(&self) -> &'static str {
        "browser"
    }
}
