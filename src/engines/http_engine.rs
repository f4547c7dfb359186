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

use crate::engines::traits::{detect_block, FetchError, FetchRequest, FetchResult, FetchStrategy};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Instant;

/// 轻量HTTP抓取策略
///
/// 基于reqwest实现的基本HTTP抓取，适合静态页面
pub struct HttpStrategy;

impl HttpStrategy {
    /// 构建请求头映射
    pub(crate) fn build_headers(request: &FetchRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in &request.headers {
            if let (Ok(k), Ok(v)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                headers.insert(k, v);
            }
        }
        headers
    }

    /// 执行一次GET请求并分类响应
    pub(crate) async fn execute(
        request: &FetchRequest,
        client: reqwest::Client,
        headers: HeaderMap,
        strategy: &'static str,
    ) -> Result<FetchResult, FetchError> {
        let start = Instant::now();
        let response = client
            .get(&request.url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, request.timeout))?;

        let status_code = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(e, request.timeout))?;

        // Blocked responses count against the proxy, not the retry budget
        if let Some(reason) = detect_block(status_code, &body) {
            return Err(FetchError::Blocked {
                status: status_code,
                reason,
            });
        }

        Ok(FetchResult {
            status_code,
            body,
            elapsed: start.elapsed(),
            proxy_id: request.proxy.as_ref().map(|p| p.id),
            strategy,
        })
    }
}

#[async_trait]
impl FetchStrategy for HttpStrategy {
    /// 执行HTTP抓取
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
        // Each request gets a fresh client for cookie isolation
        let mut builder = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; harvestrs/1.0; +http://harvestrs.dev)")
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

        Self::execute(request, client, Self::build_headers(request), self.name()).await
    }

    /// 获取策略名称
    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
#[path = "http_engine_test.rs"]
mod tests;
