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

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::proxy::Proxy;

/// 抓取错误类型
///
/// Blocked与Timeout/Connection分开分类：Blocked计入代理健康
/// 惩罚（站点针对该出口封禁），而非一般重试预算
#[derive(Error, Debug)]
pub enum FetchError {
    /// 请求超时
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    /// 连接失败
    #[error("Connection failed: {0}")]
    Connection(String),
    /// 被目标站点封禁（HTTP 403/429 或正文中的验证码特征）
    #[error("Blocked by target: status {status}, {reason}")]
    Blocked { status: u16, reason: String },
    /// 代理配置无效
    #[error("Invalid proxy: {0}")]
    InvalidProxy(String),
    /// 浏览器引擎错误
    #[error("Browser error: {0}")]
    Browser(String),
    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

impl FetchError {
    /// 判断错误是否可重试
    ///
    /// # 返回值
    ///
    /// 如果错误是可重试的则返回true，否则返回false
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::Connection(_) | FetchError::Blocked { .. }
        )
    }

    /// 判断错误是否应强制更换代理后再重试
    pub fn forces_rotation(&self) -> bool {
        matches!(self, FetchError::Blocked { .. } | FetchError::Connection(_))
    }

    /// 判断错误是否计入代理健康惩罚
    pub fn penalizes_proxy(&self) -> bool {
        matches!(self, FetchError::Blocked { .. })
    }

    /// 从reqwest错误分类
    pub fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(timeout)
        } else if e.is_connect() {
            FetchError::Connection(e.to_string())
        } else {
            FetchError::Other(e.to_string())
        }
    }
}

/// 正文中的验证码/挑战页特征
const BLOCK_SIGNATURES: &[&str] = &[
    "captcha",
    "cf-challenge",
    "cf-browser-verification",
    "are you a robot",
    "unusual traffic",
    "access denied",
];

/// 根据状态码与正文判断响应是否为封禁页
///
/// # 参数
///
/// * `status_code` - HTTP状态码
/// * `body` - 响应正文
///
/// # 返回值
///
/// 命中封禁特征时返回封禁原因，否则返回None
pub fn detect_block(status_code: u16, body: &str) -> Option<String> {
    if status_code == 403 || status_code == 429 {
        return Some(format!("http status {}", status_code));
    }
    // Only scan the head of the body, challenge pages are small
    let head: String = body.chars().take(4096).collect::<String>().to_lowercase();
    BLOCK_SIGNATURES
        .iter()
        .find(|sig| head.contains(*sig))
        .map(|sig| format!("body signature '{}'", sig))
}

/// 抓取请求
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// 目标URL
    pub url: String,
    /// 使用的代理，None表示直连
    pub proxy: Option<Proxy>,
    /// 附加请求头
    pub headers: HashMap<String, String>,
    /// 超时时间
    pub timeout: Duration,
}

impl FetchRequest {
    /// 创建新的抓取请求
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            proxy: None,
            headers: HashMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// 绑定代理
    pub fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// 设置超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// 抓取结果
///
/// 短生命周期对象，由提取引擎同步消费，不做持久化
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// HTTP状态码
    pub status_code: u16,
    /// 原始文档内容
    pub body: String,
    /// 耗时
    pub elapsed: Duration,
    /// 使用的代理ID
    pub proxy_id: Option<Uuid>,
    /// 使用的抓取策略名称
    pub strategy: &'static str,
}

/// 抓取策略特质
///
/// 所有抓取实现共享的统一进出契约
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// 执行抓取
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError>;

    /// 策略名称
    fn name(&self) -> &'static str;
}
