// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 分页控制
//!
//! 在每个页面处理完成后决定下一步：继续抓取下一页，或以
//! 明确的原因停止。停止判定顺序固定：页数上限、无下一页、
//! 环路检测。

use std::num::NonZeroUsize;

use lru::LruCache;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::domain::models::template::{PaginationRule, SelectorKind, SelectorSpec};
use crate::extraction::xpath::xpath_to_css;

/// 已访问URL缓存容量，超出后最久未访问的条目被逐出
const VISITED_CAPACITY: usize = 1024;

/// 停止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 达到页数上限
    MaxPages,
    /// 找不到下一页
    NoNextPage,
    /// 下一页URL已访问过（环路）
    Cycle,
}

/// 分页决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageDecision {
    /// 继续抓取给定URL
    Next(Url),
    /// 正常停止
    Stop(StopReason),
}

/// 分页控制器
///
/// 每个任务一个实例，跟踪已访问URL与已抓页数。
/// 无分页规则的模板天然单页。
pub struct PaginationController {
    rule: Option<PaginationRule>,
    max_pages: u32,
    visited: LruCache<String, ()>,
}

impl PaginationController {
    /// # 参数
    ///
    /// * `rule` - 模板的分页规则，None表示单页
    /// * `job_max_pages` - 任务配置的页数上限
    ///
    /// 规则自带的max_pages（非0时）与任务上限取较小者
    pub fn new(rule: Option<PaginationRule>, job_max_pages: u32) -> Self {
        let max_pages = match &rule {
            Some(r) if r.max_pages > 0 => r.max_pages.min(job_max_pages),
            _ => job_max_pages,
        };
        Self {
            rule,
            max_pages,
            visited: LruCache::new(
                NonZeroUsize::new(VISITED_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ),
        }
    }

    /// 标记起始URL为已访问
    pub fn start(&mut self, url: &Url) {
        self.visited.put(normalize(url), ());
    }

    /// 决定下一步
    ///
    /// # 参数
    ///
    /// * `page_index` - 刚处理完的页面序号（从1开始）
    /// * `current_url` - 该页面的URL，相对链接的解析基准
    /// * `body` - 该页面的HTML
    ///
    /// # 返回值
    ///
    /// * `PageDecision::Next` - 继续抓取下一页
    /// * `PageDecision::Stop` - 按固定顺序判定的停止原因
    pub fn next(&mut self, page_index: u32, current_url: &Url, body: &str) -> PageDecision {
        if page_index >= self.max_pages {
            debug!(page_index, max_pages = self.max_pages, "Page limit reached");
            return PageDecision::Stop(StopReason::MaxPages);
        }

        let Some(rule) = &self.rule else {
            return PageDecision::Stop(StopReason::NoNextPage);
        };

        let candidate = if let Some(spec) = &rule.next_selector {
            find_next_link(spec, body)
        } else {
            rule.url_pattern
                .as_ref()
                .map(|pattern| pattern.replace("{page}", &(page_index + 1).to_string()))
        };

        let Some(candidate) = candidate else {
            return PageDecision::Stop(StopReason::NoNextPage);
        };

        let Ok(next_url) = current_url.join(&candidate) else {
            debug!(candidate = %candidate, "Next page link does not parse as a url");
            return PageDecision::Stop(StopReason::NoNextPage);
        };

        let key = normalize(&next_url);
        if self.visited.contains(&key) {
            debug!(url = %next_url, "Next page already visited, stopping");
            return PageDecision::Stop(StopReason::Cycle);
        }
        self.visited.put(key, ());
        PageDecision::Next(next_url)
    }
}

/// 从页面中找下一页链接
///
/// 选择器未命中或无法解析都视为无下一页
fn find_next_link(spec: &SelectorSpec, body: &str) -> Option<String> {
    let (css, attr_override) = match spec.kind {
        SelectorKind::Css => (spec.expr.clone(), None),
        SelectorKind::XPath => xpath_to_css(&spec.expr)?,
    };
    let selector = Selector::parse(&css).ok()?;
    let attr = attr_override.as_deref().unwrap_or("href");

    let document = Html::parse_document(body);
    let element = document.select(&selector).next()?;
    let value = element.value().attr(attr)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// URL归一化：去掉fragment，统一用于环路判定
fn normalize(url: &Url) -> String {
    let mut u = url.clone();
    u.set_fragment(None);
    u.to_string()
}
