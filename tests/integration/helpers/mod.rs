// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;

use tokio::sync::watch;
use wiremock::MockServer;

use harvestrs::config::Settings;
use harvestrs::domain::models::job::JobConfig;
use harvestrs::domain::models::template::{
    FieldRule, PaginationRule, SelectorSpec, Template, ValueType,
};
use harvestrs::domain::repositories::{InMemoryResultStorage, InMemoryTemplateStore};
use harvestrs::engines::default_strategies;
use harvestrs::extraction::adaptive::SelectorStatsStore;
use harvestrs::extraction::postprocess::PostProcessOp;
use harvestrs::proxy::{ProxyPool, ProxyPoolConfig, SelectionStrategy};
use harvestrs::workers::events::ProgressSink;
use harvestrs::workers::JobOrchestrator;

pub struct TestHarness {
    pub server: MockServer,
    pub orchestrator: Arc<JobOrchestrator>,
    pub storage: Arc<InMemoryResultStorage>,
    pub templates: Arc<InMemoryTemplateStore>,
}

/// 基于真实HTTP策略与wiremock的测试装置，代理池为空（直连）
pub async fn create_harness() -> TestHarness {
    let server = MockServer::start().await;
    let storage = Arc::new(InMemoryResultStorage::new());
    let templates = Arc::new(InMemoryTemplateStore::new());
    let settings = Settings::new().expect("default settings load");

    let orchestrator = Arc::new(JobOrchestrator::new(
        Arc::new(ProxyPool::new(
            SelectionStrategy::RoundRobin,
            ProxyPoolConfig::default(),
        )),
        default_strategies(),
        Arc::new(SelectorStatsStore::new(settings.adaptive.min_uses)),
        storage.clone(),
        templates.clone(),
        &settings,
        ProgressSink::disabled(),
    ));

    TestHarness {
        server,
        orchestrator,
        storage,
        templates,
    }
}

/// 无节流、快速失败的任务配置
pub fn fast_config(max_pages: u32) -> JobConfig {
    JobConfig {
        delay_min_ms: 0,
        delay_max_ms: 0,
        max_retries: 3,
        timeout_secs: 5,
        max_pages,
        fail_on_any_page: false,
    }
}

/// 图书列表模板：标题、价格（含数值提取）、详情链接
pub fn book_template() -> Template {
    let mut template = Template::new(
        "books",
        vec![
            FieldRule {
                name: "title".to_string(),
                selectors: vec![SelectorSpec::css("h1.title")],
                attr: None,
                is_array: false,
                required: true,
                value_type: ValueType::Text,
                post_process: vec![PostProcessOp::NormalizeText],
            },
            FieldRule {
                name: "price".to_string(),
                selectors: vec![SelectorSpec::css("p.price_color")],
                attr: None,
                is_array: false,
                required: true,
                value_type: ValueType::Number,
                post_process: vec![PostProcessOp::ExtractNumber],
            },
            FieldRule {
                name: "detail_url".to_string(),
                selectors: vec![SelectorSpec::css("a.detail")],
                attr: Some("href".to_string()),
                is_array: false,
                required: false,
                value_type: ValueType::Url,
                post_process: Vec::new(),
            },
        ],
    );
    template.pagination = Some(PaginationRule {
        next_selector: Some(SelectorSpec::css("li.next a")),
        url_pattern: None,
        max_pages: 0,
    });
    template
}

/// 渲染一个图书页面
pub fn book_page(title: &str, price: &str, next_href: Option<&str>) -> String {
    let pager = next_href
        .map(|href| format!(r#"<li class="next"><a href="{}">next</a></li>"#, href))
        .unwrap_or_default();
    format!(
        r#"<html><body>
            <h1 class="title">{}</h1>
            <p class="price_color">{}</p>
            <a class="detail" href="/catalogue/detail.html">More</a>
            <ul class="pager">{}</ul>
        </body></html>"#,
        title, price, pager
    )
}

/// 永不触发的取消信号
pub fn no_cancel() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}
