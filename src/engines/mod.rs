// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

#[cfg(feature = "browser")]
pub mod browser_engine;
pub mod http_engine;
pub mod stealth_engine;
pub mod traits;

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::models::template::StrategyKind;
use traits::FetchStrategy;

/// 构建策略种类到具体实现的绑定表
///
/// 编排器按模板配置的策略种类查表，对具体实现保持无感知。
/// 浏览器策略仅在启用`browser`特性时注册，绑定了它的模板
/// 在未启用的构建中会以任务启动错误失败
pub fn default_strategies() -> HashMap<StrategyKind, Arc<dyn FetchStrategy>> {
    let mut map: HashMap<StrategyKind, Arc<dyn FetchStrategy>> = HashMap::new();
    map.insert(StrategyKind::Http, Arc::new(http_engine::HttpStrategy));
    map.insert(
        StrategyKind::Stealth,
        Arc::new(stealth_engine::StealthStrategy::default()),
    );
    #[cfg(feature = "browser")]
    map.insert(
        StrategyKind::Browser,
        Arc::new(browser_engine::BrowserStrategy),
    );
    map
}
