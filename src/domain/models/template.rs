// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::extraction::postprocess::PostProcessOp;

/// 抓取模板
///
/// 可复用、带版本号的提取定义：字段选择器（含回退链）、
/// 校验规则、后处理流水线、分页规则以及抓取策略绑定。
/// 模板在任务执行期间不可变；使用统计在任务完成后单独更新，
/// 属于弱一致计数，不参与任务状态。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// 模板唯一标识符
    pub id: Uuid,
    /// 模板名称
    pub name: String,
    /// 模板版本号
    pub version: u32,
    /// 字段提取规则，声明顺序即输出顺序
    pub fields: Vec<FieldRule>,
    /// 分页规则，None表示单页模板
    pub pagination: Option<PaginationRule>,
    /// 绑定的抓取策略
    #[serde(default)]
    pub strategy: StrategyKind,
    /// 是否允许运行时按历史成功率重排选择器
    #[serde(default)]
    pub adaptive_selectors: bool,
    /// 使用统计
    #[serde(default)]
    pub stats: TemplateStats,
}

/// 字段提取规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    /// 字段名称
    pub name: String,
    /// 回退选择器链，按声明顺序依次尝试
    pub selectors: Vec<SelectorSpec>,
    /// 提取的属性名，None表示提取文本内容
    #[serde(default)]
    pub attr: Option<String>,
    /// 是否提取全部匹配元素为数组
    #[serde(default)]
    pub is_array: bool,
    /// 是否为必填字段
    #[serde(default)]
    pub required: bool,
    /// 字段值类型约束
    #[serde(default)]
    pub value_type: ValueType,
    /// 后处理流水线，按声明顺序链式执行
    #[serde(default)]
    pub post_process: Vec<PostProcessOp>,
}

/// 选择器表达式及其方言
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSpec {
    /// 选择器表达式
    pub expr: String,
    /// 选择器方言
    #[serde(default)]
    pub kind: SelectorKind,
}

impl SelectorSpec {
    /// 创建CSS选择器
    pub fn css(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            kind: SelectorKind::Css,
        }
    }

    /// 创建XPath选择器
    pub fn xpath(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            kind: SelectorKind::XPath,
        }
    }
}

/// 选择器方言枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    /// CSS选择器
    #[default]
    Css,
    /// XPath选择器，执行前翻译为等价CSS子集
    XPath,
}

/// 字段值类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// 文本
    #[default]
    Text,
    /// 数值
    Number,
    /// URL
    Url,
}

/// 分页规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationRule {
    /// 下一页链接选择器
    #[serde(default)]
    pub next_selector: Option<SelectorSpec>,
    /// URL模板，`{page}`占位符替换为页码（与next_selector二选一）
    #[serde(default)]
    pub url_pattern: Option<String>,
    /// 最大页数，0表示使用任务配置的上限
    #[serde(default)]
    pub max_pages: u32,
}

/// 抓取策略种类
///
/// 策略绑定是模板配置值，编排器对具体实现保持无感知
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// 轻量HTTP抓取
    #[default]
    Http,
    /// 隐身抓取（随机请求头与人类化时序）
    Stealth,
    /// 无头浏览器抓取（脚本渲染页面）
    Browser,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StrategyKind::Http => write!(f, "http"),
            StrategyKind::Stealth => write!(f, "stealth"),
            StrategyKind::Browser => write!(f, "browser"),
        }
    }
}

/// 模板使用统计
///
/// 每次任务完成后更新的弱一致计数
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TemplateStats {
    /// 使用次数
    pub usage_count: u64,
    /// 累计页面提取成功率 (0.0 - 1.0)
    pub success_rate: f64,
}

impl TemplateStats {
    /// 合并一次任务的成功率观测
    ///
    /// 使用累计平均，usage_count同时递增
    pub fn record(&mut self, success_rate: f64) {
        let n = self.usage_count as f64;
        self.success_rate = (self.success_rate * n + success_rate) / (n + 1.0);
        self.usage_count += 1;
    }
}

impl Template {
    /// 创建一个新的模板
    pub fn new(name: impl Into<String>, fields: Vec<FieldRule>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            version: 1,
            fields,
            pagination: None,
            strategy: StrategyKind::Http,
            adaptive_selectors: false,
            stats: TemplateStats::default(),
        }
    }

    /// 模板声明的字段总数
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// 校验模板的基本约束
    ///
    /// # 返回值
    ///
    /// * `Ok(())` - 模板有效
    /// * `Err(String)` - 校验失败的原因
    pub fn validate(&self) -> Result<(), String> {
        if self.fields.is_empty() {
            return Err("template declares no fields".to_string());
        }
        for field in &self.fields {
            if field.name.is_empty() {
                return Err("field with empty name".to_string());
            }
            if field.selectors.is_empty() {
                return Err(format!("field '{}' has no selectors", field.name));
            }
        }
        if let Some(p) = &self.pagination {
            if p.next_selector.is_none() && p.url_pattern.is_none() {
                return Err("pagination rule needs a next selector or a url pattern".to_string());
            }
        }
        Ok(())
    }
}
