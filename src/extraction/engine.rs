// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::domain::models::template::{FieldRule, SelectorKind, Template, ValueType};
use crate::extraction::postprocess::{run_pipeline, PostProcessOp};
use crate::extraction::xpath::xpath_to_css;

/// 单个页面的错误列表上限，避免大页面刷屏
const MAX_RECORDED_ERRORS: usize = 5;

/// 单字段提取结果
#[derive(Debug, Clone)]
pub struct FieldOutcome {
    /// 字段名
    pub name: String,
    /// 提取值（数组字段为 JSON 数组，缺失为 Null）
    pub value: Value,
    /// 是否有选择器命中
    pub found: bool,
    /// 命中且通过后处理与类型校验
    pub valid: bool,
    /// 命中的选择器在回退链中的序号
    pub winning_selector: Option<usize>,
    /// 本次实际尝试的选择器数量
    pub attempted: usize,
}

/// 页面提取结果
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    /// 各字段结果，顺序与模板声明一致
    pub fields: Vec<FieldOutcome>,
    /// 有效字段占比 (0.0-1.0)
    pub success_rate: f64,
    /// 截断后的错误描述
    pub errors: Vec<String>,
}

impl ExtractionResult {
    /// 是否所有必填字段都有效
    pub fn required_ok(&self, template: &Template) -> bool {
        template
            .fields
            .iter()
            .zip(self.fields.iter())
            .all(|(rule, outcome)| !rule.required || outcome.valid)
    }

    /// 以字段名为键导出条目
    pub fn to_item(&self) -> serde_json::Map<String, Value> {
        self.fields
            .iter()
            .filter(|f| f.valid)
            .map(|f| (f.name.clone(), f.value.clone()))
            .collect()
    }
}

/// 模板驱动的提取引擎
///
/// 对每个字段按回退链顺序尝试选择器，第一个命中至少一个
/// 元素的选择器胜出；后续选择器不再尝试。无效的选择器
/// 表达式跳过而不中断整条链。
#[derive(Debug, Default)]
pub struct ExtractionEngine;

impl ExtractionEngine {
    pub fn new() -> Self {
        Self
    }

    /// 对单个页面执行模板提取
    ///
    /// # 参数
    ///
    /// * `template` - 字段规则（选择器顺序可能已被自适应统计重排）
    /// * `body` - 页面 HTML
    /// * `base_url` - 相对 URL 解析基准
    ///
    /// # 返回值
    ///
    /// 每个字段一个结果；页面级失败不存在，最差情况是
    /// 所有字段 found=false
    pub fn extract(&self, template: &Template, body: &str, base_url: &Url) -> ExtractionResult {
        let document = Html::parse_document(body);
        let mut fields = Vec::with_capacity(template.fields.len());
        let mut errors = Vec::new();

        for rule in &template.fields {
            let outcome = self.extract_field(&document, rule, base_url, &mut errors);
            if !outcome.valid && rule.required && errors.len() < MAX_RECORDED_ERRORS {
                errors.push(format!("Required field '{}' missing or invalid", rule.name));
            }
            fields.push(outcome);
        }

        let valid = fields.iter().filter(|f| f.valid).count();
        let success_rate = if fields.is_empty() {
            0.0
        } else {
            valid as f64 / fields.len() as f64
        };

        ExtractionResult {
            fields,
            success_rate,
            errors,
        }
    }

    /// 提取单个字段，按回退链顺序尝试
    fn extract_field(
        &self,
        document: &Html,
        rule: &FieldRule,
        base_url: &Url,
        errors: &mut Vec<String>,
    ) -> FieldOutcome {
        let mut attempted = 0;

        for (index, spec) in rule.selectors.iter().enumerate() {
            attempted = index + 1;

            // Normalize to a CSS selector; untranslatable xpath is skipped
            let (css, attr_override) = match spec.kind {
                SelectorKind::Css => (spec.expr.clone(), None),
                SelectorKind::XPath => match xpath_to_css(&spec.expr) {
                    Some(pair) => pair,
                    None => {
                        debug!(expr = %spec.expr, "Skipping untranslatable xpath selector");
                        continue;
                    }
                },
            };

            let selector = match Selector::parse(&css) {
                Ok(s) => s,
                Err(_) => {
                    debug!(expr = %css, "Skipping invalid selector");
                    continue;
                }
            };

            let elements: Vec<ElementRef> = document.select(&selector).collect();
            if elements.is_empty() {
                continue;
            }

            let attr = attr_override.as_deref().or(rule.attr.as_deref());
            let raw = if rule.is_array {
                Value::Array(
                    elements
                        .iter()
                        .map(|el| Value::String(element_value(el, attr)))
                        .collect(),
                )
            } else {
                Value::String(element_value(&elements[0], attr))
            };

            let (value, valid) = finalize_value(raw, rule, base_url, errors);
            return FieldOutcome {
                name: rule.name.clone(),
                value,
                found: true,
                valid,
                winning_selector: Some(index),
                attempted,
            };
        }

        FieldOutcome {
            name: rule.name.clone(),
            value: Value::Null,
            found: false,
            valid: false,
            winning_selector: None,
            attempted,
        }
    }
}

/// 取元素文本或指定属性值
fn element_value(element: &ElementRef, attr: Option<&str>) -> String {
    match attr {
        Some(name) => element.value().attr(name).unwrap_or_default().to_string(),
        None => element.text().collect::<String>().trim().to_string(),
    }
}

/// 后处理与类型校验
fn finalize_value(
    raw: Value,
    rule: &FieldRule,
    base_url: &Url,
    errors: &mut Vec<String>,
) -> (Value, bool) {
    let processed = match run_pipeline(&rule.post_process, raw) {
        Ok(v) => v,
        Err(e) => {
            if errors.len() < MAX_RECORDED_ERRORS {
                errors.push(format!("Field '{}': {}", rule.name, e));
            }
            return (Value::Null, false);
        }
    };

    match coerce_type(processed, rule.value_type, base_url) {
        Ok(v) => (v, true),
        Err(reason) => {
            if errors.len() < MAX_RECORDED_ERRORS {
                errors.push(format!("Field '{}': {}", rule.name, reason));
            }
            (Value::Null, false)
        }
    }
}

/// 按声明的值类型收尾
///
/// Number 字段容忍仍为字符串的值并做一次数值提取；
/// Url 字段以页面地址为基准解析为绝对 URL
fn coerce_type(value: Value, value_type: ValueType, base_url: &Url) -> Result<Value, String> {
    match value_type {
        ValueType::Text => Ok(value),
        ValueType::Number => match value {
            Value::Number(_) => Ok(value),
            Value::String(_) => PostProcessOp::ExtractNumber
                .apply(value)
                .map_err(|e| e.to_string()),
            Value::Array(items) => {
                let out: Result<Vec<Value>, String> = items
                    .into_iter()
                    .map(|item| coerce_type(item, ValueType::Number, base_url))
                    .collect();
                Ok(Value::Array(out?))
            }
            other => Err(format!("Expected number, got {}", other)),
        },
        ValueType::Url => match value {
            Value::String(s) => {
                let resolved = base_url
                    .join(&s)
                    .map_err(|e| format!("Invalid url '{}': {}", s, e))?;
                Ok(Value::String(resolved.to_string()))
            }
            Value::Array(items) => {
                let out: Result<Vec<Value>, String> = items
                    .into_iter()
                    .map(|item| coerce_type(item, ValueType::Url, base_url))
                    .collect();
                Ok(Value::Array(out?))
            }
            other => Err(format!("Expected url string, got {}", other)),
        },
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
