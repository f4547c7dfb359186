// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 后处理错误类型
///
/// 字段级错误：使该字段标记为无效，但不中断其余字段的提取
#[derive(Error, Debug)]
pub enum PostProcessError {
    /// 格式校验失败
    #[error("Format validation failed: value '{value}' does not match '{pattern}'")]
    FormatMismatch { value: String, pattern: String },

    /// 无法从文本中提取数值
    #[error("No numeric value found in '{0}'")]
    NoNumber(String),

    /// 无效的校验表达式
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// 操作与输入类型不匹配
    #[error("Operation {op} cannot apply to {found}")]
    TypeMismatch { op: &'static str, found: &'static str },
}

/// 后处理操作
///
/// 命名的可组合操作，按声明顺序链式执行：每个操作接收
/// 上一个操作的输出。操作失败使字段无效，不影响其他字段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PostProcessOp {
    /// 文本归一化：合并空白、去除首尾空白
    NormalizeText,
    /// HTML实体解码
    DecodeEntities,
    /// Unicode转写为ASCII
    Transliterate,
    /// 从文本中提取数值（容忍千分位与货币符号）
    ExtractNumber,
    /// 数组去重，保持首次出现顺序
    Deduplicate,
    /// 嵌套数组展平一层
    Flatten,
    /// 正则格式校验，不匹配则字段无效
    ValidateFormat {
        /// 校验用正则表达式
        pattern: String,
    },
}

impl PostProcessOp {
    /// 应用单个操作
    ///
    /// # 参数
    ///
    /// * `value` - 上一个操作的输出
    ///
    /// # 返回值
    ///
    /// * `Ok(Value)` - 处理后的值
    /// * `Err(PostProcessError)` - 字段级处理失败
    pub fn apply(&self, value: Value) -> Result<Value, PostProcessError> {
        match self {
            PostProcessOp::NormalizeText => map_strings(value, |s| Ok(normalize_whitespace(&s))),
            PostProcessOp::DecodeEntities => map_strings(value, |s| {
                Ok(html_escape::decode_html_entities(&s).into_owned())
            }),
            PostProcessOp::Transliterate => map_strings(value, |s| Ok(deunicode::deunicode(&s))),
            PostProcessOp::ExtractNumber => match value {
                Value::Number(n) => Ok(Value::Number(n)),
                Value::String(s) => extract_number(&s),
                Value::Array(items) => {
                    let out: Result<Vec<Value>, PostProcessError> = items
                        .into_iter()
                        .map(|item| PostProcessOp::ExtractNumber.apply(item))
                        .collect();
                    Ok(Value::Array(out?))
                }
                other => Err(PostProcessError::TypeMismatch {
                    op: "extract_number",
                    found: type_name(&other),
                }),
            },
            PostProcessOp::Deduplicate => match value {
                Value::Array(items) => {
                    let mut seen = Vec::new();
                    let mut out = Vec::new();
                    for item in items {
                        let key = item.to_string();
                        if !seen.contains(&key) {
                            seen.push(key);
                            out.push(item);
                        }
                    }
                    Ok(Value::Array(out))
                }
                other => Ok(other), // No-op on scalars
            },
            PostProcessOp::Flatten => match value {
                Value::Array(items) => {
                    let mut out = Vec::new();
                    for item in items {
                        match item {
                            Value::Array(inner) => out.extend(inner),
                            scalar => out.push(scalar),
                        }
                    }
                    Ok(Value::Array(out))
                }
                other => Ok(other),
            },
            PostProcessOp::ValidateFormat { pattern } => {
                let re = Regex::new(pattern)
                    .map_err(|e| PostProcessError::InvalidPattern(e.to_string()))?;
                validate_strings(&value, &re, pattern)?;
                Ok(value)
            }
        }
    }
}

/// 按声明顺序执行整条后处理流水线
pub fn run_pipeline(ops: &[PostProcessOp], value: Value) -> Result<Value, PostProcessError> {
    let mut current = value;
    for op in ops {
        current = op.apply(current)?;
    }
    Ok(current)
}

/// 合并连续空白为单个空格并去除首尾空白
fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 对字符串（或字符串数组的每个元素）应用转换
fn map_strings<F>(value: Value, f: F) -> Result<Value, PostProcessError>
where
    F: Fn(String) -> Result<String, PostProcessError> + Copy,
{
    match value {
        Value::String(s) => Ok(Value::String(f(s)?)),
        Value::Array(items) => {
            let out: Result<Vec<Value>, PostProcessError> =
                items.into_iter().map(|item| map_strings(item, f)).collect();
            Ok(Value::Array(out?))
        }
        other => Ok(other),
    }
}

/// 从自由文本中提取第一个数值
///
/// 同时容忍 "1,299.99"（英美）与 "1.299,00"（欧陆）两种
/// 千分位写法以及货币符号前后缀
fn extract_number(s: &str) -> Result<Value, PostProcessError> {
    let re = Regex::new(r"[0-9][0-9.,]*").map_err(|e| PostProcessError::InvalidPattern(e.to_string()))?;
    let raw = re
        .find(s)
        .ok_or_else(|| PostProcessError::NoNumber(s.to_string()))?
        .as_str();

    let cleaned = if raw.contains(',') && raw.contains('.') {
        // The rightmost separator is the decimal point
        if raw.rfind(',') > raw.rfind('.') {
            raw.replace('.', "").replace(',', ".")
        } else {
            raw.replace(',', "")
        }
    } else if raw.contains(',') {
        // A single comma followed by exactly two digits reads as decimals
        let after = raw.rsplit(',').next().unwrap_or("");
        if after.len() == 2 {
            raw.replace(',', ".")
        } else {
            raw.replace(',', "")
        }
    } else {
        raw.to_string()
    };

    let parsed: f64 = cleaned
        .trim_end_matches('.')
        .parse()
        .map_err(|_| PostProcessError::NoNumber(s.to_string()))?;

    serde_json::Number::from_f64(parsed)
        .map(Value::Number)
        .ok_or_else(|| PostProcessError::NoNumber(s.to_string()))
}

/// 校验字符串（或数组元素）匹配给定正则
fn validate_strings(value: &Value, re: &Regex, pattern: &str) -> Result<(), PostProcessError> {
    match value {
        Value::String(s) => {
            if re.is_match(s) {
                Ok(())
            } else {
                Err(PostProcessError::FormatMismatch {
                    value: s.clone(),
                    pattern: pattern.to_string(),
                })
            }
        }
        Value::Array(items) => items.iter().try_for_each(|item| validate_strings(item, re, pattern)),
        _ => Ok(()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
