// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! XPath 子集到 CSS 选择器的转换
//!
//! 模板允许以 XPath 语法声明选择器，提取时转换为等价的 CSS
//! 选择器后统一走 scraper 的查询路径。仅支持常见子集；
//! 无法转换的表达式在回退链中被跳过。

/// 转换结果：CSS 选择器，以及可选的属性覆盖
/// （`//a/@href` 这类尾部属性步会覆盖字段规则里的 attr）
pub fn xpath_to_css(expr: &str) -> Option<(String, Option<String>)> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Trailing attribute step: //a/@href
    let (path, attr) = match trimmed.rfind("/@") {
        Some(pos) => {
            let name = &trimmed[pos + 2..];
            if name.is_empty() || !name.chars().all(valid_name_char) {
                return None;
            }
            (&trimmed[..pos], Some(name.to_string()))
        }
        None => (trimmed, None),
    };

    if !path.starts_with('/') {
        return None;
    }

    let mut css = String::new();
    let mut rest = path;
    let mut first = true;

    while !rest.is_empty() {
        let descendant = if let Some(r) = rest.strip_prefix("//") {
            rest = r;
            true
        } else if let Some(r) = rest.strip_prefix('/') {
            rest = r;
            false
        } else {
            return None;
        };

        let end = rest.find('/').unwrap_or(rest.len());
        let step = &rest[..end];
        rest = &rest[end..];

        if step.is_empty() {
            return None;
        }

        let converted = convert_step(step)?;
        if first {
            // A leading single slash still selects from the document root;
            // CSS has no root anchor so both forms become a bare selector
            css.push_str(&converted);
            first = false;
        } else if descendant {
            css.push(' ');
            css.push_str(&converted);
        } else {
            css.push_str(" > ");
            css.push_str(&converted);
        }
    }

    if css.is_empty() {
        return None;
    }
    Some((css, attr))
}

/// 转换单个路径步：标签名加零个或多个谓词
fn convert_step(step: &str) -> Option<String> {
    let (tag, predicates) = match step.find('[') {
        Some(pos) => (&step[..pos], &step[pos..]),
        None => (step, ""),
    };

    let mut out = if tag == "*" {
        String::from("*")
    } else if !tag.is_empty() && tag.chars().all(valid_name_char) {
        tag.to_string()
    } else {
        return None;
    };

    let mut rest = predicates;
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return None;
        }
        let close = rest.find(']')?;
        let pred = &rest[1..close];
        rest = &rest[close + 1..];
        out.push_str(&convert_predicate(pred)?);
    }

    Some(out)
}

/// 转换单个谓词
///
/// 支持：`@attr='v'`、`@attr="v"`、`@attr`（存在性）、
/// `contains(@attr,'v')`、位置谓词 `[n]`
fn convert_predicate(pred: &str) -> Option<String> {
    let pred = pred.trim();

    // Positional predicate
    if let Ok(n) = pred.parse::<usize>() {
        if n == 0 {
            return None;
        }
        return Some(format!(":nth-of-type({})", n));
    }

    if let Some(inner) = pred.strip_prefix("contains(").and_then(|p| p.strip_suffix(')')) {
        let (attr, value) = split_contains_args(inner)?;
        return Some(format!("[{}*=\"{}\"]", attr, value));
    }

    if let Some(body) = pred.strip_prefix('@') {
        if let Some(eq) = body.find('=') {
            let attr = body[..eq].trim();
            let value = unquote(body[eq + 1..].trim())?;
            if !attr.chars().all(valid_name_char) {
                return None;
            }
            return Some(format!("[{}=\"{}\"]", attr, value));
        }
        // Existence check
        if body.chars().all(valid_name_char) && !body.is_empty() {
            return Some(format!("[{}]", body));
        }
    }

    None
}

/// 拆分 contains(@attr, 'value') 的两个参数
fn split_contains_args(inner: &str) -> Option<(String, String)> {
    let comma = inner.find(',')?;
    let attr = inner[..comma].trim().strip_prefix('@')?.to_string();
    if attr.is_empty() || !attr.chars().all(valid_name_char) {
        return None;
    }
    let value = unquote(inner[comma + 1..].trim())?;
    Some((attr, value))
}

/// 去除单引号或双引号
fn unquote(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') {
            let inner = &s[1..s.len() - 1];
            if inner.contains('"') {
                return None;
            }
            return Some(inner.to_string());
        }
    }
    None
}

fn valid_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}
