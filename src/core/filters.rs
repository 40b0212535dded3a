use crate::core::context::display_value;
use crate::utils::error::{Result, StencilError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub trait Filter: Send + Sync {
    fn apply(&self, value: Value) -> Result<Value>;
}

impl<F> Filter for F
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    fn apply(&self, value: Value) -> Result<Value> {
        self(value)
    }
}

/// 過濾器名稱 -> 實作
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn Filter>>,
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.filters.keys().collect();
        names.sort();
        f.debug_struct("FilterRegistry").field("filters", &names).finish()
    }
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("upper", |v: Value| Ok(map_str(v, |s| s.to_uppercase())));
        registry.register("lower", |v: Value| Ok(map_str(v, |s| s.to_lowercase())));
        registry.register("trim", |v: Value| Ok(map_str(v, |s| s.trim().to_string())));
        registry.register("title", |v: Value| Ok(map_str(v, title_case)));
        registry.register("escape", |v: Value| Ok(map_str(v, escape_html)));
        registry.register("json", |v: Value| {
            Ok(Value::String(serde_json::to_string(&v)?))
        });
        registry.register("length", length);
        registry.register("first", |v: Value| Ok(pick(v, true)));
        registry.register("last", |v: Value| Ok(pick(v, false)));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.filters.insert(name.clone(), Arc::new(filter)).is_some() {
            tracing::debug!("Replaced filter '{}'", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Filter>> {
        self.filters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }
}

/// 對字串表示套用轉換；`Null` 保持不變
fn map_str(value: Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(f(&s)),
        other => Value::String(f(&display_value(&other))),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for ch in s.chars() {
        if ch.is_alphanumeric() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn length(value: Value) -> Result<Value> {
    let len = match &value {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Bool(_) | Value::Number(_) => {
            return Err(StencilError::FilterError {
                filter: "length".to_string(),
                message: format!("{} has no length", display_value(&value)),
            })
        }
    };
    Ok(Value::from(len))
}

fn pick(value: Value, first: bool) -> Value {
    match value {
        Value::Array(mut items) => {
            if items.is_empty() {
                Value::Null
            } else if first {
                items.swap_remove(0)
            } else {
                items.pop().unwrap_or(Value::Null)
            }
        }
        Value::String(s) => {
            let ch = if first { s.chars().next() } else { s.chars().last() };
            ch.map(|c| Value::String(c.to_string())).unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(name: &str, value: Value) -> Result<Value> {
        let registry = FilterRegistry::builtin();
        registry.get(name).expect("builtin filter").apply(value)
    }

    #[test]
    fn test_case_filters() {
        assert_eq!(run("upper", json!("abc")).unwrap(), json!("ABC"));
        assert_eq!(run("lower", json!("AbC")).unwrap(), json!("abc"));
        assert_eq!(run("title", json!("hello wORLD-wide")).unwrap(), json!("Hello World-Wide"));
        assert_eq!(run("trim", json!("  x ")).unwrap(), json!("x"));
        assert_eq!(run("upper", Value::Null).unwrap(), Value::Null);
        assert_eq!(run("upper", json!(12)).unwrap(), json!("12"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(
            run("escape", json!("<a href=\"x\">Tom & 'Jerry'</a>")).unwrap(),
            json!("&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;")
        );
    }

    #[test]
    fn test_length() {
        assert_eq!(run("length", json!([1, 2, 3])).unwrap(), json!(3));
        assert_eq!(run("length", json!("héllo")).unwrap(), json!(5));
        assert_eq!(run("length", json!({"a": 1})).unwrap(), json!(1));
        assert_eq!(run("length", Value::Null).unwrap(), json!(0));
        assert!(run("length", json!(true)).is_err());
    }

    #[test]
    fn test_first_last_json() {
        assert_eq!(run("first", json!([1, 2, 3])).unwrap(), json!(1));
        assert_eq!(run("last", json!([1, 2, 3])).unwrap(), json!(3));
        assert_eq!(run("first", json!([])).unwrap(), Value::Null);
        assert_eq!(run("last", json!("xyz")).unwrap(), json!("z"));
        assert_eq!(run("json", json!({"a": [1]})).unwrap(), json!("{\"a\":[1]}"));
    }

    #[test]
    fn test_register_custom_filter() {
        let mut registry = FilterRegistry::new();
        assert!(!registry.contains("double"));
        registry.register("double", |v: Value| {
            Ok(json!(v.as_i64().unwrap_or_default() * 2))
        });
        let out = registry.get("double").unwrap().apply(json!(21)).unwrap();
        assert_eq!(out, json!(42));
    }
}
