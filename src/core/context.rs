use crate::core::filters::FilterRegistry;
use crate::utils::error::{Result, StencilError};
use serde_json::{Map, Value};
use std::sync::Arc;

/// 分層的渲染上下文：新的層會遮蔽舊的層
#[derive(Debug, Clone)]
pub struct Context {
    layers: Vec<Map<String, Value>>,
    filters: Arc<FilterRegistry>,
}

impl Context {
    pub fn new(data: Map<String, Value>) -> Self {
        Self::with_filters(data, Arc::new(FilterRegistry::builtin()))
    }

    pub fn with_filters(data: Map<String, Value>, filters: Arc<FilterRegistry>) -> Self {
        Self {
            layers: vec![data],
            filters,
        }
    }

    /// 從任意 JSON 值建立；頂層必須是物件
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::new(map)),
            other => Err(StencilError::InvalidContext {
                kind: value_kind(&other).to_string(),
            }),
        }
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub fn set_filters(&mut self, filters: Arc<FilterRegistry>) {
        self.filters = filters;
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn push(&mut self) {
        self.layers.push(Map::new());
    }

    pub fn push_with(&mut self, layer: Map<String, Value>) {
        self.layers.push(layer);
    }

    /// The base layer is never removed.
    pub fn pop(&mut self) -> Option<Map<String, Value>> {
        if self.layers.len() > 1 {
            self.layers.pop()
        } else {
            None
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.layers.iter().rev().find_map(|layer| layer.get(key))
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        if let Some(top) = self.layers.last_mut() {
            top.insert(key.into(), value);
        }
    }

    /// 點號路徑查找：`user.name`、`items.0`
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut steps = path.split('.');
        let mut current = self.get(steps.next()?.trim())?;
        for step in steps {
            current = lookup_step(current, step.trim())?;
        }
        Some(current)
    }

    /// 解析表達式並依序套用過濾器：`name|upper|trim`
    pub fn resolve(&self, expr: &str) -> Result<Value> {
        let mut parts = expr.split('|');
        let head = parts.next().unwrap_or_default().trim();
        let mut value = self.lookup(head).cloned().unwrap_or(Value::Null);

        for name in parts {
            let name = name.trim();
            let filter = self
                .filters
                .get(name)
                .ok_or_else(|| StencilError::UnknownFilter {
                    filter: name.to_string(),
                    expr: expr.to_string(),
                })?;
            value = filter.apply(value)?;
        }

        Ok(value)
    }
}

fn lookup_step<'a>(value: &'a Value, step: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(step),
        Value::Array(items) => step.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// `{{ }}` 的輸出形式
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
