use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 属性值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Text(String),
    Float(f64),
}

/// 属性表
///
/// 使用有序映射，保证同一内容序列化出的字节完全一致（快照比较和差异计算依赖这一点）
pub type Properties = BTreeMap<String, Value>;

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// 估算占用字节数
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Text(s) => s.len() + std::mem::size_of::<usize>() * 3,
            _ => std::mem::size_of::<Value>(),
        }
    }

    /// 从 JSON 值转换，数组、对象和 null 无法表示时返回 None
    pub fn from_json(v: &serde_json::Value) -> Option<Value> {
        match v {
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float)),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::String(s) => Some(Value::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Text(s) => write!(f, "{}", s),
            Value::Float(x) => write!(f, "{}", x),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// JSON 对象 -> 属性表（忽略无法表示的值）
pub fn properties_from_json(map: &serde_json::Map<String, serde_json::Value>) -> Properties {
    let mut props = Properties::new();
    for (k, v) in map {
        if let Some(val) = Value::from_json(v) {
            props.insert(k.clone(), val);
        }
    }
    props
}

/// 属性表 -> JSON 对象
pub fn properties_to_json(props: &Properties) -> serde_json::Map<String, serde_json::Value> {
    props
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect()
}

/// 属性表估算大小
pub fn properties_size(props: &Properties) -> usize {
    props
        .iter()
        .map(|(k, v)| k.len() + v.approx_size())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion() {
        let obj = json!({"pressure": 12, "fluid": "water", "insulated": true, "temp": 80.5, "tags": [1, 2]});
        let props = properties_from_json(obj.as_object().unwrap());

        assert_eq!(props.get("pressure"), Some(&Value::Int(12)));
        assert_eq!(props.get("fluid"), Some(&Value::Text("water".into())));
        assert_eq!(props.get("insulated"), Some(&Value::Bool(true)));
        assert_eq!(props.get("temp"), Some(&Value::Float(80.5)));
        // 数组无法表示
        assert!(!props.contains_key("tags"));

        let back = properties_to_json(&props);
        assert_eq!(back.get("fluid"), Some(&json!("water")));
    }
}
