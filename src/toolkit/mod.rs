//! 领域编辑原语
//!
//! 树模型和图模型各自一套编辑函数，签名统一为
//! `fn(&mut 模型, &ResolvedTarget, &Payload) -> Result<被修改实体, ToolkitError>`，
//! 由调度表按 (动作, 模型表示) 选择。原语只改传入的模型（事务工作副本），
//! 失败时不保证模型处于一致状态，调用方负责丢弃副本。

pub mod graph_ops;
pub mod tree_ops;

use crate::model::EntityId;
use crate::resolver::ResolvedTarget;
use crate::values::{Properties, Value};
use thiserror::Error;

/// 操作参数：JSON 对象
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// 编辑原语错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolkitError {
    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("{kind} '{id}' not found")]
    EntityNotFound { kind: &'static str, id: String },

    #[error("entity id '{0}' already exists")]
    DuplicateEntity(String),

    #[error("target {0} is not valid for this operation")]
    WrongTarget(String),

    #[error("{0}")]
    Rejected(String),
}

pub type ToolkitResult = Result<Vec<EntityId>, ToolkitError>;

impl ToolkitError {
    pub(crate) fn wrong_target(target: &ResolvedTarget) -> Self {
        ToolkitError::WrongTarget(format!("{:?}", target))
    }

    fn invalid(field: &str, message: &str) -> Self {
        ToolkitError::InvalidField {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

// ========== 参数读取 ==========

pub(crate) fn opt_str<'a>(payload: &'a Payload, key: &str) -> Result<Option<&'a str>, ToolkitError> {
    match payload.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ToolkitError::invalid(key, "expected a string")),
    }
}

pub(crate) fn req_str<'a>(payload: &'a Payload, key: &str) -> Result<&'a str, ToolkitError> {
    opt_str(payload, key)?.ok_or_else(|| ToolkitError::MissingField(key.to_string()))
}

pub(crate) fn opt_bool(payload: &Payload, key: &str) -> Result<Option<bool>, ToolkitError> {
    match payload.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ToolkitError::invalid(key, "expected a boolean")),
    }
}

pub(crate) fn opt_index(payload: &Payload, key: &str) -> Result<Option<usize>, ToolkitError> {
    match payload.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| ToolkitError::invalid(key, "expected a non-negative integer")),
    }
}

/// 字符串数组参数
pub(crate) fn opt_str_list(payload: &Payload, key: &str) -> Result<Vec<String>, ToolkitError> {
    match payload.get(key) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ToolkitError::invalid(key, "expected an array of strings"))
            })
            .collect(),
        Some(_) => Err(ToolkitError::invalid(key, "expected an array of strings")),
    }
}

/// 属性参数（JSON 对象）
pub(crate) fn opt_object<'a>(
    payload: &'a Payload,
    key: &str,
) -> Result<Option<&'a serde_json::Map<String, serde_json::Value>>, ToolkitError> {
    match payload.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(ToolkitError::invalid(key, "expected an object")),
    }
}

/// 把属性补丁合并进属性表：null 删除键，标量覆盖，数组和对象拒绝
pub(crate) fn merge_properties(
    props: &mut Properties,
    patch: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), ToolkitError> {
    for (k, v) in patch {
        if v.is_null() {
            props.remove(k);
            continue;
        }
        let value = Value::from_json(v).ok_or_else(|| {
            ToolkitError::invalid(&format!("properties.{}", k), "expected a scalar value")
        })?;
        props.insert(k.clone(), value);
    }
    Ok(())
}
