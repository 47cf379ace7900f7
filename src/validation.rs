//! 校验
//!
//! 两类校验：
//! - 参数预校验：执行前检查操作参数的结构
//! - 模型校验：执行后检查整个模型是否满足约束（位号唯一、必填属性、位号格式、悬空引用）

use crate::model::Model;
use crate::mutation::ActionKind;
use crate::toolkit::Payload;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// 校验结果：有错误即无效，警告不影响有效性
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

// ========== 参数预校验 ==========

enum FieldType {
    Text,
    Bool,
    Index,
    StrList,
    Object,
}

fn check_field(result: &mut ValidationResult, payload: &Payload, field: &str, ty: FieldType) {
    let Some(value) = payload.get(field) else {
        return;
    };
    if value.is_null() {
        return;
    }
    let ok = match ty {
        FieldType::Text => value.as_str().is_some_and(|s| !s.is_empty()),
        FieldType::Bool => value.is_boolean(),
        FieldType::Index => value.is_u64(),
        FieldType::StrList => value
            .as_array()
            .is_some_and(|items| items.iter().all(|v| v.is_string())),
        FieldType::Object => value.as_object().is_some_and(|map| {
            map.values()
                .all(|v| !(v.is_array() || v.is_object()))
        }),
    };
    if !ok {
        let expected = match ty {
            FieldType::Text => "a non-empty string",
            FieldType::Bool => "a boolean",
            FieldType::Index => "a non-negative integer",
            FieldType::StrList => "an array of strings",
            FieldType::Object => "an object of scalar values",
        };
        result.error(format!("field '{}' must be {}", field, expected));
    }
}

fn require(result: &mut ValidationResult, payload: &Payload, field: &str) {
    if payload.get(field).map_or(true, serde_json::Value::is_null) {
        result.error(format!("missing required field '{}'", field));
    }
}

fn require_any(result: &mut ValidationResult, payload: &Payload, fields: &[&str]) {
    if fields
        .iter()
        .all(|f| payload.get(*f).map_or(true, serde_json::Value::is_null))
    {
        result.error(format!("at least one of {} is required", fields.join(", ")));
    }
}

/// 按动作检查参数结构
pub fn validate_payload(action: ActionKind, payload: &Payload) -> ValidationResult {
    use FieldType::*;
    let mut r = ValidationResult::ok();
    match action {
        ActionKind::InsertComponent | ActionKind::InsertInlineComponent => {
            require(&mut r, payload, "tag");
            check_field(&mut r, payload, "tag", Text);
            check_field(&mut r, payload, "id", Text);
            check_field(&mut r, payload, "class", Text);
            check_field(&mut r, payload, "kind", Text);
            check_field(&mut r, payload, "ports", StrList);
            check_field(&mut r, payload, "properties", Object);
            check_field(&mut r, payload, "position", Index);
            check_field(&mut r, payload, "downstream_id", Text);
        }
        ActionKind::UpdateComponent => {
            require_any(&mut r, payload, &["class", "kind", "properties"]);
            check_field(&mut r, payload, "class", Text);
            check_field(&mut r, payload, "kind", Text);
            check_field(&mut r, payload, "properties", Object);
        }
        ActionKind::RewireConnection => {
            require_any(&mut r, payload, &["from", "to"]);
            check_field(&mut r, payload, "from", Text);
            check_field(&mut r, payload, "to", Text);
        }
        ActionKind::SetTagProperties => {
            require_any(&mut r, payload, &["tag", "properties"]);
            check_field(&mut r, payload, "tag", Text);
            check_field(&mut r, payload, "properties", Object);
        }
        ActionKind::UpdateStreamProperties => {
            require_any(&mut r, payload, &["name", "properties"]);
            check_field(&mut r, payload, "name", Text);
            check_field(&mut r, payload, "properties", Object);
        }
        ActionKind::ToggleInstrumentation => {
            require(&mut r, payload, "instrument");
            check_field(&mut r, payload, "instrument", Text);
            check_field(&mut r, payload, "kind", Text);
            check_field(&mut r, payload, "enabled", Bool);
        }
        ActionKind::RemoveComponent | ActionKind::SplitSegment | ActionKind::MergeSegments => {}
    }
    r
}

// ========== 模型校验 ==========

/// 模型校验器
pub trait ModelValidator: Send + Sync {
    fn validate(&self, model: &Model) -> ValidationResult;
}

/// 模型约束
#[derive(Debug, Clone)]
pub enum ModelConstraint {
    /// 位号唯一（设备、管段、物流名称各自唯一）
    UniqueTag,
    /// 指定类别的设备必须带有某个属性
    RequiredProperty { class: String, property: String },
    /// 位号格式，不匹配只产生警告
    TagPattern(Regex),
    /// 连接不能引用不存在的设备或接口
    DanglingReference,
}

impl ModelConstraint {
    pub fn required_property(class: &str, property: &str) -> Self {
        ModelConstraint::RequiredProperty {
            class: class.to_string(),
            property: property.to_string(),
        }
    }

    pub fn tag_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(ModelConstraint::TagPattern)
    }

    /// 约束的唯一标识
    pub fn key(&self) -> String {
        match self {
            ModelConstraint::UniqueTag => "unique:tag".to_string(),
            ModelConstraint::RequiredProperty { class, property } => {
                format!("exists:{}:{}", class, property)
            }
            ModelConstraint::TagPattern(re) => format!("pattern:{}", re.as_str()),
            ModelConstraint::DanglingReference => "reference".to_string(),
        }
    }

    fn check(&self, model: &Model, result: &mut ValidationResult) {
        match (self, model) {
            (ModelConstraint::UniqueTag, Model::Tree(tree)) => {
                report_duplicates(
                    result,
                    "component",
                    tree.all_components().into_iter().map(|c| c.tag.as_str()),
                );
                report_duplicates(result, "segment", tree.segments.iter().map(|s| s.tag.as_str()));
            }
            (ModelConstraint::UniqueTag, Model::Graph(graph)) => {
                report_duplicates(result, "stream", graph.streams().map(|s| s.name.as_str()));
            }

            (ModelConstraint::RequiredProperty { class, property }, Model::Tree(tree)) => {
                for c in tree.all_components() {
                    if &c.class == class && !c.properties.contains_key(property) {
                        result.error(format!(
                            "{} '{}' is missing required property '{}'",
                            class, c.tag, property
                        ));
                    }
                }
            }
            (ModelConstraint::RequiredProperty { class, property }, Model::Graph(graph)) => {
                for n in graph.nodes() {
                    if &n.kind == class && !n.properties.contains_key(property) {
                        result.error(format!(
                            "{} '{}' is missing required property '{}'",
                            class, n.id, property
                        ));
                    }
                }
            }

            (ModelConstraint::TagPattern(re), Model::Tree(tree)) => {
                for c in tree.all_components() {
                    if !re.is_match(&c.tag) {
                        result.warning(format!("tag '{}' does not match '{}'", c.tag, re.as_str()));
                    }
                }
            }
            (ModelConstraint::TagPattern(re), Model::Graph(graph)) => {
                for n in graph.nodes() {
                    if !re.is_match(&n.id) {
                        result.warning(format!("tag '{}' does not match '{}'", n.id, re.as_str()));
                    }
                }
            }

            (ModelConstraint::DanglingReference, Model::Tree(tree)) => {
                for seg in &tree.segments {
                    for end in [&seg.from, &seg.to].into_iter().flatten() {
                        match tree.component(&end.component) {
                            None => result.error(format!(
                                "segment '{}' references missing component '{}'",
                                seg.tag, end.component
                            )),
                            Some(c) => {
                                if let Some(port) = &end.port {
                                    if c.port(port).is_none() {
                                        result.error(format!(
                                            "segment '{}' references missing port '{}/{}'",
                                            seg.tag, c.tag, port
                                        ));
                                    }
                                }
                            }
                        }
                    }
                }
            }
            (ModelConstraint::DanglingReference, Model::Graph(graph)) => {
                for s in graph.streams() {
                    for end in [&s.source, &s.target] {
                        if graph.node(end).is_none() {
                            result.error(format!(
                                "stream '{}' references missing node '{}'",
                                s.id, end
                            ));
                        }
                    }
                }
            }
        }
    }
}

fn report_duplicates<'a>(
    result: &mut ValidationResult,
    what: &str,
    tags: impl Iterator<Item = &'a str>,
) {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for tag in tags {
        if !seen.insert(tag) && reported.insert(tag) {
            result.error(format!("duplicate {} tag '{}'", what, tag));
        }
    }
}

/// 约束校验器
#[derive(Debug, Clone, Default)]
pub struct ConstraintValidator {
    constraints: Vec<ModelConstraint>,
}

impl ConstraintValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 默认约束：位号唯一 + 无悬空引用
    pub fn standard() -> Self {
        Self {
            constraints: vec![ModelConstraint::UniqueTag, ModelConstraint::DanglingReference],
        }
    }

    /// 添加约束，同一 key 的约束已存在时返回 false
    pub fn add(&mut self, constraint: ModelConstraint) -> bool {
        let key = constraint.key();
        if self.constraints.iter().any(|c| c.key() == key) {
            return false;
        }
        self.constraints.push(constraint);
        true
    }

    pub fn with(mut self, constraint: ModelConstraint) -> Self {
        self.add(constraint);
        self
    }

    pub fn constraints(&self) -> &[ModelConstraint] {
        &self.constraints
    }
}

impl ModelValidator for ConstraintValidator {
    fn validate(&self, model: &Model) -> ValidationResult {
        let mut result = ValidationResult::ok();
        for constraint in &self.constraints {
            constraint.check(model, &mut result);
        }
        debug!(
            model = model.name(),
            valid = result.valid,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "model validated"
        );
        result
    }
}
