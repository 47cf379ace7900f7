//! 目标解析
//!
//! 把抽象的目标选择器（类型 + 标识 [+ 过滤条件]）解析成模型里的具体实体引用。
//! 解析结果只保存实体 id，因此对同一模型的工作副本同样有效。

use crate::model::{EntityId, Model, ModelKind};
use crate::values::{Properties, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;
use tracing::debug;

/// 接口复合标识的分隔符：`设备/接口`
pub const PORT_SEPARATOR: char = '/';

/// 目标类型
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TargetKind {
    #[default]
    Model,
    Component,
    Segment,
    Stream,
    Port,
}

/// 目标选择器
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetSelector {
    pub kind: TargetKind,
    #[serde(default)]
    pub identifier: String,
    /// 实体必须带有这些属性且值相等（`class` / `kind` 与设备类别、单元类型比较）
    #[serde(default, skip_serializing_if = "Option::is_none", with = "filter_json")]
    pub filter: Option<Properties>,
}

/// 过滤条件在线上是普通的 JSON 标量对象
mod filter_json {
    use crate::values::{properties_from_json, properties_to_json, Properties};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(filter: &Option<Properties>, s: S) -> Result<S::Ok, S::Error> {
        filter.as_ref().map(properties_to_json).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Properties>, D::Error> {
        let raw = Option::<serde_json::Map<String, serde_json::Value>>::deserialize(d)?;
        Ok(raw.as_ref().map(properties_from_json))
    }
}

impl TargetSelector {
    pub fn new(kind: TargetKind, identifier: &str) -> Self {
        Self {
            kind,
            identifier: identifier.to_string(),
            filter: None,
        }
    }

    pub fn model() -> Self {
        Self::new(TargetKind::Model, "")
    }

    pub fn component(identifier: &str) -> Self {
        Self::new(TargetKind::Component, identifier)
    }

    pub fn segment(identifier: &str) -> Self {
        Self::new(TargetKind::Segment, identifier)
    }

    pub fn stream(identifier: &str) -> Self {
        Self::new(TargetKind::Stream, identifier)
    }

    pub fn port(component: &str, port: &str) -> Self {
        Self::new(
            TargetKind::Port,
            &format!("{}{}{}", component, PORT_SEPARATOR, port),
        )
    }

    pub fn with_filter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.filter
            .get_or_insert_with(Properties::new)
            .insert(key.to_string(), value.into());
        self
    }

    /// 缓存键
    pub fn key(&self) -> String {
        let mut key = format!("{}:{}", self.kind, self.identifier);
        if let Some(filter) = &self.filter {
            for (k, v) in filter {
                key.push_str(&format!("?{}={}", k, v));
            }
        }
        key
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// 解析后的目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedTarget {
    Model,
    Component { id: EntityId },
    Segment { id: EntityId },
    Stream { id: EntityId },
    Port { component: EntityId, port: String },
}

impl ResolvedTarget {
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            ResolvedTarget::Model => None,
            ResolvedTarget::Component { id }
            | ResolvedTarget::Segment { id }
            | ResolvedTarget::Stream { id } => Some(id),
            ResolvedTarget::Port { component, .. } => Some(component),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("{kind} '{identifier}' not found in {model_kind} model")]
    NotFound {
        kind: TargetKind,
        identifier: String,
        model_kind: ModelKind,
    },

    #[error("{kind} selectors cannot be resolved against {model_kind} models")]
    Unsupported { kind: TargetKind, model_kind: ModelKind },

    #[error("{kind} '{identifier}' does not match filter")]
    FilterMismatch { kind: TargetKind, identifier: String },

    #[error("malformed port identifier '{0}', expected 'component{sep}port'", sep = PORT_SEPARATOR)]
    MalformedPort(String),
}

/// 目标解析器
///
/// 每次调度创建一个，按选择器键缓存结果
#[derive(Debug, Default)]
pub struct TargetResolver {
    cache: HashMap<String, ResolvedTarget>,
}

impl TargetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn resolve(
        &mut self,
        selector: &TargetSelector,
        model: &Model,
    ) -> Result<ResolvedTarget, ResolveError> {
        let key = selector.key();
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }
        let resolved = resolve_uncached(selector, model)?;
        debug!(selector = %key, ?resolved, "target resolved");
        self.cache.insert(key, resolved.clone());
        Ok(resolved)
    }
}

fn resolve_uncached(selector: &TargetSelector, model: &Model) -> Result<ResolvedTarget, ResolveError> {
    let ident = selector.identifier.as_str();
    let not_found = || ResolveError::NotFound {
        kind: selector.kind,
        identifier: ident.to_string(),
        model_kind: model.kind(),
    };
    let unsupported = || ResolveError::Unsupported {
        kind: selector.kind,
        model_kind: model.kind(),
    };

    let (resolved, props, class) = match (selector.kind, model) {
        (TargetKind::Model, _) => return Ok(ResolvedTarget::Model),

        (TargetKind::Component, Model::Tree(tree)) => {
            let c = tree
                .component_by_tag(ident)
                .or_else(|| tree.component(ident))
                .ok_or_else(not_found)?;
            (
                ResolvedTarget::Component { id: c.id.clone() },
                &c.properties,
                Some(c.class.as_str()),
            )
        }
        (TargetKind::Component, Model::Graph(graph)) => {
            let n = graph.node(ident).ok_or_else(not_found)?;
            (
                ResolvedTarget::Component { id: n.id.clone() },
                &n.properties,
                Some(n.kind.as_str()),
            )
        }

        (TargetKind::Segment, Model::Tree(tree)) => {
            let s = tree.segment(ident).ok_or_else(not_found)?;
            (ResolvedTarget::Segment { id: s.id.clone() }, &s.properties, None)
        }

        (TargetKind::Stream, Model::Graph(graph)) => {
            let s = graph
                .stream(ident)
                .or_else(|| graph.stream_by_name(ident))
                .ok_or_else(not_found)?;
            (ResolvedTarget::Stream { id: s.id.clone() }, &s.properties, None)
        }

        (TargetKind::Port, Model::Tree(tree)) => {
            let (component, label) = ident
                .rsplit_once(PORT_SEPARATOR)
                .filter(|(c, p)| !c.is_empty() && !p.is_empty())
                .ok_or_else(|| ResolveError::MalformedPort(ident.to_string()))?;
            let c = tree
                .component_by_tag(component)
                .or_else(|| tree.component(component))
                .ok_or_else(not_found)?;
            let port = c.port(label).ok_or_else(not_found)?;
            (
                ResolvedTarget::Port {
                    component: c.id.clone(),
                    port: port.label.clone(),
                },
                &port.properties,
                None,
            )
        }

        (TargetKind::Segment | TargetKind::Port, Model::Graph(_))
        | (TargetKind::Stream, Model::Tree(_)) => return Err(unsupported()),
    };

    if let Some(filter) = &selector.filter {
        if !matches_filter(filter, props, class) {
            return Err(ResolveError::FilterMismatch {
                kind: selector.kind,
                identifier: ident.to_string(),
            });
        }
    }
    Ok(resolved)
}

fn matches_filter(filter: &Properties, props: &Properties, class: Option<&str>) -> bool {
    filter.iter().all(|(k, v)| match (k.as_str(), class) {
        ("class" | "kind", Some(class)) => v.as_text() == Some(class),
        _ => props.get(k) == Some(v),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Component, Endpoint, GraphModel, Segment, Stream, TreeModel, UnitNode};

    fn tree() -> Model {
        let mut t = TreeModel::new("t");
        t.components.push(
            Component::new("c-1", "TK-101", "tank")
                .with_port("N1")
                .with_property("service", "crude"),
        );
        t.components.push(Component::new("c-2", "P-101", "pump").with_port("discharge"));
        t.segments.push(
            Segment::new("seg-1", "6\"-P-1001")
                .connect(Endpoint::new("c-1", Some("N1")), Endpoint::new("c-2", None)),
        );
        Model::Tree(t)
    }

    fn graph() -> Model {
        let mut g = GraphModel::new("g");
        g.add_node(UnitNode::new("R-1", "reactor"));
        g.add_node(UnitNode::new("C-1", "column"));
        g.add_stream(Stream::new("S-10", "reactor-effluent", "R-1", "C-1"));
        Model::Graph(g)
    }

    #[test]
    fn test_component_by_tag_or_id() {
        let mut r = TargetResolver::new();
        let m = tree();
        assert_eq!(
            r.resolve(&TargetSelector::component("TK-101"), &m).unwrap(),
            ResolvedTarget::Component { id: "c-1".into() }
        );
        assert_eq!(
            r.resolve(&TargetSelector::component("c-2"), &m).unwrap(),
            ResolvedTarget::Component { id: "c-2".into() }
        );
    }

    #[test]
    fn test_port_compound_identifier() {
        let mut r = TargetResolver::new();
        let m = tree();
        assert_eq!(
            r.resolve(&TargetSelector::port("TK-101", "N1"), &m).unwrap(),
            ResolvedTarget::Port {
                component: "c-1".into(),
                port: "N1".into()
            }
        );
        assert!(matches!(
            r.resolve(&TargetSelector::port("TK-101", "N9"), &m),
            Err(ResolveError::NotFound { .. })
        ));
        assert!(matches!(
            r.resolve(&TargetSelector::new(TargetKind::Port, "TK-101"), &m),
            Err(ResolveError::MalformedPort(_))
        ));
    }

    #[test]
    fn test_representation_mismatch_is_an_error() {
        let mut r = TargetResolver::new();
        assert!(matches!(
            r.resolve(&TargetSelector::segment("seg-1"), &graph()),
            Err(ResolveError::Unsupported { .. })
        ));
        assert!(matches!(
            r.resolve(&TargetSelector::stream("S-10"), &tree()),
            Err(ResolveError::Unsupported { .. })
        ));
        assert!(matches!(
            r.resolve(&TargetSelector::port("R-1", "in"), &graph()),
            Err(ResolveError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_stream_by_name_and_segment_by_tag() {
        let mut r = TargetResolver::new();
        assert_eq!(
            r.resolve(&TargetSelector::stream("reactor-effluent"), &graph()).unwrap(),
            ResolvedTarget::Stream { id: "S-10".into() }
        );
        assert_eq!(
            r.resolve(&TargetSelector::segment("6\"-P-1001"), &tree()).unwrap(),
            ResolvedTarget::Segment { id: "seg-1".into() }
        );
    }

    #[test]
    fn test_filter() {
        let mut r = TargetResolver::new();
        let m = tree();
        let ok = TargetSelector::component("TK-101")
            .with_filter("class", "tank")
            .with_filter("service", "crude");
        assert!(r.resolve(&ok, &m).is_ok());

        let bad = TargetSelector::component("TK-101").with_filter("service", "water");
        assert!(matches!(
            r.resolve(&bad, &m),
            Err(ResolveError::FilterMismatch { .. })
        ));
    }

    #[test]
    fn test_selector_wire_form() {
        let sel: TargetSelector = serde_json::from_value(serde_json::json!({
            "kind": "component",
            "identifier": "TK-101",
            "filter": {"class": "tank", "volume": 50}
        }))
        .unwrap();
        assert_eq!(
            sel,
            TargetSelector::component("TK-101")
                .with_filter("class", "tank")
                .with_filter("volume", 50i64)
        );
        let back = serde_json::to_value(&sel).unwrap();
        assert_eq!(back["filter"]["volume"], 50);
    }

    #[test]
    fn test_results_are_cached_per_selector() {
        let mut r = TargetResolver::new();
        let m = tree();
        r.resolve(&TargetSelector::component("TK-101"), &m).unwrap();
        r.resolve(&TargetSelector::component("TK-101"), &m).unwrap();
        r.resolve(&TargetSelector::model(), &m).unwrap();
        assert_eq!(r.cached(), 2);
    }
}
