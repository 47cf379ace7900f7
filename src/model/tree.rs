//! 树模型
//!
//! 装置/设备层级模型：设备可以嵌套，管段通过端点引用设备的接口（port），
//! 管段上还可以挂在线元件（阀门、流量计等）

use crate::values::{properties_size, Properties};
use serde::{Deserialize, Serialize};

use super::EntityId;

/// 设备上带标签的子元素（管口、接口）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub label: String,
    pub properties: Properties,
}

impl Port {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            properties: Properties::new(),
        }
    }
}

/// 仪表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub tag: String,
    pub kind: String,
    pub enabled: bool,
}

/// 设备 / 元件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: EntityId,
    pub tag: String,
    pub class: String,
    pub properties: Properties,
    pub ports: Vec<Port>,
    pub instruments: Vec<Instrument>,
    /// 嵌套的子设备
    pub children: Vec<Component>,
}

impl Component {
    pub fn new(id: &str, tag: &str, class: &str) -> Self {
        Self {
            id: id.to_string(),
            tag: tag.to_string(),
            class: class.to_string(),
            properties: Properties::new(),
            ports: Vec::new(),
            instruments: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_port(mut self, label: &str) -> Self {
        self.ports.push(Port::new(label));
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<crate::values::Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn port(&self, label: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.label == label)
    }

    pub fn instrument_mut(&mut self, tag: &str) -> Option<&mut Instrument> {
        self.instruments.iter_mut().find(|i| i.tag == tag)
    }

    fn approx_size(&self) -> usize {
        let own = self.id.len()
            + self.tag.len()
            + self.class.len()
            + properties_size(&self.properties)
            + self
                .ports
                .iter()
                .map(|p| p.label.len() + properties_size(&p.properties))
                .sum::<usize>()
            + self
                .instruments
                .iter()
                .map(|i| i.tag.len() + i.kind.len() + 1)
                .sum::<usize>();
        own + self.children.iter().map(Component::approx_size).sum::<usize>()
    }
}

/// 管段端点：设备 + 可选的接口标签
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub component: EntityId,
    pub port: Option<String>,
}

impl Endpoint {
    pub fn new(component: &str, port: Option<&str>) -> Self {
        Self {
            component: component.to_string(),
            port: port.map(str::to_string),
        }
    }
}

/// 管段（连接段）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: EntityId,
    pub tag: String,
    pub from: Option<Endpoint>,
    pub to: Option<Endpoint>,
    /// 在线元件，按流向排列
    pub inline: Vec<Component>,
    pub properties: Properties,
}

impl Segment {
    pub fn new(id: &str, tag: &str) -> Self {
        Self {
            id: id.to_string(),
            tag: tag.to_string(),
            from: None,
            to: None,
            inline: Vec::new(),
            properties: Properties::new(),
        }
    }

    pub fn connect(mut self, from: Endpoint, to: Endpoint) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }
}

/// 树模型
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TreeModel {
    pub name: String,
    pub components: Vec<Component>,
    pub segments: Vec<Segment>,
}

impl TreeModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            components: Vec::new(),
            segments: Vec::new(),
        }
    }

    // ========== 设备查找 ==========

    /// 按 id 查找设备（包括嵌套设备和在线元件）
    pub fn component(&self, id: &str) -> Option<&Component> {
        self.all_components().into_iter().find(|c| c.id == id)
    }

    pub fn component_mut(&mut self, id: &str) -> Option<&mut Component> {
        if let Some(found) = find_in_mut(&mut self.components, id) {
            return Some(found);
        }
        for seg in self.segments.iter_mut() {
            if let Some(found) = find_in_mut(&mut seg.inline, id) {
                return Some(found);
            }
        }
        None
    }

    /// 按位号（tag）精确查找设备
    pub fn component_by_tag(&self, tag: &str) -> Option<&Component> {
        self.all_components().into_iter().find(|c| c.tag == tag)
    }

    /// 深度优先列出所有设备，在线元件排在最后
    pub fn all_components(&self) -> Vec<&Component> {
        let mut out = Vec::new();
        collect(&self.components, &mut out);
        for seg in &self.segments {
            collect(&seg.inline, &mut out);
        }
        out
    }

    /// 设备的父设备 id（顶层设备和在线元件返回 None）
    pub fn parent_of(&self, id: &str) -> Option<&str> {
        fn walk<'a>(list: &'a [Component], id: &str) -> Option<&'a str> {
            for c in list {
                if c.children.iter().any(|child| child.id == id) {
                    return Some(&c.id);
                }
                if let Some(found) = walk(&c.children, id) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.components, id)
    }

    /// 在线元件所在的管段 id
    pub fn segment_of_inline(&self, id: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|s| s.inline.iter().any(|c| c.id == id))
            .map(|s| s.id.as_str())
    }

    /// 移除设备（连同其子设备），返回被移除的子树
    pub fn remove_component(&mut self, id: &str) -> Option<Component> {
        if let Some(removed) = remove_in(&mut self.components, id) {
            return Some(removed);
        }
        for seg in self.segments.iter_mut() {
            if let Some(pos) = seg.inline.iter().position(|c| c.id == id) {
                return Some(seg.inline.remove(pos));
            }
        }
        None
    }

    // ========== 管段查找 ==========

    /// 按 id 或位号查找管段
    pub fn segment(&self, key: &str) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.id == key)
            .or_else(|| self.segments.iter().find(|s| s.tag == key))
    }

    pub fn segment_mut(&mut self, id: &str) -> Option<&mut Segment> {
        self.segments.iter_mut().find(|s| s.id == id)
    }

    /// 引用了指定设备的管段 id
    pub fn segments_touching(&self, component: &str) -> Vec<EntityId> {
        self.segments
            .iter()
            .filter(|s| {
                s.from.as_ref().is_some_and(|e| e.component == component)
                    || s.to.as_ref().is_some_and(|e| e.component == component)
            })
            .map(|s| s.id.clone())
            .collect()
    }

    /// id 是否已被设备或管段占用
    pub fn contains_id(&self, id: &str) -> bool {
        self.component(id).is_some() || self.segments.iter().any(|s| s.id == id)
    }

    pub fn entity_count(&self) -> usize {
        self.all_components().len() + self.segments.len()
    }

    pub(crate) fn approx_size(&self) -> usize {
        let components: usize = self.components.iter().map(Component::approx_size).sum();
        let segments: usize = self
            .segments
            .iter()
            .map(|s| {
                s.id.len()
                    + s.tag.len()
                    + properties_size(&s.properties)
                    + s.inline.iter().map(Component::approx_size).sum::<usize>()
                    + 2 * std::mem::size_of::<Endpoint>()
            })
            .sum();
        self.name.len() + components + segments
    }
}

fn collect<'a>(list: &'a [Component], out: &mut Vec<&'a Component>) {
    for c in list {
        out.push(c);
        collect(&c.children, out);
    }
}

fn find_in_mut<'a>(list: &'a mut [Component], id: &str) -> Option<&'a mut Component> {
    for c in list.iter_mut() {
        if c.id == id {
            return Some(c);
        }
        if let Some(found) = find_in_mut(&mut c.children, id) {
            return Some(found);
        }
    }
    None
}

fn remove_in(list: &mut Vec<Component>, id: &str) -> Option<Component> {
    if let Some(pos) = list.iter().position(|c| c.id == id) {
        return Some(list.remove(pos));
    }
    for c in list.iter_mut() {
        if let Some(removed) = remove_in(&mut c.children, id) {
            return Some(removed);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TreeModel {
        let mut model = TreeModel::new("unit-100");
        let mut tank = Component::new("TK-100", "TK-100", "tank").with_port("N1");
        tank.children.push(Component::new("AG-100", "AG-100", "agitator"));
        model.components.push(tank);
        model.components.push(Component::new("P-100", "P-100", "pump").with_port("suction"));
        let mut seg = Segment::new("L-1", "100-L-1").connect(
            Endpoint::new("TK-100", Some("N1")),
            Endpoint::new("P-100", Some("suction")),
        );
        seg.inline.push(Component::new("V-1", "V-1", "valve"));
        model.segments.push(seg);
        model
    }

    #[test]
    fn test_lookup_nested_and_inline() {
        let model = sample();
        assert!(model.component("AG-100").is_some());
        assert!(model.component("V-1").is_some());
        assert_eq!(model.parent_of("AG-100"), Some("TK-100"));
        assert_eq!(model.segment_of_inline("V-1"), Some("L-1"));
        assert_eq!(model.entity_count(), 5);
    }

    #[test]
    fn test_segment_lookup_by_tag() {
        let model = sample();
        assert_eq!(model.segment("100-L-1").map(|s| s.id.as_str()), Some("L-1"));
        assert_eq!(model.segments_touching("P-100"), vec!["L-1".to_string()]);
    }

    #[test]
    fn test_remove_nested() {
        let mut model = sample();
        let removed = model.remove_component("AG-100").unwrap();
        assert_eq!(removed.class, "agitator");
        assert!(model.component("AG-100").is_none());
        assert!(model.remove_component("missing").is_none());
    }
}
