//! 图模型
//!
//! 工艺流程有向图：节点是工艺单元，边是物流（stream）。
//! 维护出边/入边邻接表，节点和物流共用同一个 id 命名空间。

use crate::values::{properties_size, Properties};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::EntityId;

/// 工艺单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitNode {
    pub id: EntityId,
    pub kind: String,
    pub properties: Properties,
}

impl UnitNode {
    pub fn new(id: &str, kind: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            properties: Properties::new(),
        }
    }
}

/// 物流（有向边）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub id: EntityId,
    pub name: String,
    pub source: EntityId,
    pub target: EntityId,
    pub properties: Properties,
}

impl Stream {
    pub fn new(id: &str, name: &str, source: &str, target: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            properties: Properties::new(),
        }
    }
}

/// 图模型
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphModel {
    pub name: String,
    nodes: BTreeMap<EntityId, UnitNode>,
    streams: BTreeMap<EntityId, Stream>,
    outgoing: BTreeMap<EntityId, Vec<EntityId>>,
    incoming: BTreeMap<EntityId, Vec<EntityId>>,
}

impl GraphModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// 添加节点，id 已被占用时返回 false
    pub fn add_node(&mut self, node: UnitNode) -> bool {
        if self.contains_id(&node.id) {
            return false;
        }
        self.nodes.insert(node.id.clone(), node);
        true
    }

    /// 添加物流，id 已被占用或端点不存在时返回 false
    pub fn add_stream(&mut self, stream: Stream) -> bool {
        if self.contains_id(&stream.id)
            || !self.nodes.contains_key(&stream.source)
            || !self.nodes.contains_key(&stream.target)
        {
            return false;
        }
        self.outgoing
            .entry(stream.source.clone())
            .or_default()
            .push(stream.id.clone());
        self.incoming
            .entry(stream.target.clone())
            .or_default()
            .push(stream.id.clone());
        self.streams.insert(stream.id.clone(), stream);
        true
    }

    pub fn node(&self, id: &str) -> Option<&UnitNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut UnitNode> {
        self.nodes.get_mut(id)
    }

    pub fn stream(&self, id: &str) -> Option<&Stream> {
        self.streams.get(id)
    }

    pub fn stream_mut(&mut self, id: &str) -> Option<&mut Stream> {
        self.streams.get_mut(id)
    }

    /// 按名称查找物流
    pub fn stream_by_name(&self, name: &str) -> Option<&Stream> {
        self.streams.values().find(|s| s.name == name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &UnitNode> + '_ {
        self.nodes.values()
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> + '_ {
        self.streams.values()
    }

    pub fn outgoing_streams(&self, node: &str) -> impl Iterator<Item = &Stream> + '_ {
        self.outgoing
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(move |sid| self.streams.get(sid))
    }

    pub fn incoming_streams(&self, node: &str) -> impl Iterator<Item = &Stream> + '_ {
        self.incoming
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(move |sid| self.streams.get(sid))
    }

    /// 删除节点（会同时删除所有关联的物流），返回被删除的物流 id
    pub fn remove_node(&mut self, id: &str) -> Option<(UnitNode, Vec<EntityId>)> {
        if !self.nodes.contains_key(id) {
            return None;
        }

        let mut streams_to_delete = Vec::new();
        if let Some(out) = self.outgoing.get(id) {
            streams_to_delete.extend(out.iter().cloned());
        }
        if let Some(inc) = self.incoming.get(id) {
            streams_to_delete.extend(inc.iter().cloned());
        }
        streams_to_delete.sort();
        streams_to_delete.dedup();

        for sid in &streams_to_delete {
            self.remove_stream(sid);
        }

        self.outgoing.remove(id);
        self.incoming.remove(id);
        self.nodes.remove(id).map(|node| (node, streams_to_delete))
    }

    pub fn remove_stream(&mut self, id: &str) -> Option<Stream> {
        let stream = self.streams.remove(id)?;
        if let Some(out) = self.outgoing.get_mut(&stream.source) {
            out.retain(|s| s != id);
        }
        if let Some(inc) = self.incoming.get_mut(&stream.target) {
            inc.retain(|s| s != id);
        }
        Some(stream)
    }

    /// 修改物流的起点/终点，并同步邻接表
    pub fn reconnect_stream(&mut self, id: &str, source: &str, target: &str) -> bool {
        if !self.nodes.contains_key(source) || !self.nodes.contains_key(target) {
            return false;
        }
        let Some(mut stream) = self.remove_stream(id) else {
            return false;
        };
        stream.source = source.to_string();
        stream.target = target.to_string();
        self.add_stream(stream)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.nodes.contains_key(id) || self.streams.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub(crate) fn approx_size(&self) -> usize {
        let nodes: usize = self
            .nodes
            .values()
            .map(|n| 2 * n.id.len() + n.kind.len() + properties_size(&n.properties))
            .sum();
        let streams: usize = self
            .streams
            .values()
            .map(|s| {
                // id 在 streams 和两个邻接表里各出现一次
                4 * s.id.len()
                    + s.name.len()
                    + s.source.len()
                    + s.target.len()
                    + properties_size(&s.properties)
            })
            .sum();
        self.name.len() + nodes + streams
    }
}
