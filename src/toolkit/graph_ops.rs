//! 图模型编辑原语

use super::{merge_properties, opt_object, opt_str, req_str, Payload, ToolkitError, ToolkitResult};
use crate::model::{GraphModel, Stream, UnitNode};
use crate::resolver::ResolvedTarget;
use crate::values::properties_from_json;

fn node_id(target: &ResolvedTarget) -> Result<&str, ToolkitError> {
    match target {
        ResolvedTarget::Component { id } => Ok(id),
        other => Err(ToolkitError::wrong_target(other)),
    }
}

fn stream_id(target: &ResolvedTarget) -> Result<&str, ToolkitError> {
    match target {
        ResolvedTarget::Stream { id } => Ok(id),
        other => Err(ToolkitError::wrong_target(other)),
    }
}

fn missing_node(id: &str) -> ToolkitError {
    ToolkitError::EntityNotFound {
        kind: "node",
        id: id.to_string(),
    }
}

fn missing_stream(id: &str) -> ToolkitError {
    ToolkitError::EntityNotFound {
        kind: "stream",
        id: id.to_string(),
    }
}

/// 按参数构造节点，id 缺省取位号，类型取 `kind` 或 `class`
fn build_node(model: &GraphModel, payload: &Payload, default_kind: &str) -> Result<UnitNode, ToolkitError> {
    let tag = req_str(payload, "tag")?;
    let id = opt_str(payload, "id")?.unwrap_or(tag);
    if model.contains_id(id) {
        return Err(ToolkitError::DuplicateEntity(id.to_string()));
    }
    let kind = match opt_str(payload, "kind")? {
        Some(kind) => kind,
        None => opt_str(payload, "class")?.unwrap_or(default_kind),
    };
    let mut node = UnitNode::new(id, kind);
    if let Some(props) = opt_object(payload, "properties")? {
        node.properties = properties_from_json(props);
    }
    Ok(node)
}

/// 新增工艺单元节点
pub fn insert_component(model: &mut GraphModel, target: &ResolvedTarget, payload: &Payload) -> ToolkitResult {
    if *target != ResolvedTarget::Model {
        return Err(ToolkitError::wrong_target(target));
    }
    let node = build_node(model, payload, "unit")?;
    let id = node.id.clone();
    if !model.add_node(node) {
        return Err(ToolkitError::DuplicateEntity(id));
    }
    Ok(vec![id])
}

pub fn update_component(model: &mut GraphModel, target: &ResolvedTarget, payload: &Payload) -> ToolkitResult {
    let id = node_id(target)?;
    let kind = opt_str(payload, "kind")?.or(opt_str(payload, "class")?);
    let props = opt_object(payload, "properties")?;
    let node = model.node_mut(id).ok_or_else(|| missing_node(id))?;
    if let Some(kind) = kind {
        node.kind = kind.to_string();
    }
    if let Some(props) = props {
        merge_properties(&mut node.properties, props)?;
    }
    Ok(vec![id.to_string()])
}

/// 删除节点，关联物流一并删除
pub fn remove_component(model: &mut GraphModel, target: &ResolvedTarget, _payload: &Payload) -> ToolkitResult {
    let id = node_id(target)?;
    let (node, streams) = model.remove_node(id).ok_or_else(|| missing_node(id))?;
    let mut mutated = vec![node.id];
    mutated.extend(streams);
    Ok(mutated)
}

/// 在物流上插入新节点，把物流拆成两段
///
/// 原物流保留 id，改为指向新节点；下游段使用 `downstream_id`，缺省为 `原id-b`
pub fn insert_inline_component(
    model: &mut GraphModel,
    target: &ResolvedTarget,
    payload: &Payload,
) -> ToolkitResult {
    let sid = stream_id(target)?;
    let original = model.stream(sid).cloned().ok_or_else(|| missing_stream(sid))?;
    let node = build_node(model, payload, "inline")?;
    let node_id = node.id.clone();

    let downstream_id = match opt_str(payload, "downstream_id")? {
        Some(id) => id.to_string(),
        None => format!("{}-b", original.id),
    };
    if downstream_id == node_id || model.contains_id(&downstream_id) {
        return Err(ToolkitError::DuplicateEntity(downstream_id));
    }

    if !model.add_node(node) {
        return Err(ToolkitError::DuplicateEntity(node_id));
    }
    if !model.reconnect_stream(sid, &original.source, &node_id) {
        return Err(ToolkitError::Rejected(format!("could not split stream '{}'", sid)));
    }
    let mut downstream = Stream::new(
        &downstream_id,
        &format!("{}-b", original.name),
        &node_id,
        &original.target,
    );
    downstream.properties = original.properties;
    if !model.add_stream(downstream) {
        return Err(ToolkitError::DuplicateEntity(downstream_id));
    }
    Ok(vec![node_id, sid.to_string(), downstream_id])
}

/// 重新连接物流的起点和/或终点
pub fn rewire_connection(model: &mut GraphModel, target: &ResolvedTarget, payload: &Payload) -> ToolkitResult {
    let sid = stream_id(target)?;
    let stream = model.stream(sid).ok_or_else(|| missing_stream(sid))?;
    let from = opt_str(payload, "from")?;
    let to = opt_str(payload, "to")?;
    if from.is_none() && to.is_none() {
        return Err(ToolkitError::MissingField("from".into()));
    }
    let source = from.unwrap_or(stream.source.as_str()).to_string();
    let target_node = to.unwrap_or(stream.target.as_str()).to_string();

    for end in [&source, &target_node] {
        if model.node(end).is_none() {
            return Err(missing_node(end));
        }
    }
    if !model.reconnect_stream(sid, &source, &target_node) {
        return Err(ToolkitError::Rejected(format!("could not rewire stream '{}'", sid)));
    }
    Ok(vec![sid.to_string()])
}

/// 修改物流名称和属性
pub fn update_stream_properties(
    model: &mut GraphModel,
    target: &ResolvedTarget,
    payload: &Payload,
) -> ToolkitResult {
    let sid = stream_id(target)?;
    let name = opt_str(payload, "name")?;
    let props = opt_object(payload, "properties")?;
    if name.is_none() && props.is_none() {
        return Err(ToolkitError::MissingField("properties".into()));
    }
    let stream = model.stream_mut(sid).ok_or_else(|| missing_stream(sid))?;
    if let Some(name) = name {
        stream.name = name.to_string();
    }
    if let Some(props) = props {
        merge_properties(&mut stream.properties, props)?;
    }
    Ok(vec![sid.to_string()])
}
