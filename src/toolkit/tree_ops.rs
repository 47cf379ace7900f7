//! 树模型编辑原语

use super::{
    merge_properties, opt_bool, opt_index, opt_object, opt_str, opt_str_list, req_str, Payload,
    ToolkitError, ToolkitResult,
};
use crate::model::{Component, EntityId, Endpoint, Instrument, Port, TreeModel};
use crate::resolver::{ResolvedTarget, PORT_SEPARATOR};
use crate::values::properties_from_json;

/// 按参数构造设备，id 缺省取位号
fn build_component(
    model: &TreeModel,
    payload: &Payload,
    default_class: &str,
) -> Result<Component, ToolkitError> {
    let tag = req_str(payload, "tag")?;
    let id = opt_str(payload, "id")?.unwrap_or(tag);
    if model.contains_id(id) {
        return Err(ToolkitError::DuplicateEntity(id.to_string()));
    }
    let class = opt_str(payload, "class")?.unwrap_or(default_class);

    let mut component = Component::new(id, tag, class);
    if let Some(props) = opt_object(payload, "properties")? {
        component.properties = properties_from_json(props);
    }
    component.ports = opt_str_list(payload, "ports")?
        .iter()
        .map(|label| Port::new(label))
        .collect();
    Ok(component)
}

fn component_id(target: &ResolvedTarget) -> Result<&str, ToolkitError> {
    match target {
        ResolvedTarget::Component { id } => Ok(id),
        other => Err(ToolkitError::wrong_target(other)),
    }
}

fn segment_id(target: &ResolvedTarget) -> Result<&str, ToolkitError> {
    match target {
        ResolvedTarget::Segment { id } => Ok(id),
        other => Err(ToolkitError::wrong_target(other)),
    }
}

fn subtree_ids(component: &Component, out: &mut Vec<EntityId>) {
    out.push(component.id.clone());
    for child in &component.children {
        subtree_ids(child, out);
    }
}

/// 解析 `设备` 或 `设备/接口` 形式的端点，设备可以用 id 或位号
fn parse_endpoint(model: &TreeModel, field: &str, raw: &str) -> Result<Endpoint, ToolkitError> {
    let (component, port) = match raw.rsplit_once(PORT_SEPARATOR) {
        Some((c, p)) => (c, Some(p)),
        None => (raw, None),
    };
    let found = model
        .component(component)
        .or_else(|| model.component_by_tag(component))
        .ok_or_else(|| ToolkitError::EntityNotFound {
            kind: "component",
            id: component.to_string(),
        })?;
    if let Some(label) = port {
        if found.port(label).is_none() {
            return Err(ToolkitError::InvalidField {
                field: field.to_string(),
                message: format!("component '{}' has no port '{}'", found.tag, label),
            });
        }
    }
    Ok(Endpoint::new(&found.id, port))
}

/// 新增设备：目标为模型时放在顶层，目标为设备时作为其子设备
pub fn insert_component(model: &mut TreeModel, target: &ResolvedTarget, payload: &Payload) -> ToolkitResult {
    let component = build_component(model, payload, "equipment")?;
    let id = component.id.clone();
    match target {
        ResolvedTarget::Model => model.components.push(component),
        ResolvedTarget::Component { id: parent } => {
            let parent = model
                .component_mut(parent)
                .ok_or_else(|| ToolkitError::EntityNotFound {
                    kind: "component",
                    id: parent.clone(),
                })?;
            parent.children.push(component);
        }
        other => return Err(ToolkitError::wrong_target(other)),
    }
    Ok(vec![id])
}

/// 更新设备类别和属性
pub fn update_component(model: &mut TreeModel, target: &ResolvedTarget, payload: &Payload) -> ToolkitResult {
    let id = component_id(target)?;
    let class = opt_str(payload, "class")?;
    let props = opt_object(payload, "properties")?;
    let component = model
        .component_mut(id)
        .ok_or_else(|| ToolkitError::EntityNotFound {
            kind: "component",
            id: id.to_string(),
        })?;
    if let Some(class) = class {
        component.class = class.to_string();
    }
    if let Some(props) = props {
        merge_properties(&mut component.properties, props)?;
    }
    Ok(vec![id.to_string()])
}

/// 删除设备及其子设备，引用它们的管段端点被断开
pub fn remove_component(model: &mut TreeModel, target: &ResolvedTarget, _payload: &Payload) -> ToolkitResult {
    let id = component_id(target)?;
    let host_segment = model.segment_of_inline(id).map(str::to_string);
    let removed = model
        .remove_component(id)
        .ok_or_else(|| ToolkitError::EntityNotFound {
            kind: "component",
            id: id.to_string(),
        })?;

    let mut mutated = Vec::new();
    subtree_ids(&removed, &mut mutated);

    let mut affected: Vec<EntityId> = host_segment.into_iter().collect();
    for seg in model.segments.iter_mut() {
        let mut detached = false;
        for end in [&mut seg.from, &mut seg.to] {
            if end.as_ref().is_some_and(|e| mutated.contains(&e.component)) {
                *end = None;
                detached = true;
            }
        }
        if detached && !affected.contains(&seg.id) {
            affected.push(seg.id.clone());
        }
    }
    mutated.extend(affected);
    Ok(mutated)
}

/// 在管段上插入在线元件，`position` 缺省时追加到末尾
pub fn insert_inline_component(
    model: &mut TreeModel,
    target: &ResolvedTarget,
    payload: &Payload,
) -> ToolkitResult {
    let seg_id = segment_id(target)?;
    let component = build_component(model, payload, "inline")?;
    let position = opt_index(payload, "position")?;
    let id = component.id.clone();

    let segment = model
        .segment_mut(seg_id)
        .ok_or_else(|| ToolkitError::EntityNotFound {
            kind: "segment",
            id: seg_id.to_string(),
        })?;
    let at = position.unwrap_or(segment.inline.len()).min(segment.inline.len());
    segment.inline.insert(at, component);
    Ok(vec![id, seg_id.to_string()])
}

/// 重新连接管段的起点和/或终点
pub fn rewire_connection(model: &mut TreeModel, target: &ResolvedTarget, payload: &Payload) -> ToolkitResult {
    let seg_id = segment_id(target)?;
    let from = opt_str(payload, "from")?
        .map(|raw| parse_endpoint(model, "from", raw))
        .transpose()?;
    let to = opt_str(payload, "to")?
        .map(|raw| parse_endpoint(model, "to", raw))
        .transpose()?;
    if from.is_none() && to.is_none() {
        return Err(ToolkitError::MissingField("from".into()));
    }

    let segment = model
        .segment_mut(seg_id)
        .ok_or_else(|| ToolkitError::EntityNotFound {
            kind: "segment",
            id: seg_id.to_string(),
        })?;
    if from.is_some() {
        segment.from = from;
    }
    if to.is_some() {
        segment.to = to;
    }
    Ok(vec![seg_id.to_string()])
}

/// 修改设备或管段的位号及位号属性
pub fn set_tag_properties(model: &mut TreeModel, target: &ResolvedTarget, payload: &Payload) -> ToolkitResult {
    let new_tag = opt_str(payload, "tag")?;
    let props = opt_object(payload, "properties")?;

    let (id, tag, properties) = match target {
        ResolvedTarget::Component { id } => {
            let c = model
                .component_mut(id)
                .ok_or_else(|| ToolkitError::EntityNotFound {
                    kind: "component",
                    id: id.clone(),
                })?;
            (id, &mut c.tag, &mut c.properties)
        }
        ResolvedTarget::Segment { id } => {
            let s = model
                .segment_mut(id)
                .ok_or_else(|| ToolkitError::EntityNotFound {
                    kind: "segment",
                    id: id.clone(),
                })?;
            (id, &mut s.tag, &mut s.properties)
        }
        other => return Err(ToolkitError::wrong_target(other)),
    };
    if let Some(new_tag) = new_tag {
        *tag = new_tag.to_string();
    }
    if let Some(props) = props {
        merge_properties(properties, props)?;
    }
    Ok(vec![id.clone()])
}

/// 切换仪表启用状态；仪表不存在时按参数新增
///
/// 给出 `enabled` 时直接设置，否则取反
pub fn toggle_instrumentation(
    model: &mut TreeModel,
    target: &ResolvedTarget,
    payload: &Payload,
) -> ToolkitResult {
    let id = component_id(target)?;
    let tag = req_str(payload, "instrument")?;
    let kind = opt_str(payload, "kind")?;
    let enabled = opt_bool(payload, "enabled")?;

    let component = model
        .component_mut(id)
        .ok_or_else(|| ToolkitError::EntityNotFound {
            kind: "component",
            id: id.to_string(),
        })?;
    match component.instrument_mut(tag) {
        Some(instrument) => {
            instrument.enabled = enabled.unwrap_or(!instrument.enabled);
            if let Some(kind) = kind {
                instrument.kind = kind.to_string();
            }
        }
        None => component.instruments.push(Instrument {
            tag: tag.to_string(),
            kind: kind.unwrap_or("indicator").to_string(),
            enabled: enabled.unwrap_or(true),
        }),
    }
    Ok(vec![id.to_string()])
}
