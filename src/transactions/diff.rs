// 结构差异
//
// 比较事务前快照和事务后的工作模型，按净效果把实体归入 added / removed / updated

use crate::model::{EntityId, Model};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

/// 结构差异：同一实体 id 最多出现在一个集合里
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralDiff {
    pub added: Vec<EntityId>,
    pub removed: Vec<EntityId>,
    pub updated: Vec<EntityId>,
}

impl StructuralDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.updated.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.added.iter().any(|x| x == id)
            || self.removed.iter().any(|x| x == id)
            || self.updated.iter().any(|x| x == id)
    }
}

/// 计算差异
///
/// `touched` 是执行期间处理器上报的被修改实体；同时做一遍全量结构比较，
/// 未上报但实际变化的实体也会被归类（并记一条 warn）。
/// 上报过、前后都存在但内容未变的实体归入 updated；事务内先增后删的实体
/// 前后都不存在，不出现在任何集合中。
pub fn diff(before: &Model, after: &Model, touched: &BTreeSet<EntityId>) -> StructuralDiff {
    let before_index = before.entity_index();
    let after_index = after.entity_index();

    let mut candidates: BTreeSet<&str> = touched.iter().map(String::as_str).collect();
    let mut unreported = Vec::new();

    for (id, content) in &before_index {
        if after_index.get(id) != Some(content) && candidates.insert(id.as_str()) {
            unreported.push(id.as_str());
        }
    }
    for id in after_index.keys() {
        if !before_index.contains_key(id) && candidates.insert(id.as_str()) {
            unreported.push(id.as_str());
        }
    }

    if !unreported.is_empty() {
        warn!(?unreported, "structural changes not reported by handlers");
    }

    let mut result = StructuralDiff::default();
    for id in candidates {
        match (before_index.contains_key(id), after_index.contains_key(id)) {
            (false, true) => result.added.push(id.to_string()),
            (true, false) => result.removed.push(id.to_string()),
            (true, true) => result.updated.push(id.to_string()),
            (false, false) => {}
        }
    }
    result
}
