//! 工程模型
//!
//! 两种模型表示：
//! - 树模型 (TreeModel)：强类型的嵌套装置/设备数据
//! - 图模型 (GraphModel)：工艺流程有向图

pub mod graph;
pub mod tree;

pub use graph::{GraphModel, Stream, UnitNode};
pub use tree::{Component, Endpoint, Instrument, Port, Segment, TreeModel};

use crate::values::Properties;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{AsRefStr, Display, EnumString};

/// 实体 ID
pub type EntityId = String;

/// 模型表示类型
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelKind {
    Tree,
    Graph,
}

/// 模型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Model {
    Tree(TreeModel),
    Graph(GraphModel),
}

impl Model {
    pub fn kind(&self) -> ModelKind {
        match self {
            Model::Tree(_) => ModelKind::Tree,
            Model::Graph(_) => ModelKind::Graph,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Model::Tree(t) => &t.name,
            Model::Graph(g) => &g.name,
        }
    }

    pub fn contains_entity(&self, id: &str) -> bool {
        match self {
            Model::Tree(t) => t.contains_id(id),
            Model::Graph(g) => g.contains_id(id),
        }
    }

    pub fn entity_count(&self) -> usize {
        match self {
            Model::Tree(t) => t.entity_count(),
            Model::Graph(g) => g.node_count() + g.stream_count(),
        }
    }

    /// 把模型展平为 实体ID -> 实体内容，供差异计算使用
    ///
    /// 树模型中设备的内容不包含子设备（子设备各自是独立实体），但包含父设备 id，
    /// 管段的内容包含其在线元件的 id 列表
    pub fn entity_index(&self) -> BTreeMap<EntityId, EntityContent> {
        let mut index = BTreeMap::new();
        match self {
            Model::Tree(tree) => {
                index_components(&tree.components, None, &mut index);
                for seg in &tree.segments {
                    index.insert(
                        seg.id.clone(),
                        EntityContent::Segment {
                            tag: seg.tag.clone(),
                            from: seg.from.clone(),
                            to: seg.to.clone(),
                            properties: seg.properties.clone(),
                            inline: seg.inline.iter().map(|c| c.id.clone()).collect(),
                        },
                    );
                    index_components(&seg.inline, Some(&seg.id), &mut index);
                }
            }
            Model::Graph(graph) => {
                for node in graph.nodes() {
                    index.insert(node.id.clone(), EntityContent::Node(node.clone()));
                }
                for stream in graph.streams() {
                    index.insert(stream.id.clone(), EntityContent::Stream(stream.clone()));
                }
            }
        }
        index
    }
}

impl From<TreeModel> for Model {
    fn from(t: TreeModel) -> Self {
        Model::Tree(t)
    }
}

impl From<GraphModel> for Model {
    fn from(g: GraphModel) -> Self {
        Model::Graph(g)
    }
}

/// 展平后的实体内容
#[derive(Debug, Clone, PartialEq)]
pub enum EntityContent {
    Component {
        tag: String,
        class: String,
        properties: Properties,
        ports: Vec<Port>,
        instruments: Vec<Instrument>,
        parent: Option<EntityId>,
    },
    Segment {
        tag: String,
        from: Option<Endpoint>,
        to: Option<Endpoint>,
        properties: Properties,
        inline: Vec<EntityId>,
    },
    Node(UnitNode),
    Stream(Stream),
}

fn index_components(
    list: &[Component],
    parent: Option<&str>,
    index: &mut BTreeMap<EntityId, EntityContent>,
) {
    for c in list {
        index.insert(
            c.id.clone(),
            EntityContent::Component {
                tag: c.tag.clone(),
                class: c.class.clone(),
                properties: c.properties.clone(),
                ports: c.ports.clone(),
                instruments: c.instruments.clone(),
                parent: parent.map(str::to_string),
            },
        );
        index_components(&c.children, Some(&c.id), index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_index_excludes_children_content() {
        let mut tree = TreeModel::new("t");
        let mut tank = Component::new("TK-1", "TK-1", "tank");
        tank.children.push(Component::new("AG-1", "AG-1", "agitator"));
        tree.components.push(tank);
        let before = Model::Tree(tree.clone()).entity_index();

        tree.component_mut("AG-1")
            .unwrap()
            .properties
            .insert("rpm".into(), crate::values::Value::Int(60));
        let after = Model::Tree(tree).entity_index();

        assert_eq!(before.get("TK-1"), after.get("TK-1"));
        assert_ne!(before.get("AG-1"), after.get("AG-1"));
    }

    #[test]
    fn test_model_kind_names() {
        assert_eq!(ModelKind::Tree.to_string(), "tree");
        assert_eq!("graph".parse::<ModelKind>().unwrap(), ModelKind::Graph);
    }
}
