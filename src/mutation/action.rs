//! 动作与调度表
//!
//! 调度表是两级映射：动作 -> 模型表示 -> 处理单元。
//! 单元可以是处理函数、不适用、或未实现（附带替代动作）。

use crate::model::{GraphModel, Model, ModelKind, TreeModel};
use crate::resolver::ResolvedTarget;
use crate::toolkit::{graph_ops, tree_ops, Payload, ToolkitError, ToolkitResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// 编辑动作
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    InsertComponent,
    UpdateComponent,
    RemoveComponent,
    InsertInlineComponent,
    RewireConnection,
    SetTagProperties,
    SplitSegment,
    MergeSegments,
    UpdateStreamProperties,
    ToggleInstrumentation,
}

impl ActionKind {
    pub fn all() -> impl Iterator<Item = ActionKind> {
        ActionKind::iter()
    }
}

/// 处理函数
pub type HandlerFn = Arc<dyn Fn(&mut Model, &ResolvedTarget, &Payload) -> ToolkitResult + Send + Sync>;

pub type TreeHandler = fn(&mut TreeModel, &ResolvedTarget, &Payload) -> ToolkitResult;
pub type GraphHandler = fn(&mut GraphModel, &ResolvedTarget, &Payload) -> ToolkitResult;

/// 调度表单元
#[derive(Clone)]
pub enum HandlerCell {
    Handler(HandlerFn),
    NotApplicable,
    NotImplemented { alternative: ActionKind },
}

impl fmt::Debug for HandlerCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerCell::Handler(_) => write!(f, "Handler"),
            HandlerCell::NotApplicable => write!(f, "NotApplicable"),
            HandlerCell::NotImplemented { alternative } => {
                write!(f, "NotImplemented({})", alternative)
            }
        }
    }
}

/// 调度表
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    cells: HashMap<ActionKind, HashMap<ModelKind, HandlerCell>>,
}

impl DispatchTable {
    /// 空表：所有单元都是不适用
    pub fn empty() -> Self {
        Self::default()
    }

    /// 内置编辑原语
    pub fn standard() -> Self {
        use ActionKind::*;
        let mut table = Self::empty();

        table.register_tree(InsertComponent, tree_ops::insert_component);
        table.register_tree(UpdateComponent, tree_ops::update_component);
        table.register_tree(RemoveComponent, tree_ops::remove_component);
        table.register_tree(InsertInlineComponent, tree_ops::insert_inline_component);
        table.register_tree(RewireConnection, tree_ops::rewire_connection);
        table.register_tree(SetTagProperties, tree_ops::set_tag_properties);
        table.register_tree(ToggleInstrumentation, tree_ops::toggle_instrumentation);

        table.register_graph(InsertComponent, graph_ops::insert_component);
        table.register_graph(UpdateComponent, graph_ops::update_component);
        table.register_graph(RemoveComponent, graph_ops::remove_component);
        table.register_graph(InsertInlineComponent, graph_ops::insert_inline_component);
        table.register_graph(RewireConnection, graph_ops::rewire_connection);
        table.register_graph(UpdateStreamProperties, graph_ops::update_stream_properties);

        table.mark_not_implemented(SplitSegment, InsertInlineComponent);
        table.mark_not_implemented(MergeSegments, RewireConnection);
        table
    }

    pub fn set(&mut self, action: ActionKind, kind: ModelKind, cell: HandlerCell) {
        self.cells.entry(action).or_default().insert(kind, cell);
    }

    pub fn register(&mut self, action: ActionKind, kind: ModelKind, handler: HandlerFn) {
        self.set(action, kind, HandlerCell::Handler(handler));
    }

    pub fn register_tree(&mut self, action: ActionKind, handler: TreeHandler) {
        let f: HandlerFn = Arc::new(move |model: &mut Model, target: &ResolvedTarget, payload: &Payload| match model {
            Model::Tree(tree) => handler(tree, target, payload),
            other => Err(ToolkitError::Rejected(format!(
                "tree handler invoked on {} model",
                other.kind()
            ))),
        });
        self.register(action, ModelKind::Tree, f);
    }

    pub fn register_graph(&mut self, action: ActionKind, handler: GraphHandler) {
        let f: HandlerFn = Arc::new(move |model: &mut Model, target: &ResolvedTarget, payload: &Payload| match model {
            Model::Graph(graph) => handler(graph, target, payload),
            other => Err(ToolkitError::Rejected(format!(
                "graph handler invoked on {} model",
                other.kind()
            ))),
        });
        self.register(action, ModelKind::Graph, f);
    }

    /// 对所有模型表示标记为未实现
    pub fn mark_not_implemented(&mut self, action: ActionKind, alternative: ActionKind) {
        for kind in [ModelKind::Tree, ModelKind::Graph] {
            self.set(action, kind, HandlerCell::NotImplemented { alternative });
        }
    }

    /// 查表，缺失的单元视为不适用
    pub fn lookup(&self, action: ActionKind, kind: ModelKind) -> HandlerCell {
        self.cells
            .get(&action)
            .and_then(|row| row.get(&kind))
            .cloned()
            .unwrap_or(HandlerCell::NotApplicable)
    }
}
