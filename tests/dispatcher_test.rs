// 变更调度器测试
// 覆盖单次调度、试运行、显式多步事务、失败回滚、调度表矩阵

use rs_model_edit::codec::{serializer_for, SerialFormat};
use rs_model_edit::model::{Component, Endpoint, GraphModel, Model, Segment, Stream, TreeModel, UnitNode};
use rs_model_edit::mutation::{ActionKind, DispatchTable, ExecuteOptions, MutationDispatcher};
use rs_model_edit::resolver::{ResolvedTarget, TargetSelector};
use rs_model_edit::store::{InMemoryModelStore, ModelStore};
use rs_model_edit::toolkit::{Payload, ToolkitError, ToolkitResult};
use rs_model_edit::transactions::{OperationOutcome, TransactionConfig, TransactionStatus};
use rs_model_edit::validation::{ConstraintValidator, ModelConstraint};
use rs_model_edit::{ModelKind, MutationError};
use serde_json::json;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

// 辅助函数：树模型装置
fn create_plant() -> Model {
    let mut tree = TreeModel::new("unit-100");
    tree.components.push(
        Component::new("TK-100", "TK-100", "tank")
            .with_port("N1")
            .with_property("volume", 80.0),
    );
    tree.components.push(
        Component::new("P-100", "P-100", "pump")
            .with_port("suction")
            .with_port("discharge"),
    );
    tree.components.push(Component::new("E-100", "E-100", "exchanger").with_port("in"));
    tree.segments.push(Segment::new("L-1", "100-L-1").connect(
        Endpoint::new("TK-100", Some("N1")),
        Endpoint::new("P-100", Some("suction")),
    ));
    Model::Tree(tree)
}

// 辅助函数：图模型流程
fn create_flowsheet() -> Model {
    let mut graph = GraphModel::new("fs-1");
    graph.add_node(UnitNode::new("R-1", "reactor"));
    graph.add_node(UnitNode::new("C-1", "column"));
    graph.add_stream(Stream::new("S-1", "effluent", "R-1", "C-1"));
    Model::Graph(graph)
}

// 辅助函数：准备调度器
fn setup(config: TransactionConfig) -> (Arc<InMemoryModelStore>, MutationDispatcher<InMemoryModelStore>) {
    let store = Arc::new(InMemoryModelStore::new());
    store.insert("M1", create_plant());
    store.insert("G1", create_flowsheet());
    let dispatcher = MutationDispatcher::with_config(Arc::clone(&store), config);
    (store, dispatcher)
}

fn payload(v: serde_json::Value) -> Payload {
    v.as_object().cloned().unwrap_or_default()
}

fn encoded(store: &InMemoryModelStore, id: &str) -> Vec<u8> {
    serializer_for(SerialFormat::Bincode)
        .serialize(&store.get(id).unwrap())
        .unwrap()
}

#[test]
fn test_insert_component_commits() {
    let (store, dispatcher) = setup(TransactionConfig::default());

    let outcome = dispatcher
        .execute(
            "M1",
            ActionKind::InsertComponent,
            &TargetSelector::model(),
            &payload(json!({"tag": "TK-101", "class": "tank"})),
            ExecuteOptions::default(),
        )
        .unwrap();

    let diff = outcome.diff.unwrap();
    assert_eq!(diff.added, vec!["TK-101"]);
    assert!(diff.removed.is_empty());
    assert!(diff.updated.is_empty());
    assert_eq!(outcome.mutated_entities, vec!["TK-101"]);
    assert!(!outcome.dry_run);

    let tx_id = outcome.transaction_id.unwrap();
    assert_eq!(
        dispatcher.transactions().status(tx_id),
        Some(TransactionStatus::Committed)
    );
    assert!(store.get("M1").unwrap().contains_entity("TK-101"));
}

#[test]
fn test_dry_run_leaves_canonical_untouched() {
    let (store, dispatcher) = setup(TransactionConfig::default());
    let before = encoded(&store, "M1");

    let outcome = dispatcher
        .execute(
            "M1",
            ActionKind::InsertComponent,
            &TargetSelector::model(),
            &payload(json!({"tag": "TK-101"})),
            ExecuteOptions::dry_run(),
        )
        .unwrap();

    assert!(outcome.dry_run);
    assert!(outcome.transaction_id.is_none());
    assert_eq!(outcome.diff.unwrap().added, vec!["TK-101"]);
    assert_eq!(encoded(&store, "M1"), before);
    assert_eq!(dispatcher.transactions().completed_count(), 0);
    assert_eq!(dispatcher.transactions().active_count(), 0);
}

#[test]
fn test_dry_run_serialized_copy_isolation() {
    let (store, dispatcher) = setup(TransactionConfig {
        snapshot_threshold_bytes: 0,
        ..Default::default()
    });
    let before = encoded(&store, "M1");

    let outcome = dispatcher
        .execute(
            "M1",
            ActionKind::RemoveComponent,
            &TargetSelector::component("P-100"),
            &Payload::new(),
            ExecuteOptions::dry_run(),
        )
        .unwrap();

    let diff = outcome.diff.unwrap();
    assert_eq!(diff.removed, vec!["P-100"]);
    assert_eq!(diff.updated, vec!["L-1"]);
    assert_eq!(encoded(&store, "M1"), before);
}

#[test]
fn test_split_segment_not_implemented() {
    let (store, dispatcher) = setup(TransactionConfig::default());
    let before = encoded(&store, "M1");

    let err = dispatcher
        .execute(
            "M1",
            ActionKind::SplitSegment,
            &TargetSelector::segment("L-1"),
            &Payload::new(),
            ExecuteOptions::default(),
        )
        .unwrap_err();

    match &err {
        MutationError::NotImplemented { action, alternative } => {
            assert_eq!(action, "split_segment");
            assert_eq!(alternative, "insert_inline_component");
        }
        other => panic!("expected NotImplemented, got {:?}", other),
    }
    assert_eq!(err.code(), "NOT_IMPLEMENTED");
    assert_eq!(encoded(&store, "M1"), before);
    assert_eq!(dispatcher.transactions().completed_count(), 0);
}

#[test]
fn test_action_not_applicable_for_representation() {
    let (_, dispatcher) = setup(TransactionConfig::default());

    let err = dispatcher
        .execute(
            "G1",
            ActionKind::SetTagProperties,
            &TargetSelector::component("R-1"),
            &payload(json!({"tag": "R-1A"})),
            ExecuteOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, MutationError::ActionNotApplicable { .. }));

    let err = dispatcher
        .execute(
            "M1",
            ActionKind::UpdateStreamProperties,
            &TargetSelector::model(),
            &payload(json!({"name": "x"})),
            ExecuteOptions::default(),
        )
        .unwrap_err();
    match err {
        MutationError::ActionNotApplicable { model_kind, .. } => assert_eq!(model_kind, "tree"),
        other => panic!("expected ActionNotApplicable, got {:?}", other),
    }
}

#[test]
fn test_validate_after_failure_rolls_back() {
    let (store, dispatcher) = setup(TransactionConfig::default());
    let dispatcher = dispatcher.with_validator(
        ConstraintValidator::standard().with(ModelConstraint::required_property("tank", "volume")),
    );

    let err = dispatcher
        .execute(
            "M1",
            ActionKind::InsertComponent,
            &TargetSelector::model(),
            &payload(json!({"tag": "TK-101", "class": "tank"})),
            ExecuteOptions::with_post_validation(),
        )
        .unwrap_err();

    match &err {
        MutationError::ValidationError { result } => {
            assert!(!result.valid);
            assert!(result.errors[0].contains("TK-101"));
        }
        other => panic!("expected ValidationError, got {:?}", other),
    }
    assert!(!store.get("M1").unwrap().contains_entity("TK-101"));

    let history = dispatcher.transactions().history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TransactionStatus::Failed);
    assert_eq!(dispatcher.transactions().active_count(), 0);
}

#[test]
fn test_validate_after_success_reports_result() {
    let (_, dispatcher) = setup(TransactionConfig::default());
    let outcome = dispatcher
        .execute(
            "M1",
            ActionKind::InsertComponent,
            &TargetSelector::model(),
            &payload(json!({"tag": "TK-102", "class": "tank", "properties": {"volume": 12}})),
            ExecuteOptions::with_post_validation(),
        )
        .unwrap();
    assert!(outcome.validation.valid);
}

#[test]
fn test_handler_failure_rolls_back() {
    let (store, dispatcher) = setup(TransactionConfig::default());
    let before = encoded(&store, "M1");

    // P-100 已经存在
    let err = dispatcher
        .execute(
            "M1",
            ActionKind::InsertComponent,
            &TargetSelector::model(),
            &payload(json!({"tag": "P-100"})),
            ExecuteOptions::default(),
        )
        .unwrap_err();

    match &err {
        MutationError::OperationExecutionError { action, source } => {
            assert_eq!(action, "insert_component");
            assert_eq!(*source, ToolkitError::DuplicateEntity("P-100".into()));
        }
        other => panic!("expected OperationExecutionError, got {:?}", other),
    }
    assert_eq!(encoded(&store, "M1"), before);
    assert_eq!(
        dispatcher.transactions().history()[0].status,
        TransactionStatus::Failed
    );
}

#[test]
fn test_panicking_handler_is_contained() {
    let (store, mut dispatcher) = setup(TransactionConfig::default());
    dispatcher.table_mut().register(
        ActionKind::MergeSegments,
        ModelKind::Tree,
        Arc::new(|model: &mut Model, _: &ResolvedTarget, _: &Payload| -> ToolkitResult {
            if let Model::Tree(tree) = model {
                tree.segments.clear();
            }
            panic!("merge blew up")
        }),
    );
    let before = encoded(&store, "M1");

    let err = dispatcher
        .execute(
            "M1",
            ActionKind::MergeSegments,
            &TargetSelector::segment("L-1"),
            &Payload::new(),
            ExecuteOptions::default(),
        )
        .unwrap_err();

    assert!(matches!(err, MutationError::OperationExecutionError { .. }));
    assert!(err.to_string().contains("merge blew up"));
    assert_eq!(encoded(&store, "M1"), before);
    assert_eq!(dispatcher.transactions().active_count(), 0);
}

#[test]
fn test_target_not_found_opens_no_transaction() {
    let (_, dispatcher) = setup(TransactionConfig::default());

    let err = dispatcher
        .execute(
            "M1",
            ActionKind::UpdateComponent,
            &TargetSelector::component("P-999"),
            &payload(json!({"class": "pump"})),
            ExecuteOptions::default(),
        )
        .unwrap_err();

    assert_eq!(err.code(), "TARGET_NOT_FOUND");
    assert_eq!(dispatcher.transactions().completed_count(), 0);
    assert_eq!(dispatcher.transactions().active_count(), 0);
}

#[test]
fn test_payload_pre_validation() {
    let (_, dispatcher) = setup(TransactionConfig::default());

    let err = dispatcher
        .execute(
            "M1",
            ActionKind::InsertComponent,
            &TargetSelector::model(),
            &payload(json!({"class": "tank"})),
            ExecuteOptions::default(),
        )
        .unwrap_err();
    match err {
        MutationError::AttributeValidationFailed { errors, .. } => {
            assert_eq!(errors, vec!["missing required field 'tag'"]);
        }
        other => panic!("expected AttributeValidationFailed, got {:?}", other),
    }
    assert_eq!(dispatcher.transactions().completed_count(), 0);

    // 关闭预校验后由处理函数报告缺失字段
    let err = dispatcher
        .execute(
            "M1",
            ActionKind::InsertComponent,
            &TargetSelector::model(),
            &payload(json!({"class": "tank"})),
            ExecuteOptions {
                validate_before: false,
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, MutationError::OperationExecutionError { .. }));
}

#[test]
fn test_model_not_found() {
    let (_, dispatcher) = setup(TransactionConfig::default());
    let err = dispatcher
        .execute(
            "missing",
            ActionKind::RemoveComponent,
            &TargetSelector::component("P-100"),
            &Payload::new(),
            ExecuteOptions::default(),
        )
        .unwrap_err();
    assert_eq!(err.code(), "MODEL_NOT_FOUND");
}

#[test]
fn test_execute_fails_while_explicit_transaction_open() {
    let (_, dispatcher) = setup(TransactionConfig::default());
    let tx_id = dispatcher.begin("M1").unwrap();

    let err = dispatcher
        .execute(
            "M1",
            ActionKind::InsertComponent,
            &TargetSelector::model(),
            &payload(json!({"tag": "TK-101"})),
            ExecuteOptions::default(),
        )
        .unwrap_err();
    match err {
        MutationError::TransactionAlreadyActive { tx_id: existing, .. } => assert_eq!(existing, tx_id),
        other => panic!("expected TransactionAlreadyActive, got {:?}", other),
    }

    // 不开事务的直接编辑同样被拒绝
    let err = dispatcher
        .execute(
            "M1",
            ActionKind::InsertComponent,
            &TargetSelector::model(),
            &payload(json!({"tag": "TK-101"})),
            ExecuteOptions::direct(),
        )
        .unwrap_err();
    assert_eq!(err.code(), "TRANSACTION_ALREADY_ACTIVE");
}

#[test]
fn test_direct_edit_without_transaction() {
    let (store, dispatcher) = setup(TransactionConfig::default());
    let outcome = dispatcher
        .execute(
            "M1",
            ActionKind::ToggleInstrumentation,
            &TargetSelector::component("P-100"),
            &payload(json!({"instrument": "PI-100", "kind": "pressure"})),
            ExecuteOptions::direct(),
        )
        .unwrap();

    assert!(outcome.transaction_id.is_none());
    assert_eq!(outcome.diff.unwrap().updated, vec!["P-100"]);
    assert_eq!(dispatcher.transactions().active_count(), 0);
    assert_eq!(
        dispatcher.transactions().history()[0].status,
        TransactionStatus::Committed
    );

    let model = store.get("M1").unwrap();
    let Model::Tree(tree) = model.as_ref() else {
        panic!("expected tree model");
    };
    assert!(tree.component("P-100").unwrap().instruments[0].enabled);
}

#[test]
fn test_multi_step_transaction_commit() {
    let (store, dispatcher) = setup(TransactionConfig::default());
    let tx_id = dispatcher.begin("M1").unwrap();

    dispatcher
        .execute_in(
            tx_id,
            ActionKind::InsertComponent,
            &TargetSelector::model(),
            &payload(json!({"tag": "TK-101", "class": "tank", "ports": ["N1"]})),
            ExecuteOptions::default(),
        )
        .unwrap();
    // 后续步骤可以引用本事务新增的实体
    dispatcher
        .execute_in(
            tx_id,
            ActionKind::RewireConnection,
            &TargetSelector::segment("100-L-1"),
            &payload(json!({"to": "TK-101/N1"})),
            ExecuteOptions::default(),
        )
        .unwrap();
    dispatcher
        .execute_in(
            tx_id,
            ActionKind::InsertInlineComponent,
            &TargetSelector::segment("L-1"),
            &payload(json!({"tag": "V-1", "class": "valve"})),
            ExecuteOptions::default(),
        )
        .unwrap();

    // 提交前规范模型不变
    assert!(!store.get("M1").unwrap().contains_entity("TK-101"));

    let log = dispatcher.transactions().operation_log(tx_id).unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log[1].action, "rewire_connection");

    let result = dispatcher.commit(tx_id, true).unwrap();
    assert_eq!(result.diff.added, vec!["TK-101", "V-1"]);
    assert_eq!(result.diff.updated, vec!["L-1"]);
    assert!(result.validation.valid);

    let model = store.get("M1").unwrap();
    assert!(model.contains_entity("V-1"));
}

#[test]
fn test_multi_step_failure_rolls_back_everything() {
    let (store, dispatcher) = setup(TransactionConfig::default());
    let before = encoded(&store, "M1");
    let tx_id = dispatcher.begin("M1").unwrap();

    dispatcher
        .execute_in(
            tx_id,
            ActionKind::RemoveComponent,
            &TargetSelector::component("E-100"),
            &Payload::new(),
            ExecuteOptions::default(),
        )
        .unwrap();
    let err = dispatcher
        .execute_in(
            tx_id,
            ActionKind::RewireConnection,
            &TargetSelector::segment("L-1"),
            &payload(json!({"to": "E-100/in"})),
            ExecuteOptions::default(),
        )
        .unwrap_err();
    assert_eq!(err.code(), "OPERATION_EXECUTION_ERROR");

    assert_eq!(
        dispatcher.transactions().status(tx_id),
        Some(TransactionStatus::Failed)
    );
    assert_eq!(encoded(&store, "M1"), before);
    assert!(matches!(
        dispatcher.commit(tx_id, false),
        Err(MutationError::TransactionNotActive { .. })
    ));
}

#[test]
fn test_explicit_rollback() {
    let (store, dispatcher) = setup(TransactionConfig::default());
    let before = encoded(&store, "M1");
    let tx_id = dispatcher.begin("M1").unwrap();
    dispatcher
        .execute_in(
            tx_id,
            ActionKind::SetTagProperties,
            &TargetSelector::component("TK-100"),
            &payload(json!({"tag": "TK-100A"})),
            ExecuteOptions::default(),
        )
        .unwrap();
    dispatcher.rollback(tx_id).unwrap();

    assert_eq!(encoded(&store, "M1"), before);
    assert_eq!(dispatcher.rollback(tx_id).unwrap_err().code(), "TRANSACTION_NOT_ACTIVE");
}

#[test]
fn test_commit_with_validation_rejects_invalid_working_model() {
    let (store, dispatcher) = setup(TransactionConfig::default());
    let tx_id = dispatcher.begin("M1").unwrap();

    // 复用已有位号：结构上允许，但违反位号唯一约束
    dispatcher
        .execute_in(
            tx_id,
            ActionKind::InsertComponent,
            &TargetSelector::model(),
            &payload(json!({"tag": "P-100", "id": "pump-2"})),
            ExecuteOptions::default(),
        )
        .unwrap();

    let err = dispatcher.commit(tx_id, true).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert!(!store.get("M1").unwrap().contains_entity("pump-2"));
}

#[test]
fn test_operation_log_records_payload() {
    let (_, dispatcher) = setup(TransactionConfig::default());
    let tx_id = dispatcher.begin("M1").unwrap();
    dispatcher
        .execute_in(
            tx_id,
            ActionKind::UpdateComponent,
            &TargetSelector::component("P-100"),
            &payload(json!({"properties": {"rated_flow": 40}})),
            ExecuteOptions::default(),
        )
        .unwrap();
    let log = dispatcher.transactions().operation_log(tx_id).unwrap();
    assert!(matches!(
        &log[0].outcome,
        OperationOutcome::Applied { mutated } if mutated == &vec!["P-100".to_string()]
    ));
    assert_eq!(log[0].payload["properties"]["rated_flow"], 40);
}

#[test]
fn test_graph_inline_insert_splits_stream() {
    let (store, dispatcher) = setup(TransactionConfig::default());
    let outcome = dispatcher
        .execute(
            "G1",
            ActionKind::InsertInlineComponent,
            &TargetSelector::stream("effluent"),
            &payload(json!({"tag": "HX-1", "kind": "cooler"})),
            ExecuteOptions::default(),
        )
        .unwrap();

    let diff = outcome.diff.unwrap();
    assert_eq!(diff.added, vec!["HX-1", "S-1-b"]);
    assert_eq!(diff.updated, vec!["S-1"]);

    let model = store.get("G1").unwrap();
    let Model::Graph(graph) = model.as_ref() else {
        panic!("expected graph model");
    };
    assert_eq!(graph.stream("S-1").unwrap().target, "HX-1");
    assert_eq!(graph.stream("S-1-b").unwrap().source, "HX-1");
}

#[test]
fn test_graph_remove_cascades_in_diff() {
    let (_, dispatcher) = setup(TransactionConfig::default());
    let outcome = dispatcher
        .execute(
            "G1",
            ActionKind::RemoveComponent,
            &TargetSelector::component("C-1"),
            &Payload::new(),
            ExecuteOptions::default(),
        )
        .unwrap();
    assert_eq!(outcome.diff.unwrap().removed, vec!["C-1", "S-1"]);
}

#[test]
fn test_custom_table_without_builtin_handlers() {
    let store = Arc::new(InMemoryModelStore::new());
    store.insert("M1", create_plant());
    let dispatcher = MutationDispatcher::new(store).with_table(DispatchTable::empty());

    let err = dispatcher
        .execute(
            "M1",
            ActionKind::InsertComponent,
            &TargetSelector::model(),
            &payload(json!({"tag": "TK-101"})),
            ExecuteOptions::default(),
        )
        .unwrap_err();
    assert_eq!(err.code(), "ACTION_NOT_APPLICABLE");
}

#[test]
fn test_direct_edit_holds_model_exclusively() {
    let (store, mut dispatcher) = setup(TransactionConfig::default());
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    {
        let entered = Arc::clone(&entered);
        let release = Arc::clone(&release);
        dispatcher.table_mut().register(
            ActionKind::UpdateComponent,
            ModelKind::Tree,
            Arc::new(move |model: &mut Model, _: &ResolvedTarget, _: &Payload| -> ToolkitResult {
                entered.wait();
                release.wait();
                if let Model::Tree(tree) = model {
                    tree.components.push(Component::new("DIRECT", "DIRECT", "tank"));
                }
                Ok(vec!["DIRECT".to_string()])
            }),
        );
    }
    let dispatcher = Arc::new(dispatcher);

    let direct = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || {
            dispatcher.execute(
                "M1",
                ActionKind::UpdateComponent,
                &TargetSelector::component("P-100"),
                &payload(json!({"class": "pump"})),
                ExecuteOptions::direct(),
            )
        })
    };

    // 直接编辑的处理函数还在运行，其他写入被拒绝
    entered.wait();
    let err = dispatcher
        .execute(
            "M1",
            ActionKind::InsertComponent,
            &TargetSelector::model(),
            &payload(json!({"tag": "TK-200"})),
            ExecuteOptions::default(),
        )
        .unwrap_err();
    assert_eq!(err.code(), "TRANSACTION_ALREADY_ACTIVE");
    release.wait();

    let outcome = direct.join().unwrap().unwrap();
    assert!(outcome.transaction_id.is_none());

    dispatcher
        .execute(
            "M1",
            ActionKind::InsertComponent,
            &TargetSelector::model(),
            &payload(json!({"tag": "TK-200"})),
            ExecuteOptions::default(),
        )
        .unwrap();
    let canonical = store.get("M1").unwrap();
    assert!(canonical.contains_entity("DIRECT"));
    assert!(canonical.contains_entity("TK-200"));
}

// 第一次读取返回旧版本并切换到新版本，模拟检查之后、开事务之前落地的提交
struct ShiftingStore {
    inner: InMemoryModelStore,
    next: Mutex<Option<Model>>,
}

impl ModelStore for ShiftingStore {
    fn get(&self, model_id: &str) -> Option<Arc<Model>> {
        let current = self.inner.get(model_id);
        if let Some(next) = self.next.lock().unwrap().take() {
            self.inner.replace(model_id, next);
        }
        current
    }

    fn replace(&self, model_id: &str, model: Model) {
        self.inner.replace(model_id, model);
    }
}

#[test]
fn test_target_resolved_against_transaction_copy() {
    let mut before = TreeModel::new("unit-300");
    before.components.push(Component::new("A", "P-1", "pump"));
    let mut after = TreeModel::new("unit-300");
    after.components.push(Component::new("A", "P-OLD", "pump"));
    after.components.push(Component::new("B", "P-1", "pump"));

    let inner = InMemoryModelStore::new();
    inner.insert("M1", Model::Tree(before));
    let store = Arc::new(ShiftingStore {
        inner,
        next: Mutex::new(Some(Model::Tree(after))),
    });
    let dispatcher = MutationDispatcher::new(Arc::clone(&store));

    let outcome = dispatcher
        .execute(
            "M1",
            ActionKind::UpdateComponent,
            &TargetSelector::component("P-1"),
            &payload(json!({"class": "compressor"})),
            ExecuteOptions::default(),
        )
        .unwrap();

    assert_eq!(outcome.mutated_entities, vec!["B"]);
    let model = store.get("M1").unwrap();
    let Model::Tree(tree) = model.as_ref() else {
        panic!("expected tree model");
    };
    assert_eq!(tree.component("B").unwrap().class, "compressor");
    assert_eq!(tree.component("A").unwrap().class, "pump");
}
