//! 变更调度器
//!
//! 对外的唯一入口：解析目标、按 (动作, 模型表示) 查表选择处理函数、
//! 在事务（或试运行的一次性副本）里执行，并组装结果。

use super::action::{ActionKind, DispatchTable, HandlerCell, HandlerFn};
use crate::error::{MutationError, MutationResult};
use crate::model::{EntityId, Model};
use crate::resolver::{ResolvedTarget, TargetResolver, TargetSelector};
use crate::store::ModelStore;
use crate::toolkit::{Payload, ToolkitError};
use crate::transactions::{
    diff, CommitResult, OperationOutcome, OperationRecord, Snapshot, StructuralDiff, Transaction,
    TransactionConfig, TransactionError, TransactionManager, TxId,
};
use crate::validation::{validate_payload, ConstraintValidator, ModelValidator, ValidationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 执行选项，缺省字段取默认值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteOptions {
    pub create_transaction: bool,
    pub validate_before: bool,
    pub validate_after: bool,
    pub dry_run: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            create_transaction: true,
            validate_before: true,
            validate_after: false,
            dry_run: false,
        }
    }
}

impl ExecuteOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Default::default()
        }
    }

    pub fn with_post_validation() -> Self {
        Self {
            validate_after: true,
            ..Default::default()
        }
    }

    /// 不对外开事务：内部仍独占模型完成一次提交，但不返回事务 id
    pub fn direct() -> Self {
        Self {
            create_transaction: false,
            ..Default::default()
        }
    }
}

/// 单次调度的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationOutcome {
    pub mutated_entities: Vec<EntityId>,
    /// 在显式事务里执行时差异要到提交才知道，为 None
    pub diff: Option<StructuralDiff>,
    pub validation: ValidationResult,
    pub dry_run: bool,
    pub transaction_id: Option<TxId>,
}

/// 变更调度器
pub struct MutationDispatcher<S: ModelStore> {
    transactions: Arc<TransactionManager<S>>,
    table: DispatchTable,
    validator: Box<dyn ModelValidator>,
}

impl<S: ModelStore> MutationDispatcher<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, TransactionConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: TransactionConfig) -> Self {
        Self::with_manager(Arc::new(TransactionManager::with_config(store, config)))
    }

    pub fn with_manager(transactions: Arc<TransactionManager<S>>) -> Self {
        Self {
            transactions,
            table: DispatchTable::standard(),
            validator: Box::new(ConstraintValidator::standard()),
        }
    }

    pub fn with_table(mut self, table: DispatchTable) -> Self {
        self.table = table;
        self
    }

    pub fn with_validator(mut self, validator: impl ModelValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn transactions(&self) -> &Arc<TransactionManager<S>> {
        &self.transactions
    }

    pub fn table_mut(&mut self) -> &mut DispatchTable {
        &mut self.table
    }

    // ========== 单次调度 ==========

    /// 执行一个编辑动作
    pub fn execute(
        &self,
        model_id: &str,
        action: ActionKind,
        target: &TargetSelector,
        payload: &Payload,
        options: ExecuteOptions,
    ) -> MutationResult<MutationOutcome> {
        info!(model_id, %action, target = %target, dry_run = options.dry_run, "dispatch");

        let canonical = self
            .transactions
            .store()
            .get(model_id)
            .ok_or_else(|| MutationError::ModelNotFound {
                model_id: model_id.to_string(),
            })?;
        // 先在规范模型上检查，明显无效的请求不开事务
        let (handler, resolved) = self.prepare(action, target, payload, options, &canonical)?;

        if options.dry_run {
            return self.dry_run(&canonical, action, &handler, &resolved, payload, options);
        }

        // 不开事务的直接编辑也走一次内部事务，只是不对外给出事务 id
        let tx_id = self.transactions.begin(model_id)?;
        let applied = self
            .transactions
            .with_transaction(tx_id, |tx| self.apply_in(tx, action, target, payload, options))
            .map_err(MutationError::from)
            .and_then(|r| r);
        let (mutated, _) = match applied {
            Ok(done) => done,
            Err(err) => return Err(self.abort(tx_id, err)),
        };
        let CommitResult { diff, validation } = self.finish(tx_id)?;

        if options.create_transaction {
            info!(model_id, %action, tx_id, mutated = mutated.len(), "dispatch finished");
        } else {
            info!(model_id, %action, mutated = mutated.len(), "direct edit applied");
        }
        Ok(MutationOutcome {
            mutated_entities: mutated,
            diff: Some(diff),
            validation,
            dry_run: false,
            transaction_id: options.create_transaction.then_some(tx_id),
        })
    }

    /// 试运行：在一次性副本上执行，原模型不受影响
    fn dry_run(
        &self,
        source: &Model,
        action: ActionKind,
        handler: &HandlerFn,
        resolved: &ResolvedTarget,
        payload: &Payload,
        options: ExecuteOptions,
    ) -> MutationResult<MutationOutcome> {
        let strategy = self.transactions.selector().select(source);
        let mut copy = Snapshot::disposable_copy(source, strategy, self.transactions.serial_format())
            .map_err(|e| MutationError::Internal(e.to_string()))?;
        let (mutated, validation) = self.apply(&mut copy, action, handler, resolved, payload, options.validate_after)?;

        let touched: BTreeSet<EntityId> = mutated.iter().cloned().collect();
        let diff = diff(source, &copy, &touched);
        debug!(%action, %strategy, changes = diff.len(), "dry run finished");
        Ok(MutationOutcome {
            mutated_entities: mutated,
            diff: Some(diff),
            validation,
            dry_run: true,
            transaction_id: None,
        })
    }

    // ========== 显式事务 ==========

    pub fn begin(&self, model_id: &str) -> MutationResult<TxId> {
        Ok(self.transactions.begin(model_id)?)
    }

    /// 在已开启的事务里执行一个动作
    ///
    /// 目标在工作副本上解析，可以引用本事务前面步骤新增的实体。
    /// 任何失败都会回滚整个事务。`dry_run` 时只在工作副本的一次性副本上预览，
    /// 事务本身不变，失败也不回滚；`create_transaction` 在这里不起作用。
    pub fn execute_in(
        &self,
        tx_id: TxId,
        action: ActionKind,
        target: &TargetSelector,
        payload: &Payload,
        options: ExecuteOptions,
    ) -> MutationResult<MutationOutcome> {
        info!(tx_id, %action, target = %target, dry_run = options.dry_run, "dispatch in transaction");
        if options.dry_run {
            let outcome = self.transactions.with_transaction(tx_id, |tx| {
                let working = tx.working_model().ok_or_else(|| missing_working(tx_id))?;
                let (handler, resolved) = self.prepare(action, target, payload, options, working)?;
                self.dry_run(working, action, &handler, &resolved, payload, options)
            })??;
            return Ok(MutationOutcome {
                transaction_id: Some(tx_id),
                ..outcome
            });
        }

        let applied = self
            .transactions
            .with_transaction(tx_id, |tx| self.apply_in(tx, action, target, payload, options))?;
        match applied {
            Ok((mutated, validation)) => Ok(MutationOutcome {
                mutated_entities: mutated,
                diff: None,
                validation,
                dry_run: false,
                transaction_id: Some(tx_id),
            }),
            Err(err) => Err(self.abort(tx_id, err)),
        }
    }

    /// 提交事务，`validate` 为 true 时先校验工作副本，失败则回滚
    pub fn commit(&self, tx_id: TxId, validate: bool) -> MutationResult<CommitResult> {
        if validate {
            let result = self.transactions.with_transaction(tx_id, |tx| {
                let result = tx
                    .working_model()
                    .map(|m| self.validator.validate(m))
                    .unwrap_or_default();
                tx.set_validation(result.clone());
                result
            })?;
            if !result.valid {
                return Err(self.abort(tx_id, MutationError::ValidationError { result }));
            }
        }
        self.finish(tx_id)
    }

    /// 事务所属的模型
    pub fn transaction_model(&self, tx_id: TxId) -> MutationResult<String> {
        Ok(self.transactions.with_transaction(tx_id, |tx| tx.model_id.clone())?)
    }

    pub fn rollback(&self, tx_id: TxId) -> MutationResult<()> {
        Ok(self.transactions.rollback(tx_id)?)
    }

    // ========== 内部步骤 ==========

    fn select_handler(&self, action: ActionKind, model: &Model) -> MutationResult<HandlerFn> {
        match self.table.lookup(action, model.kind()) {
            HandlerCell::Handler(f) => Ok(f),
            HandlerCell::NotApplicable => Err(MutationError::ActionNotApplicable {
                action: action.to_string(),
                model_kind: model.kind().to_string(),
            }),
            HandlerCell::NotImplemented { alternative } => Err(MutationError::NotImplemented {
                action: action.to_string(),
                alternative: alternative.to_string(),
            }),
        }
    }

    fn prepare(
        &self,
        action: ActionKind,
        target: &TargetSelector,
        payload: &Payload,
        options: ExecuteOptions,
        model: &Model,
    ) -> MutationResult<(HandlerFn, ResolvedTarget)> {
        let handler = self.select_handler(action, model)?;
        if options.validate_before {
            check_payload(action, payload)?;
        }
        let resolved = resolve(&mut TargetResolver::new(), target, model)?;
        Ok((handler, resolved))
    }

    /// 在事务的工作副本上解析目标并执行，记录操作日志
    fn apply_in(
        &self,
        tx: &mut Transaction,
        action: ActionKind,
        target: &TargetSelector,
        payload: &Payload,
        options: ExecuteOptions,
    ) -> MutationResult<(Vec<EntityId>, ValidationResult)> {
        let tx_id = tx.id;
        let Some(working) = tx.working_model_mut() else {
            return Err(missing_working(tx_id));
        };
        let result = self
            .prepare(action, target, payload, options, working)
            .and_then(|(handler, resolved)| {
                self.apply(working, action, &handler, &resolved, payload, options.validate_after)
            });
        tx.record(operation_record(action, &target.key(), payload, &result));
        if let Ok((_, validation)) = &result {
            tx.set_validation(validation.clone());
        }
        result
    }

    /// 提交；提交本身失败（如快照无法还原）时同样回滚
    fn finish(&self, tx_id: TxId) -> MutationResult<CommitResult> {
        self.transactions.commit(tx_id).map_err(|e| match e {
            TransactionError::TransactionNotFound(_) | TransactionError::TransactionNotActive { .. } => {
                e.into()
            }
            other => self.abort(tx_id, other.into()),
        })
    }

    /// 调用处理函数，可选地做执行后校验
    ///
    /// 处理函数的 panic 也转为执行错误；模型在失败后由调用方丢弃
    fn apply(
        &self,
        model: &mut Model,
        action: ActionKind,
        handler: &HandlerFn,
        resolved: &ResolvedTarget,
        payload: &Payload,
        validate_after: bool,
    ) -> MutationResult<(Vec<EntityId>, ValidationResult)> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(model, resolved, payload)))
            .unwrap_or_else(|cause| Err(ToolkitError::Rejected(panic_message(cause.as_ref()))));
        let mutated = outcome.map_err(|e| {
            warn!(%action, error = %e, "handler failed");
            MutationError::execution(action.as_ref(), e)
        })?;

        if !validate_after {
            return Ok((mutated, ValidationResult::ok()));
        }
        let validation = self.validator.validate(model);
        if !validation.valid {
            warn!(%action, errors = ?validation.errors, "post-mutation validation failed");
            return Err(MutationError::ValidationError { result: validation });
        }
        Ok((mutated, validation))
    }

    /// 失败后回滚事务，返回原错误
    fn abort(&self, tx_id: TxId, err: MutationError) -> MutationError {
        if let Err(rollback_err) = self.transactions.fail(tx_id, &err.to_string()) {
            warn!(tx_id, error = %rollback_err, "rollback after failure did not complete");
        }
        err
    }
}

impl<S: ModelStore> std::fmt::Debug for MutationDispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationDispatcher")
            .field("transactions", &self.transactions)
            .field("table", &self.table)
            .finish()
    }
}

fn missing_working(tx_id: TxId) -> MutationError {
    MutationError::Internal(format!("transaction {} has no working model", tx_id))
}

fn check_payload(action: ActionKind, payload: &Payload) -> MutationResult<()> {
    let result = validate_payload(action, payload);
    if result.valid {
        return Ok(());
    }
    Err(MutationError::AttributeValidationFailed {
        action: action.to_string(),
        errors: result.errors,
    })
}

fn resolve(
    resolver: &mut TargetResolver,
    target: &TargetSelector,
    model: &Model,
) -> MutationResult<ResolvedTarget> {
    resolver
        .resolve(target, model)
        .map_err(|e| MutationError::TargetNotFound { message: e.to_string() })
}

fn operation_record(
    action: ActionKind,
    target: &str,
    payload: &Payload,
    result: &MutationResult<(Vec<EntityId>, ValidationResult)>,
) -> OperationRecord {
    let outcome = match result {
        Ok((mutated, _)) => OperationOutcome::Applied {
            mutated: mutated.clone(),
        },
        Err(e) => OperationOutcome::Failed {
            message: e.to_string(),
        },
    };
    OperationRecord::new(
        action.as_ref(),
        target,
        serde_json::Value::Object(payload.clone()),
        outcome,
    )
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = cause.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}
