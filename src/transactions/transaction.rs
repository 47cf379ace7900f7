// 事务定义
//
// 事务状态、操作日志记录、事务错误

use crate::codec::CodecError;
use crate::model::{EntityId, Model};
use crate::validation::ValidationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::{AsRefStr, Display};
use thiserror::Error;

use super::diff::StructuralDiff;
use super::snapshot::{Snapshot, SnapshotStrategy};

/// 事务ID
pub type TxId = u64;

/// 事务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionStatus {
    /// 尚未开始（begin 直接创建 Active 事务，不经过这个状态）
    Pending,
    /// 活动中
    Active,
    /// 已提交
    Committed,
    /// 已回滚
    RolledBack,
    /// 因处理器失败或校验失败被自动回滚
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::RolledBack | TransactionStatus::Failed
        )
    }
}

/// 事务错误类型
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("model '{model_id}' not found")]
    ModelNotFound { model_id: String },

    #[error("transaction {0} not found")]
    TransactionNotFound(TxId),

    #[error("model '{model_id}' already has active transaction {tx_id}")]
    TransactionAlreadyActive { model_id: String, tx_id: TxId },

    #[error("transaction {tx_id} is not active (status: {status})")]
    TransactionNotActive { tx_id: TxId, status: TransactionStatus },

    #[error("snapshot error: {0}")]
    Snapshot(#[from] CodecError),
}

/// 事务结果类型
pub type TransactionResult<T> = Result<T, TransactionError>;

/// 单次操作的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome {
    Applied { mutated: Vec<EntityId> },
    Failed { message: String },
}

/// 操作日志记录（只追加，失败的尝试也记录）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub action: String,
    pub target: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub outcome: OperationOutcome,
}

impl OperationRecord {
    pub fn new(
        action: &str,
        target: &str,
        payload: serde_json::Value,
        outcome: OperationOutcome,
    ) -> Self {
        Self {
            action: action.to_string(),
            target: target.to_string(),
            payload,
            timestamp: Utc::now(),
            outcome,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self.outcome, OperationOutcome::Applied { .. })
    }
}

/// 提交结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
    pub diff: StructuralDiff,
    pub validation: ValidationResult,
}

/// 事务
///
/// 独占自己的快照和工作副本；只能由事务管理器修改
#[derive(Debug)]
pub struct Transaction {
    pub id: TxId,
    pub model_id: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    snapshot: Snapshot,
    /// 提交或回滚后被取走
    working: Option<Model>,
    operation_log: Vec<OperationRecord>,
    touched: BTreeSet<EntityId>,
    validation: Option<ValidationResult>,
}

impl Transaction {
    pub(crate) fn new(id: TxId, model_id: &str, snapshot: Snapshot, working: Model) -> Self {
        Self {
            id,
            model_id: model_id.to_string(),
            status: TransactionStatus::Active,
            created_at: Utc::now(),
            snapshot,
            working: Some(working),
            operation_log: Vec::new(),
            touched: BTreeSet::new(),
            validation: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    #[cfg(test)]
    pub(crate) fn replace_snapshot(&mut self, snapshot: Snapshot) {
        self.snapshot = snapshot;
    }

    pub fn strategy(&self) -> SnapshotStrategy {
        self.snapshot.strategy
    }

    pub fn working_model(&self) -> Option<&Model> {
        self.working.as_ref()
    }

    pub fn working_model_mut(&mut self) -> Option<&mut Model> {
        self.working.as_mut()
    }

    pub fn operation_log(&self) -> &[OperationRecord] {
        &self.operation_log
    }

    pub fn op_count(&self) -> usize {
        self.operation_log.len()
    }

    /// 累计的被修改实体
    pub fn touched(&self) -> &BTreeSet<EntityId> {
        &self.touched
    }

    /// 追加操作记录，成功的操作同时登记被修改实体
    pub fn record(&mut self, record: OperationRecord) {
        if let OperationOutcome::Applied { mutated } = &record.outcome {
            self.touched.extend(mutated.iter().cloned());
        }
        self.operation_log.push(record);
    }

    /// 记录最近一次校验结果，提交时随 CommitResult 返回
    pub fn set_validation(&mut self, result: ValidationResult) {
        self.validation = Some(result);
    }

    pub(crate) fn take_working(&mut self) -> Option<Model> {
        self.working.take()
    }

    pub(crate) fn take_validation(&mut self) -> ValidationResult {
        self.validation.take().unwrap_or_default()
    }

    pub(crate) fn summary(&self, reason: Option<String>) -> TransactionSummary {
        TransactionSummary {
            id: self.id,
            model_id: self.model_id.clone(),
            status: self.status,
            strategy: self.snapshot.strategy,
            created_at: self.created_at,
            finished_at: Utc::now(),
            op_count: Some(self.operation_log.len()),
            reason,
        }
    }
}

/// 已结束事务的审计摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub id: TxId,
    pub model_id: String,
    pub status: TransactionStatus,
    pub strategy: SnapshotStrategy,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// 超时回收的事务不检查其操作日志，记为 None
    pub op_count: Option<usize>,
    pub reason: Option<String>,
}
