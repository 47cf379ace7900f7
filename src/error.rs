//! 变更引擎错误类型
//!
//! 所有错误在调度器边界以结构化形式返回：稳定的错误码 + 可读消息 + 细节

use crate::toolkit::ToolkitError;
use crate::transactions::{TransactionError, TxId};
use crate::validation::ValidationResult;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("model '{model_id}' not found")]
    ModelNotFound { model_id: String },

    #[error("transaction {tx_id} not found")]
    TransactionNotFound { tx_id: TxId },

    #[error("transaction {tx_id} belongs to model '{expected}', not '{model_id}'")]
    TransactionModelMismatch {
        tx_id: TxId,
        model_id: String,
        expected: String,
    },

    #[error("model '{model_id}' already has active transaction {tx_id}")]
    TransactionAlreadyActive { model_id: String, tx_id: TxId },

    #[error("transaction {tx_id} is not active ({status})")]
    TransactionNotActive { tx_id: TxId, status: String },

    #[error("target not found: {message}")]
    TargetNotFound { message: String },

    #[error("action '{action}' is not applicable to {model_kind} models")]
    ActionNotApplicable { action: String, model_kind: String },

    #[error("payload validation failed for '{action}': {}", .errors.join("; "))]
    AttributeValidationFailed { action: String, errors: Vec<String> },

    #[error("operation '{action}' failed: {source}")]
    OperationExecutionError {
        action: String,
        #[source]
        source: ToolkitError,
    },

    #[error("post-mutation validation failed: {}", .result.errors.join("; "))]
    ValidationError { result: ValidationResult },

    #[error("action '{action}' is not implemented, use '{alternative}' instead")]
    NotImplemented { action: String, alternative: String },

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// 变更结果类型
pub type MutationResult<T> = Result<T, MutationError>;

impl MutationError {
    /// 稳定的错误码
    pub fn code(&self) -> &'static str {
        match self {
            MutationError::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            MutationError::TransactionNotFound { .. } => "TRANSACTION_NOT_FOUND",
            MutationError::TransactionModelMismatch { .. } => "TRANSACTION_MODEL_MISMATCH",
            MutationError::TransactionAlreadyActive { .. } => "TRANSACTION_ALREADY_ACTIVE",
            MutationError::TransactionNotActive { .. } => "TRANSACTION_NOT_ACTIVE",
            MutationError::TargetNotFound { .. } => "TARGET_NOT_FOUND",
            MutationError::ActionNotApplicable { .. } => "ACTION_NOT_APPLICABLE",
            MutationError::AttributeValidationFailed { .. } => "ATTRIBUTE_VALIDATION_FAILED",
            MutationError::OperationExecutionError { .. } => "OPERATION_EXECUTION_ERROR",
            MutationError::ValidationError { .. } => "VALIDATION_ERROR",
            MutationError::NotImplemented { .. } => "NOT_IMPLEMENTED",
            MutationError::UnknownAction(_) => "UNKNOWN_ACTION",
            MutationError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 结构化细节
    pub fn details(&self) -> serde_json::Value {
        match self {
            MutationError::ModelNotFound { model_id } => json!({ "model_id": model_id }),
            MutationError::TransactionNotFound { tx_id } => json!({ "transaction_id": tx_id }),
            MutationError::TransactionModelMismatch {
                tx_id,
                model_id,
                expected,
            } => json!({ "transaction_id": tx_id, "model_id": model_id, "expected_model_id": expected }),
            MutationError::TransactionAlreadyActive { model_id, tx_id } => {
                json!({ "model_id": model_id, "transaction_id": tx_id })
            }
            MutationError::TransactionNotActive { tx_id, status } => {
                json!({ "transaction_id": tx_id, "status": status })
            }
            MutationError::ActionNotApplicable { action, model_kind } => {
                json!({ "action": action, "model_kind": model_kind })
            }
            MutationError::AttributeValidationFailed { action, errors } => {
                json!({ "action": action, "errors": errors })
            }
            MutationError::OperationExecutionError { action, .. } => json!({ "action": action }),
            MutationError::ValidationError { result } => {
                json!({ "errors": result.errors, "warnings": result.warnings })
            }
            MutationError::NotImplemented { action, alternative } => {
                json!({ "action": action, "alternative": alternative })
            }
            _ => serde_json::Value::Null,
        }
    }

    pub(crate) fn execution(action: &str, source: ToolkitError) -> Self {
        MutationError::OperationExecutionError {
            action: action.to_string(),
            source,
        }
    }
}

impl From<TransactionError> for MutationError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::ModelNotFound { model_id } => MutationError::ModelNotFound { model_id },
            TransactionError::TransactionNotFound(tx_id) => {
                MutationError::TransactionNotFound { tx_id }
            }
            TransactionError::TransactionAlreadyActive { model_id, tx_id } => {
                MutationError::TransactionAlreadyActive { model_id, tx_id }
            }
            TransactionError::TransactionNotActive { tx_id, status } => {
                MutationError::TransactionNotActive {
                    tx_id,
                    status: status.to_string(),
                }
            }
            TransactionError::Snapshot(e) => MutationError::Internal(e.to_string()),
        }
    }
}
