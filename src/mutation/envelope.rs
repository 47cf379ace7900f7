//! 请求/响应封装
//!
//! 外层请求边界：把 JSON 请求转换成调度调用，把 `MutationResult` 转换成
//! `{ok, data, error: {code, message, details}}` 响应。

use super::action::ActionKind;
use super::dispatcher::{ExecuteOptions, MutationDispatcher, MutationOutcome};
use crate::error::{MutationError, MutationResult};
use crate::model::EntityId;
use crate::resolver::TargetSelector;
use crate::store::ModelStore;
use crate::toolkit::Payload;
use crate::transactions::{StructuralDiff, TxId};
use crate::validation::ValidationResult;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 变更请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    pub model_id: String,
    /// 动作的线上名称，如 `insert_component`
    pub action: String,
    #[serde(default)]
    pub target: TargetSelector,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub options: ExecuteOptions,
    /// 给出时在该事务内执行
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TxId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub mutated_entities: Vec<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<StructuralDiff>,
    pub validation: ValidationResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TxId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

/// 响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ResponseEnvelope {
    pub fn success(outcome: MutationOutcome) -> Self {
        Self {
            ok: true,
            data: Some(ResponseData {
                mutated_entities: outcome.mutated_entities,
                diff: outcome.diff,
                validation: outcome.validation,
                dry_run: outcome.dry_run.then_some(true),
                transaction_id: outcome.transaction_id,
            }),
            error: None,
        }
    }

    pub fn failure(err: &MutationError) -> Self {
        Self::error_body(err.code(), err.to_string(), err.details())
    }

    fn error_body(code: &str, message: String, details: serde_json::Value) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message,
                details,
            }),
        }
    }
}

impl From<MutationResult<MutationOutcome>> for ResponseEnvelope {
    fn from(result: MutationResult<MutationOutcome>) -> Self {
        match result {
            Ok(outcome) => ResponseEnvelope::success(outcome),
            Err(err) => ResponseEnvelope::failure(&err),
        }
    }
}

impl<S: ModelStore> MutationDispatcher<S> {
    /// 处理一个请求
    pub fn handle(&self, request: &MutationRequest) -> ResponseEnvelope {
        self.dispatch_request(request).into()
    }

    pub(crate) fn dispatch_request(&self, request: &MutationRequest) -> MutationResult<MutationOutcome> {
        let action: ActionKind = request
            .action
            .parse()
            .map_err(|_| MutationError::UnknownAction(request.action.clone()))?;
        match request.transaction_id {
            Some(tx_id) => {
                let expected = self.transaction_model(tx_id)?;
                if expected != request.model_id {
                    return Err(MutationError::TransactionModelMismatch {
                        tx_id,
                        model_id: request.model_id.clone(),
                        expected,
                    });
                }
                self.execute_in(
                    tx_id,
                    action,
                    &request.target,
                    &request.payload,
                    request.options,
                )
            }
            None => self.execute(
                &request.model_id,
                action,
                &request.target,
                &request.payload,
                request.options,
            ),
        }
    }

    /// 处理 JSON 请求，返回 JSON 响应
    pub fn handle_json(&self, raw: &str) -> String {
        let envelope = match serde_json::from_str::<MutationRequest>(raw) {
            Ok(request) => self.handle(&request),
            Err(e) => {
                debug!(error = %e, "malformed request");
                ResponseEnvelope::error_body(
                    "INVALID_REQUEST",
                    format!("malformed request: {}", e),
                    serde_json::Value::Null,
                )
            }
        };
        serde_json::to_string(&envelope).unwrap_or_else(|e| {
            format!(
                r#"{{"ok":false,"error":{{"code":"INTERNAL_ERROR","message":{:?},"details":null}}}}"#,
                e.to_string()
            )
        })
    }
}
