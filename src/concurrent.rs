use crate::error::{MutationError, MutationResult};
use crate::mutation::{
    ActionKind, ExecuteOptions, MutationDispatcher, MutationOutcome, MutationRequest, ResponseEnvelope,
};
use crate::resolver::TargetSelector;
use crate::store::ModelStore;
use crate::toolkit::Payload;
use crate::transactions::{CommitResult, TxId};
use std::sync::Arc;

/// 可在线程/任务间共享的调度器句柄
///
/// 调度本身是同步的（处理函数可能较慢），异步接口把它放到 tokio 的阻塞线程池执行：
/// - 同步方法直接在当前线程调用
/// - `*_async` 方法通过 `spawn_blocking` 执行，不阻塞运行时
pub struct SharedDispatcher<S: ModelStore + 'static> {
    inner: Arc<MutationDispatcher<S>>,
}

impl<S: ModelStore + 'static> SharedDispatcher<S> {
    pub fn new(dispatcher: MutationDispatcher<S>) -> Self {
        Self {
            inner: Arc::new(dispatcher),
        }
    }

    pub fn clone_handle(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn dispatcher(&self) -> &MutationDispatcher<S> {
        &self.inner
    }

    // ========== 同步 ==========

    pub fn execute(
        &self,
        model_id: &str,
        action: ActionKind,
        target: &TargetSelector,
        payload: &Payload,
        options: ExecuteOptions,
    ) -> MutationResult<MutationOutcome> {
        self.inner.execute(model_id, action, target, payload, options)
    }

    pub fn begin(&self, model_id: &str) -> MutationResult<TxId> {
        self.inner.begin(model_id)
    }

    pub fn commit(&self, tx_id: TxId, validate: bool) -> MutationResult<CommitResult> {
        self.inner.commit(tx_id, validate)
    }

    pub fn rollback(&self, tx_id: TxId) -> MutationResult<()> {
        self.inner.rollback(tx_id)
    }

    // ========== 异步 ==========

    pub async fn execute_async(
        &self,
        model_id: String,
        action: ActionKind,
        target: TargetSelector,
        payload: Payload,
        options: ExecuteOptions,
    ) -> MutationResult<MutationOutcome> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.execute(&model_id, action, &target, &payload, options))
            .await
            .map_err(|e| MutationError::Internal(format!("dispatch task failed: {}", e)))?
    }

    pub async fn handle_async(&self, request: MutationRequest) -> ResponseEnvelope {
        let inner = Arc::clone(&self.inner);
        match tokio::task::spawn_blocking(move || inner.handle(&request)).await {
            Ok(envelope) => envelope,
            Err(e) => ResponseEnvelope::failure(&MutationError::Internal(format!(
                "dispatch task failed: {}",
                e
            ))),
        }
    }
}

impl<S: ModelStore + 'static> Clone for SharedDispatcher<S> {
    fn clone(&self) -> Self {
        self.clone_handle()
    }
}
