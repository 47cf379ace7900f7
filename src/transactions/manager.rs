// 事务管理器
//
// 负责事务生命周期（begin / commit / rollback），保证每个模型最多一个活动事务。
// 全局表锁只在 begin / commit / rollback 的簿记阶段持有；处理器在单个事务的锁内执行，
// 不阻塞其他模型。加锁顺序固定为 事务锁 -> 表锁。
//
// 表中的条目是写权的唯一凭证：TTL 回收只摘除条目而不等事务锁，所以 commit 必须在
// 表锁内确认条目仍属于自己，才能替换存储中的模型；已被摘除的事务只能作为回滚结束。

use crate::codec::SerialFormat;
use crate::model::Model;
use crate::store::ModelStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::diff::diff;
use super::snapshot::{Snapshot, SnapshotStrategy, SnapshotStrategySelector};
use super::transaction::{
    CommitResult, Transaction, TransactionError, TransactionResult, TransactionStatus,
    TransactionSummary, TxId,
};
use super::TransactionConfig;

type SharedTx = Arc<Mutex<Transaction>>;

struct ActiveEntry {
    model_id: String,
    started: Instant,
    created_at: DateTime<Utc>,
    strategy: SnapshotStrategy,
    tx: SharedTx,
}

#[derive(Default)]
struct ManagerState {
    /// 活动的事务
    active: HashMap<TxId, ActiveEntry>,
    /// 模型 -> 活动事务
    by_model: HashMap<String, TxId>,
    /// 已结束的事务（用于审计）
    history: VecDeque<TransactionSummary>,
}

impl ManagerState {
    fn detach(&mut self, tx_id: TxId) -> Option<ActiveEntry> {
        let entry = self.active.remove(&tx_id)?;
        if self.by_model.get(&entry.model_id) == Some(&tx_id) {
            self.by_model.remove(&entry.model_id);
        }
        Some(entry)
    }

    fn archive(&mut self, summary: TransactionSummary, limit: usize) {
        self.history.push_back(summary);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    fn finished_status(&self, tx_id: TxId) -> Option<TransactionStatus> {
        self.history
            .iter()
            .rev()
            .find(|s| s.id == tx_id)
            .map(|s| s.status)
    }
}

/// 事务管理器
pub struct TransactionManager<S: ModelStore> {
    store: Arc<S>,
    config: TransactionConfig,
    selector: SnapshotStrategySelector,
    state: Mutex<ManagerState>,
    next_tx_id: AtomicU64,
}

impl<S: ModelStore> TransactionManager<S> {
    /// 创建新的事务管理器
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, TransactionConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: TransactionConfig) -> Self {
        let selector = SnapshotStrategySelector::new(config.snapshot_threshold_bytes);
        Self::with_selector(store, config, selector)
    }

    /// 自定义快照策略选择器（例如换用别的大小估算器）
    pub fn with_selector(
        store: Arc<S>,
        config: TransactionConfig,
        selector: SnapshotStrategySelector,
    ) -> Self {
        Self {
            store,
            config,
            selector,
            state: Mutex::new(ManagerState::default()),
            next_tx_id: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn selector(&self) -> &SnapshotStrategySelector {
        &self.selector
    }

    pub fn serial_format(&self) -> SerialFormat {
        self.config.serial_format
    }

    /// 开始新事务
    pub fn begin(&self, model_id: &str) -> TransactionResult<TxId> {
        let mut expired = Vec::new();
        let result = self.begin_locked(model_id, &mut expired);
        // 过期事务在表锁之外收尾，避免 表锁 -> 事务锁
        for (tx, reason) in expired {
            Self::discard(&tx, TransactionStatus::RolledBack);
            warn!(model_id, reason = %reason, "expired transaction rolled back");
        }
        result
    }

    fn begin_locked(
        &self,
        model_id: &str,
        expired: &mut Vec<(SharedTx, String)>,
    ) -> TransactionResult<TxId> {
        let mut state = self.state.lock();

        if let Some(&existing) = state.by_model.get(model_id) {
            let is_expired = match (self.config.transaction_ttl, state.active.get(&existing)) {
                (Some(ttl), Some(entry)) => entry.started.elapsed() >= ttl,
                _ => false,
            };
            if !is_expired {
                return Err(TransactionError::TransactionAlreadyActive {
                    model_id: model_id.to_string(),
                    tx_id: existing,
                });
            }
            if let Some(entry) = state.detach(existing) {
                let reason = format!("ttl expired before begin on '{}'", model_id);
                state.archive(
                    Self::expired_summary(existing, &entry, &reason),
                    self.config.history_limit,
                );
                expired.push((entry.tx, reason));
            }
        }

        let canonical = self
            .store
            .get(model_id)
            .ok_or_else(|| TransactionError::ModelNotFound {
                model_id: model_id.to_string(),
            })?;

        let strategy = self.selector.select(&canonical);
        let snapshot = Snapshot::capture(&canonical, strategy, self.config.serial_format)?;
        // 工作副本和快照用同一策略各自生成，互不共享
        let working = snapshot.materialize()?;

        let tx_id = self.next_tx_id.fetch_add(1, Ordering::SeqCst);
        let tx = Transaction::new(tx_id, model_id, snapshot, working);
        state.active.insert(
            tx_id,
            ActiveEntry {
                model_id: model_id.to_string(),
                started: Instant::now(),
                created_at: tx.created_at,
                strategy,
                tx: Arc::new(Mutex::new(tx)),
            },
        );
        state.by_model.insert(model_id.to_string(), tx_id);

        info!(model_id, tx_id, %strategy, "transaction begun");
        Ok(tx_id)
    }

    /// 在事务的锁内访问事务（执行处理器、记录操作）
    ///
    /// 只持有该事务自己的锁，不持有全局表锁
    pub fn with_transaction<R>(
        &self,
        tx_id: TxId,
        f: impl FnOnce(&mut Transaction) -> R,
    ) -> TransactionResult<R> {
        let shared = self.lookup(tx_id)?;
        let mut tx = shared.lock();
        if !tx.is_active() {
            return Err(TransactionError::TransactionNotActive {
                tx_id,
                status: tx.status,
            });
        }
        Ok(f(&mut *tx))
    }

    /// 提交事务
    pub fn commit(&self, tx_id: TxId) -> TransactionResult<CommitResult> {
        let shared = self.lookup(tx_id)?;
        let mut tx = shared.lock();
        self.commit_locked(tx_id, &mut tx)
    }

    fn commit_locked(&self, tx_id: TxId, tx: &mut Transaction) -> TransactionResult<CommitResult> {
        if !tx.is_active() {
            return Err(TransactionError::TransactionNotActive {
                tx_id,
                status: tx.status,
            });
        }

        let structural_diff = {
            let before = tx.snapshot().view()?;
            let after = tx
                .working_model()
                .ok_or(TransactionError::TransactionNotActive {
                    tx_id,
                    status: tx.status,
                })?;
            diff(&before, after, tx.touched())
        };
        let validation = tx.take_validation();
        let Some(working) = tx.take_working() else {
            return Err(TransactionError::TransactionNotActive {
                tx_id,
                status: tx.status,
            });
        };

        {
            let mut state = self.state.lock();
            if state.detach(tx_id).is_none() {
                // 已被 TTL 回收，回收方记过历史
                drop(working);
                tx.status = TransactionStatus::RolledBack;
                warn!(model_id = %tx.model_id, tx_id, "commit lost to ttl expiry");
                return Err(TransactionError::TransactionNotActive {
                    tx_id,
                    status: tx.status,
                });
            }
            self.store.replace(&tx.model_id, working);
            tx.status = TransactionStatus::Committed;
            state.archive(tx.summary(None), self.config.history_limit);
        }

        info!(
            model_id = %tx.model_id,
            tx_id,
            added = structural_diff.added.len(),
            removed = structural_diff.removed.len(),
            updated = structural_diff.updated.len(),
            "transaction committed"
        );
        Ok(CommitResult {
            diff: structural_diff,
            validation,
        })
    }

    /// 回滚事务：丢弃工作副本，存储中的模型从未被替换过
    pub fn rollback(&self, tx_id: TxId) -> TransactionResult<()> {
        self.finish_without_commit(tx_id, TransactionStatus::RolledBack, None)
    }

    /// 因失败自动回滚，状态记为 Failed
    pub fn fail(&self, tx_id: TxId, reason: &str) -> TransactionResult<()> {
        self.finish_without_commit(tx_id, TransactionStatus::Failed, Some(reason.to_string()))
    }

    fn finish_without_commit(
        &self,
        tx_id: TxId,
        status: TransactionStatus,
        reason: Option<String>,
    ) -> TransactionResult<()> {
        let shared = self.lookup(tx_id)?;
        let mut tx = shared.lock();
        if !tx.is_active() {
            return Err(TransactionError::TransactionNotActive {
                tx_id,
                status: tx.status,
            });
        }

        tx.take_working();
        {
            let mut state = self.state.lock();
            if state.detach(tx_id).is_none() {
                tx.status = TransactionStatus::RolledBack;
                return Err(TransactionError::TransactionNotActive {
                    tx_id,
                    status: tx.status,
                });
            }
            tx.status = status;
            state.archive(tx.summary(reason.clone()), self.config.history_limit);
        }

        match reason {
            Some(reason) => warn!(model_id = %tx.model_id, tx_id, %status, %reason, "transaction aborted"),
            None => info!(model_id = %tx.model_id, tx_id, "transaction rolled back"),
        }
        Ok(())
    }

    /// 检查并回滚超时的事务，返回被回滚的事务ID列表
    pub fn cleanup_expired(&self) -> Vec<TxId> {
        let Some(ttl) = self.config.transaction_ttl else {
            return Vec::new();
        };

        let expired: Vec<(TxId, SharedTx)> = {
            let mut state = self.state.lock();
            let ids: Vec<TxId> = state
                .active
                .iter()
                .filter(|(_, e)| e.started.elapsed() >= ttl)
                .map(|(id, _)| *id)
                .collect();
            let mut out = Vec::new();
            for id in ids {
                if let Some(entry) = state.detach(id) {
                    let summary = Self::expired_summary(id, &entry, "ttl expired");
                    state.archive(summary, self.config.history_limit);
                    out.push((id, entry.tx));
                }
            }
            out
        };

        for (id, tx) in &expired {
            Self::discard(tx, TransactionStatus::RolledBack);
            warn!(tx_id = id, "expired transaction rolled back");
        }
        expired.into_iter().map(|(id, _)| id).collect()
    }

    fn discard(tx: &SharedTx, status: TransactionStatus) {
        let mut tx = tx.lock();
        if tx.is_active() {
            tx.take_working();
            tx.status = status;
        }
    }

    fn expired_summary(tx_id: TxId, entry: &ActiveEntry, reason: &str) -> TransactionSummary {
        // 表锁内不拿事务锁，操作数未知
        TransactionSummary {
            id: tx_id,
            model_id: entry.model_id.clone(),
            status: TransactionStatus::RolledBack,
            strategy: entry.strategy,
            created_at: entry.created_at,
            finished_at: Utc::now(),
            op_count: None,
            reason: Some(reason.to_string()),
        }
    }

    fn lookup(&self, tx_id: TxId) -> TransactionResult<SharedTx> {
        let state = self.state.lock();
        if let Some(entry) = state.active.get(&tx_id) {
            return Ok(Arc::clone(&entry.tx));
        }
        match state.finished_status(tx_id) {
            Some(status) => Err(TransactionError::TransactionNotActive { tx_id, status }),
            None => Err(TransactionError::TransactionNotFound(tx_id)),
        }
    }

    // ========== 查询 ==========

    /// 事务状态（活动中或仍在历史记录里）
    pub fn status(&self, tx_id: TxId) -> Option<TransactionStatus> {
        let shared = {
            let state = self.state.lock();
            match state.active.get(&tx_id) {
                Some(entry) => Arc::clone(&entry.tx),
                None => return state.finished_status(tx_id),
            }
        };
        let status = shared.lock().status;
        Some(status)
    }

    /// 模型当前的活动事务
    pub fn active_transaction_for(&self, model_id: &str) -> Option<TxId> {
        self.state.lock().by_model.get(model_id).copied()
    }

    /// 获取活动事务数量
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// 获取已完成事务数量
    pub fn completed_count(&self) -> usize {
        self.state.lock().history.len()
    }

    pub fn history(&self) -> Vec<TransactionSummary> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// 清理已完成的旧事务
    pub fn cleanup_completed(&self, keep_last: usize) {
        let mut state = self.state.lock();
        while state.history.len() > keep_last {
            state.history.pop_front();
        }
    }

    /// 获取所有活动事务ID
    pub fn active_transaction_ids(&self) -> Vec<TxId> {
        let mut ids: Vec<TxId> = self.state.lock().active.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// 事务工作副本的克隆（调试、预览用）
    pub fn working_copy(&self, tx_id: TxId) -> TransactionResult<Model> {
        self.with_transaction(tx_id, |tx| tx.working_model().cloned())?
            .ok_or(TransactionError::TransactionNotFound(tx_id))
    }

    pub fn operation_log(&self, tx_id: TxId) -> TransactionResult<Vec<super::OperationRecord>> {
        self.with_transaction(tx_id, |tx| tx.operation_log().to_vec())
    }
}

impl<S: ModelStore> std::fmt::Debug for TransactionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("config", &self.config)
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl<S: ModelStore> Drop for TransactionManager<S> {
    fn drop(&mut self) {
        let leaked = self.state.get_mut().active.len();
        if leaked > 0 {
            debug!(leaked, "transaction manager dropped with active transactions");
        }
    }
}
