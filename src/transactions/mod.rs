// 事务管理模块
//
// 提供完整的事务支持，包括：
// - 事务生命周期管理
// - 操作日志记录
// - 快照机制（按模型大小选择策略）
// - 结构差异计算
// - 回滚支持

pub mod diff;
pub mod manager;
pub mod size;
pub mod snapshot;
pub mod transaction;

pub use diff::{diff, StructuralDiff};
pub use manager::TransactionManager;
pub use size::{EncodedSizeEstimator, SizeEstimateError, SizeEstimator, StructuralSizeEstimator};
pub use snapshot::{
    Snapshot, SnapshotPayload, SnapshotStrategy, SnapshotStrategySelector,
    DEFAULT_SNAPSHOT_THRESHOLD,
};
pub use transaction::{
    CommitResult, OperationOutcome, OperationRecord, Transaction, TransactionError,
    TransactionResult, TransactionStatus, TransactionSummary, TxId,
};

use crate::codec::SerialFormat;
use std::time::Duration;

/// 事务配置
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// 估算大小低于该值用 FullCopy，否则用 SerializedCopy
    pub snapshot_threshold_bytes: usize,
    /// SerializedCopy 使用的编码
    pub serial_format: SerialFormat,
    /// 活动事务的存活上限，None 表示不限制
    pub transaction_ttl: Option<Duration>,
    /// 保留的已结束事务摘要数量
    pub history_limit: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            snapshot_threshold_bytes: DEFAULT_SNAPSHOT_THRESHOLD,
            serial_format: SerialFormat::Bincode,
            transaction_ttl: None,
            history_limit: 100,
        }
    }
}

impl TransactionConfig {
    /// 创建低内存配置
    pub fn low_memory() -> Self {
        Self {
            snapshot_threshold_bytes: 256 * 1024,
            ..Default::default()
        }
    }

    /// 带超时回收的配置
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            transaction_ttl: Some(ttl),
            ..Default::default()
        }
    }
}
