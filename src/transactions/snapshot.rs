// 快照管理模块
//
// 提供模型的时间点快照，用于事务回滚和差异计算。
// 小模型直接结构克隆（FullCopy），大模型走序列化往返（SerializedCopy）。

use crate::codec::{serializer_for, CodecError, SerialFormat};
use crate::model::Model;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use strum::{AsRefStr, Display};
use tracing::{debug, warn};

use super::size::{SizeEstimator, StructuralSizeEstimator};

/// 默认阈值：1 MiB
pub const DEFAULT_SNAPSHOT_THRESHOLD: usize = 1024 * 1024;

/// 快照策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SnapshotStrategy {
    /// 结构克隆
    FullCopy,
    /// 序列化副本
    SerializedCopy,
}

impl SnapshotStrategy {
    /// 估算大小 -> 策略（纯函数）
    pub fn for_size(estimated: usize, threshold: usize) -> Self {
        if estimated < threshold {
            SnapshotStrategy::FullCopy
        } else {
            SnapshotStrategy::SerializedCopy
        }
    }
}

/// 快照策略选择器
pub struct SnapshotStrategySelector {
    estimator: Box<dyn SizeEstimator>,
    threshold_bytes: usize,
}

impl SnapshotStrategySelector {
    pub fn new(threshold_bytes: usize) -> Self {
        Self {
            estimator: Box::new(StructuralSizeEstimator),
            threshold_bytes,
        }
    }

    pub fn with_estimator(threshold_bytes: usize, estimator: Box<dyn SizeEstimator>) -> Self {
        Self {
            estimator,
            threshold_bytes,
        }
    }

    pub fn threshold_bytes(&self) -> usize {
        self.threshold_bytes
    }

    /// 估算失败时退回 SerializedCopy（更省内存的一侧）
    pub fn select(&self, model: &Model) -> SnapshotStrategy {
        match self.estimator.estimate_size(model) {
            Ok(bytes) => {
                let strategy = SnapshotStrategy::for_size(bytes, self.threshold_bytes);
                debug!(bytes, threshold = self.threshold_bytes, %strategy, "snapshot strategy selected");
                strategy
            }
            Err(e) => {
                warn!(error = %e, "size estimation failed, falling back to serialized copy");
                SnapshotStrategy::SerializedCopy
            }
        }
    }
}

impl Default for SnapshotStrategySelector {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_THRESHOLD)
    }
}

impl std::fmt::Debug for SnapshotStrategySelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStrategySelector")
            .field("threshold_bytes", &self.threshold_bytes)
            .finish_non_exhaustive()
    }
}

/// 快照内容
#[derive(Debug, Clone)]
pub enum SnapshotPayload {
    Full(Box<Model>),
    Serialized { format: SerialFormat, bytes: Vec<u8> },
}

/// 模型快照
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub strategy: SnapshotStrategy,
    pub taken_at: DateTime<Utc>,
    payload: SnapshotPayload,
}

impl Snapshot {
    /// 按指定策略对模型拍快照
    pub fn capture(
        model: &Model,
        strategy: SnapshotStrategy,
        format: SerialFormat,
    ) -> Result<Self, CodecError> {
        let payload = match strategy {
            SnapshotStrategy::FullCopy => SnapshotPayload::Full(Box::new(model.clone())),
            SnapshotStrategy::SerializedCopy => SnapshotPayload::Serialized {
                format,
                bytes: serializer_for(format).serialize(model)?,
            },
        };
        Ok(Self {
            strategy,
            taken_at: Utc::now(),
            payload,
        })
    }

    /// 还原出一份独立的模型
    pub fn materialize(&self) -> Result<Model, CodecError> {
        match &self.payload {
            SnapshotPayload::Full(model) => Ok(model.as_ref().clone()),
            SnapshotPayload::Serialized { format, bytes } => {
                serializer_for(*format).deserialize(bytes)
            }
        }
    }

    /// 只读视图，FullCopy 不再克隆
    pub fn view(&self) -> Result<Cow<'_, Model>, CodecError> {
        match &self.payload {
            SnapshotPayload::Full(model) => Ok(Cow::Borrowed(model.as_ref())),
            SnapshotPayload::Serialized { .. } => self.materialize().map(Cow::Owned),
        }
    }

    pub fn payload(&self) -> &SnapshotPayload {
        &self.payload
    }

    /// 按策略直接产出一份一次性副本（试运行用），不保留快照本身
    pub fn disposable_copy(
        model: &Model,
        strategy: SnapshotStrategy,
        format: SerialFormat,
    ) -> Result<Model, CodecError> {
        match strategy {
            SnapshotStrategy::FullCopy => Ok(model.clone()),
            SnapshotStrategy::SerializedCopy => {
                let codec = serializer_for(format);
                codec.deserialize(&codec.serialize(model)?)
            }
        }
    }

    /// 无法解码的快照，用于测试提交失败路径
    #[cfg(test)]
    pub(crate) fn corrupted(format: SerialFormat) -> Self {
        Self {
            strategy: SnapshotStrategy::SerializedCopy,
            taken_at: Utc::now(),
            payload: SnapshotPayload::Serialized {
                format,
                bytes: vec![0xff; 3],
            },
        }
    }

    /// 序列化快照的字节数，FullCopy 返回 None
    pub fn encoded_len(&self) -> Option<usize> {
        match &self.payload {
            SnapshotPayload::Full(_) => None,
            SnapshotPayload::Serialized { bytes, .. } => Some(bytes.len()),
        }
    }
}
