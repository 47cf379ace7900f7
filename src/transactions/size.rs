// 模型大小估算
//
// 快照策略选择依据估算大小，而不是精确大小

use crate::model::Model;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("size estimation failed: {0}")]
pub struct SizeEstimateError(pub String);

/// 大小估算器
pub trait SizeEstimator: Send + Sync {
    fn estimate_size(&self, model: &Model) -> Result<usize, SizeEstimateError>;
}

/// 遍历实体累加字符串和属性的大小（默认，开销低）
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralSizeEstimator;

impl SizeEstimator for StructuralSizeEstimator {
    fn estimate_size(&self, model: &Model) -> Result<usize, SizeEstimateError> {
        Ok(match model {
            Model::Tree(t) => t.approx_size(),
            Model::Graph(g) => g.approx_size(),
        })
    }
}

/// 按 bincode 编码后的长度计算（精确，但要走一遍序列化）
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodedSizeEstimator;

impl SizeEstimator for EncodedSizeEstimator {
    fn estimate_size(&self, model: &Model) -> Result<usize, SizeEstimateError> {
        bincode::serialized_size(model)
            .map(|n| n as usize)
            .map_err(|e| SizeEstimateError(e.to_string()))
    }
}
