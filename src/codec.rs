//! 模型序列化
//!
//! 序列化快照（SerializedCopy）和 dry-run 副本使用的编解码器

use crate::model::Model;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// 序列化格式标记，随快照一起保存，恢复时据此选择解码器
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SerialFormat {
    #[default]
    Bincode,
    Json,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{format} encode failed: {message}")]
    Encode { format: SerialFormat, message: String },

    #[error("{format} decode failed: {message}")]
    Decode { format: SerialFormat, message: String },
}

pub trait ModelSerializer: Send + Sync {
    fn format(&self) -> SerialFormat;
    fn serialize(&self, model: &Model) -> Result<Vec<u8>, CodecError>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Model, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl ModelSerializer for BincodeSerializer {
    fn format(&self) -> SerialFormat {
        SerialFormat::Bincode
    }

    fn serialize(&self, model: &Model) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(model).map_err(|e| CodecError::Encode {
            format: SerialFormat::Bincode,
            message: e.to_string(),
        })
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Model, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode {
            format: SerialFormat::Bincode,
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl ModelSerializer for JsonSerializer {
    fn format(&self) -> SerialFormat {
        SerialFormat::Json
    }

    fn serialize(&self, model: &Model) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(model).map_err(|e| CodecError::Encode {
            format: SerialFormat::Json,
            message: e.to_string(),
        })
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Model, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            format: SerialFormat::Json,
            message: e.to_string(),
        })
    }
}

/// 按格式标记取编解码器
pub fn serializer_for(format: SerialFormat) -> &'static dyn ModelSerializer {
    match format {
        SerialFormat::Bincode => &BincodeSerializer,
        SerialFormat::Json => &JsonSerializer,
    }
}
