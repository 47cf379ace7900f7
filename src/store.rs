//! 模型存储
//!
//! 调用方提供的 模型ID -> 模型 映射。事务引擎只需要 get / replace / contains，
//! 存储自身的加锁由实现者负责。

use crate::model::Model;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub trait ModelStore: Send + Sync {
    fn get(&self, model_id: &str) -> Option<Arc<Model>>;

    /// 整体替换模型（提交时调用）
    fn replace(&self, model_id: &str, model: Model);

    fn contains(&self, model_id: &str) -> bool {
        self.get(model_id).is_some()
    }
}

/// 内存模型存储
///
/// 多读单写：读者拿到的是 Arc 快照，替换只交换指针，读者永远看不到半成品
#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    models: RwLock<HashMap<String, Arc<Model>>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, model_id: &str, model: Model) {
        self.models
            .write()
            .insert(model_id.to_string(), Arc::new(model));
    }

    pub fn remove(&self, model_id: &str) -> Option<Arc<Model>> {
        self.models.write().remove(model_id)
    }

    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.models.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}

impl ModelStore for InMemoryModelStore {
    fn get(&self, model_id: &str) -> Option<Arc<Model>> {
        self.models.read().get(model_id).cloned()
    }

    fn replace(&self, model_id: &str, model: Model) {
        self.models
            .write()
            .insert(model_id.to_string(), Arc::new(model));
    }

    fn contains(&self, model_id: &str) -> bool {
        self.models.read().contains_key(model_id)
    }
}
