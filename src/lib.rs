pub mod values;
pub mod model;
pub mod codec;
pub mod store;
pub mod transactions;
pub mod resolver;
pub mod toolkit;
pub mod validation;
pub mod mutation;
pub mod error;
pub mod concurrent;

pub use crate::model::{Model, ModelKind};
pub use crate::store::{InMemoryModelStore, ModelStore};
pub use crate::transactions::{TransactionConfig, TransactionManager};
pub use crate::mutation::{ActionKind, ExecuteOptions, MutationDispatcher};
pub use crate::resolver::TargetSelector;
pub use crate::error::{MutationError, MutationResult};
pub use crate::concurrent::SharedDispatcher;
