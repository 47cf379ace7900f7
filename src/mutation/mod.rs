// 变更调度模块
//
// - 动作目录与两级调度表
// - 调度器（单次调度、显式事务、试运行）
// - 请求/响应封装

pub mod action;
pub mod dispatcher;
pub mod envelope;

pub use action::{ActionKind, DispatchTable, GraphHandler, HandlerCell, HandlerFn, TreeHandler};
pub use dispatcher::{ExecuteOptions, MutationDispatcher, MutationOutcome};
pub use envelope::{ErrorBody, MutationRequest, ResponseData, ResponseEnvelope};
