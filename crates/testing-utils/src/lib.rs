//! # Dispatch Testing Utils
//!
//! 构建任务调度和Agent心跳监控的测试辅助：
//!
//! - **Mock仓储**: 基于内存的 `BuildTaskRepository` / `AgentRepository` / `NodeRepository`，
//!   复用 [`TaskPredicate::matches`](dispatch_core::models::TaskPredicate::matches) 的语义
//! - **Mock心跳存储与锁**: 支持注入失败，用于验证错误隔离
//! - **测试数据构建器**
//!
//! ```toml
//! [dev-dependencies]
//! dispatch-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
