//! # 数据模型
//!
//! 构建任务调度与Agent心跳监控共用的数据结构。
//!
//! ## 核心模型
//!
//! ### BuildTask - 容器构建任务
//! 以 `(build_id, vm_seq_id)` 为唯一标识，记录状态、机房、构建机认领信息和容器元数据。
//!
//! ### Agent / Node - 第三方构建机
//! Agent记录导入状态，Node是其所在的基础设施节点。心跳时间不保存在这里，
//! 而是保存在独立的心跳存储中。
//!
//! ### TaskPredicate - 查询/更新谓词
//! 调度逻辑通过谓词对象描述要操作的行，存储实现负责翻译成具体查询。
//!
//! ## 状态管理
//!
//! ### 构建任务状态流转
//! ```text
//! QUEUE → RUNNING → DONE / FAILURE
//!   └──────────────→ FAILURE
//! ```
//!
//! ### Agent状态流转
//! ```text
//! UN_IMPORT → UN_IMPORT_OK → IMPORT_OK → IMPORT_EXCEPTION
//! ```

pub mod agent;
pub mod build_task;
pub mod filter;

pub use agent::*;
pub use build_task::*;
pub use filter::*;
