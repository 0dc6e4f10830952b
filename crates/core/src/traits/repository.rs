//! 数据仓储层接口定义
//!
//! 此模块定义了持久化层的核心抽象接口：
//! - 构建任务仓储接口 (BuildTaskRepository)
//! - Agent仓储接口 (AgentRepository)
//! - 节点仓储接口 (NodeRepository)
//!
//! ## 设计原则
//!
//! ### 条件更新
//! 所有状态变更都是带谓词的条件更新，返回受影响的行数。
//! 返回 `0` 表示记录已不存在或已经被其他实例修改，调用方应视为正常竞争而不是错误。
//!
//! ### 抽象解耦
//! 接口与具体实现分离，支持多种后端：
//! - PostgreSQL 实现
//! - SQLite 实现
//! - 内存实现（测试用）
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use dispatch_core::models::{BuildTaskKey, PipelineTaskStatus, TaskPredicate, TaskUpdate};
//!
//! async fn claim(repo: &dyn BuildTaskRepository, key: BuildTaskKey) -> SchedulerResult<bool> {
//!     let predicate = TaskPredicate::for_key(key).with_statuses(&[PipelineTaskStatus::Queue]);
//!     let update = TaskUpdate::status(PipelineTaskStatus::Running).with_host_tag("host-1");
//!     Ok(repo.update_where(&predicate, &update).await? == 1)
//! }
//! ```

use async_trait::async_trait;

use crate::models::{
    Agent, AgentAction, AgentActionRecord, AgentStatus, BuildTask, BuildTaskKey, NewAgent,
    NewBuildTask, NewNode, Node, NodeStatus, OfflineOutcome, TaskPredicate, TaskUpdate,
};
use crate::SchedulerResult;

/// 构建任务仓储接口
///
/// 只负责持久化，不包含任何调度逻辑。
#[async_trait]
pub trait BuildTaskRepository: Send + Sync {
    /// 提交构建任务
    ///
    /// 若 `(build_id, vm_seq_id)` 已存在则覆盖原记录（状态、密钥、镜像、机房等字段以及
    /// `created_time`/`updated_time`），否则插入新记录。任何时候同一组合最多只有一行。
    async fn upsert(&self, task: &NewBuildTask) -> SchedulerResult<BuildTask>;

    /// 根据唯一标识获取任务
    async fn get(&self, key: &BuildTaskKey) -> SchedulerResult<Option<BuildTask>>;

    /// 获取一次构建下的所有任务
    async fn list_by_build(&self, build_id: &str) -> SchedulerResult<Vec<BuildTask>>;

    /// 按谓词查询任务，结果按 `updated_time` 升序排列
    async fn find(
        &self,
        predicate: &TaskPredicate,
        limit: Option<i64>,
    ) -> SchedulerResult<Vec<BuildTask>>;

    /// 对满足谓词的所有行执行条件更新，返回受影响的行数
    async fn update_where(
        &self,
        predicate: &TaskPredicate,
        update: &TaskUpdate,
    ) -> SchedulerResult<u64>;

    /// 删除任务，返回受影响的行数
    async fn delete(&self, key: &BuildTaskKey) -> SchedulerResult<u64>;
}

/// Agent仓储接口
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// 注册Agent，初始状态为 `UN_IMPORT`
    async fn register(&self, agent: &NewAgent) -> SchedulerResult<Agent>;

    async fn get(&self, id: i64, project_id: &str) -> SchedulerResult<Option<Agent>>;

    async fn list_by_status(&self, statuses: &[AgentStatus]) -> SchedulerResult<Vec<Agent>>;

    /// 更新Agent状态
    ///
    /// `expected` 不为空时只有当前状态等于 `expected` 才会更新。
    /// 返回是否有记录被更新。
    async fn update_status(
        &self,
        id: i64,
        project_id: &str,
        status: AgentStatus,
        expected: Option<AgentStatus>,
    ) -> SchedulerResult<bool>;

    /// 追加审计记录
    async fn add_action(
        &self,
        id: i64,
        project_id: &str,
        action: AgentAction,
    ) -> SchedulerResult<()>;

    async fn list_actions(
        &self,
        id: i64,
        project_id: &str,
    ) -> SchedulerResult<Vec<AgentActionRecord>>;

    /// 将心跳超时的健康Agent标记为异常
    ///
    /// 在同一个事务中完成：
    /// 1. 仅当Agent仍为 `IMPORT_OK` 时将其改为 `IMPORT_EXCEPTION`，否则返回 `Skipped`
    /// 2. 追加 `OFFLINE` 审计记录
    /// 3. 节点不存在（包括 `node_id` 为空）或已删除时删除Agent，否则将节点标记为 `ABNORMAL`
    async fn mark_exception(&self, agent: &Agent) -> SchedulerResult<OfflineOutcome>;

    /// 删除Agent，返回是否有记录被删除
    async fn delete(&self, id: i64, project_id: &str) -> SchedulerResult<bool>;
}

/// 节点仓储接口
#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn create_node(&self, node: &NewNode) -> SchedulerResult<Node>;

    async fn get_node(&self, project_id: &str, node_id: i64) -> SchedulerResult<Option<Node>>;

    async fn update_node_status(&self, node_id: i64, status: NodeStatus) -> SchedulerResult<bool>;

    async fn mark_abnormal(&self, node_id: i64) -> SchedulerResult<bool> {
        self.update_node_status(node_id, NodeStatus::Abnormal).await
    }
}
