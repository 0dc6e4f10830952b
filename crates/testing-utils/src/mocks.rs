//! 基于内存的Mock实现
//!
//! 仓储Mock使用与SQL实现相同的谓词语义，可以直接替换真实存储做单元测试。
//! 每个Mock都提供了失败注入和写操作计数，用来验证错误隔离和"未获取锁时不做任何写入"。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::{
    models::{
        Agent, AgentAction, AgentActionRecord, AgentStatus, BuildTask, BuildTaskKey, NewAgent,
        NewBuildTask, NewNode, Node, NodeStatus, OfflineOutcome, TaskPredicate, TaskUpdate,
    },
    traits::{AgentRepository, BuildTaskRepository, DistributedLock, HeartbeatStore, NodeRepository},
    SchedulerError, SchedulerResult,
};

/// 构建任务仓储Mock
#[derive(Debug, Clone, Default)]
pub struct MockBuildTaskRepository {
    tasks: Arc<Mutex<BTreeMap<BuildTaskKey, BuildTask>>>,
    next_id: Arc<Mutex<i64>>,
    fail_updates: Arc<AtomicBool>,
}

impl MockBuildTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn all_tasks(&self) -> Vec<BuildTask> {
        self.tasks.lock().unwrap().values().cloned().collect()
    }

    pub fn task(&self, key: &BuildTaskKey) -> Option<BuildTask> {
        self.tasks.lock().unwrap().get(key).cloned()
    }

    /// 直接修改 `updated_time`，模拟任务停留了一段时间
    pub fn set_updated_time(&self, key: &BuildTaskKey, updated_time: DateTime<Utc>) {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(key) {
            task.updated_time = updated_time;
        }
    }

    /// 之后的 `update_where` 调用全部返回错误
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BuildTaskRepository for MockBuildTaskRepository {
    async fn upsert(&self, task: &NewBuildTask) -> SchedulerResult<BuildTask> {
        let now = Utc::now();
        let key = task.key();
        let mut tasks = self.tasks.lock().unwrap();

        let (id, container_id) = match tasks.get(&key) {
            Some(existing) => (existing.id, existing.container_id.clone()),
            None => {
                let mut next_id = self.next_id.lock().unwrap();
                *next_id += 1;
                (*next_id, None)
            }
        };

        let stored = BuildTask {
            id,
            project_id: task.project_id.clone(),
            agent_id: task.agent_id.clone(),
            pipeline_id: task.pipeline_id.clone(),
            build_id: task.build_id.clone(),
            vm_seq_id: task.vm_seq_id,
            status: task.status,
            secret_key: task.secret_key.clone(),
            image_name: task.image_name.clone(),
            channel_code: task.channel_code.clone(),
            host_tag: task.host_tag.clone(),
            container_id,
            zone: task.zone,
            registry_user: task.registry_user.clone(),
            registry_pwd: task.registry_pwd.clone(),
            image_type: task.image_type.clone(),
            created_time: now,
            updated_time: now,
        };
        tasks.insert(key, stored.clone());
        Ok(stored)
    }

    async fn get(&self, key: &BuildTaskKey) -> SchedulerResult<Option<BuildTask>> {
        Ok(self.task(key))
    }

    async fn list_by_build(&self, build_id: &str) -> SchedulerResult<Vec<BuildTask>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.build_id == build_id)
            .cloned()
            .collect())
    }

    async fn find(
        &self,
        predicate: &TaskPredicate,
        limit: Option<i64>,
    ) -> SchedulerResult<Vec<BuildTask>> {
        let mut matched: Vec<BuildTask> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| predicate.matches(t))
            .cloned()
            .collect();
        matched.sort_by_key(|t| (t.updated_time, t.id));
        if let Some(limit) = limit {
            matched.truncate(limit.max(0) as usize);
        }
        Ok(matched)
    }

    async fn update_where(
        &self,
        predicate: &TaskPredicate,
        update: &TaskUpdate,
    ) -> SchedulerResult<u64> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(SchedulerError::DatabaseOperation("模拟的数据库故障".to_string()));
        }
        if update.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut affected = 0;
        for task in self.tasks.lock().unwrap().values_mut() {
            if predicate.matches(task) {
                update.apply_to(task, now);
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&self, key: &BuildTaskKey) -> SchedulerResult<u64> {
        Ok(self.tasks.lock().unwrap().remove(key).map_or(0, |_| 1))
    }
}

#[derive(Debug, Default)]
struct AgentState {
    agents: BTreeMap<(String, i64), Agent>,
    nodes: HashMap<i64, Node>,
    actions: Vec<AgentActionRecord>,
    next_id: i64,
}

/// Agent/节点仓储Mock，同时实现 `AgentRepository` 和 `NodeRepository`
#[derive(Debug, Clone, Default)]
pub struct MockAgentRepository {
    state: Arc<Mutex<AgentState>>,
    failing_agents: Arc<Mutex<HashSet<i64>>>,
    writes: Arc<AtomicUsize>,
}

impl MockAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写操作次数（状态更新、审计记录、删除、节点状态更新）
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// 对该Agent的写操作返回错误
    pub fn fail_agent(&self, agent_id: i64) {
        self.failing_agents.lock().unwrap().insert(agent_id);
    }

    pub fn agent(&self, id: i64, project_id: &str) -> Option<Agent> {
        self.state
            .lock()
            .unwrap()
            .agents
            .get(&(project_id.to_string(), id))
            .cloned()
    }

    pub fn node(&self, node_id: i64) -> Option<Node> {
        self.state.lock().unwrap().nodes.get(&node_id).cloned()
    }

    pub fn actions(&self) -> Vec<AgentActionRecord> {
        self.state.lock().unwrap().actions.clone()
    }

    /// 直接写入指定状态的Agent，不计入写操作次数
    pub fn insert_agent(&self, agent: NewAgent, status: AgentStatus) -> Agent {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let stored = Agent {
            id: state.next_id,
            project_id: agent.project_id,
            node_id: agent.node_id,
            status,
            ip: agent.ip,
            hostname: agent.hostname,
            created_time: now,
            updated_time: now,
        };
        state
            .agents
            .insert((stored.project_id.clone(), stored.id), stored.clone());
        stored
    }

    /// 直接写入节点，不计入写操作次数
    pub fn insert_node(&self, project_id: &str, node_status: NodeStatus) -> Node {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let node = Node {
            id: state.next_id,
            project_id: project_id.to_string(),
            node_status,
            created_time: now,
            updated_time: now,
        };
        state.nodes.insert(node.id, node.clone());
        node
    }

    fn check_failure(&self, agent_id: i64) -> SchedulerResult<()> {
        if self.failing_agents.lock().unwrap().contains(&agent_id) {
            return Err(SchedulerError::DatabaseOperation(format!(
                "模拟的Agent {agent_id} 写入失败"
            )));
        }
        Ok(())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentRepository for MockAgentRepository {
    async fn register(&self, agent: &NewAgent) -> SchedulerResult<Agent> {
        self.record_write();
        Ok(self.insert_agent(agent.clone(), AgentStatus::UnImport))
    }

    async fn get(&self, id: i64, project_id: &str) -> SchedulerResult<Option<Agent>> {
        Ok(self.agent(id, project_id))
    }

    async fn list_by_status(&self, statuses: &[AgentStatus]) -> SchedulerResult<Vec<Agent>> {
        let mut agents: Vec<Agent> = self
            .state
            .lock()
            .unwrap()
            .agents
            .values()
            .filter(|a| statuses.contains(&a.status))
            .cloned()
            .collect();
        agents.sort_by_key(|a| a.id);
        Ok(agents)
    }

    async fn update_status(
        &self,
        id: i64,
        project_id: &str,
        status: AgentStatus,
        expected: Option<AgentStatus>,
    ) -> SchedulerResult<bool> {
        self.check_failure(id)?;
        self.record_write();

        let mut state = self.state.lock().unwrap();
        match state.agents.get_mut(&(project_id.to_string(), id)) {
            Some(agent) if expected.map_or(true, |e| e == agent.status) => {
                agent.status = status;
                agent.updated_time = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_action(
        &self,
        id: i64,
        project_id: &str,
        action: AgentAction,
    ) -> SchedulerResult<()> {
        self.check_failure(id)?;
        self.record_write();

        let mut state = self.state.lock().unwrap();
        let record_id = state.actions.len() as i64 + 1;
        state.actions.push(AgentActionRecord {
            id: record_id,
            project_id: project_id.to_string(),
            agent_id: id,
            action,
            action_time: Utc::now(),
        });
        Ok(())
    }

    async fn list_actions(
        &self,
        id: i64,
        project_id: &str,
    ) -> SchedulerResult<Vec<AgentActionRecord>> {
        Ok(self
            .actions()
            .into_iter()
            .filter(|a| a.agent_id == id && a.project_id == project_id)
            .collect())
    }

    async fn mark_exception(&self, agent: &Agent) -> SchedulerResult<OfflineOutcome> {
        self.check_failure(agent.id)?;

        let now = Utc::now();
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let key = (agent.project_id.clone(), agent.id);

        let node_id = match state.agents.get_mut(&key) {
            Some(current) if current.status == AgentStatus::ImportOk => {
                current.status = AgentStatus::ImportException;
                current.updated_time = now;
                current.node_id
            }
            _ => return Ok(OfflineOutcome::Skipped),
        };
        self.record_write();

        let record_id = state.actions.len() as i64 + 1;
        state.actions.push(AgentActionRecord {
            id: record_id,
            project_id: agent.project_id.clone(),
            agent_id: agent.id,
            action: AgentAction::Offline,
            action_time: now,
        });

        let live_node = node_id.and_then(|id| {
            state
                .nodes
                .get_mut(&id)
                .filter(|n| n.project_id == agent.project_id && !n.is_deleted())
        });

        match live_node {
            Some(node) => {
                node.node_status = NodeStatus::Abnormal;
                node.updated_time = now;
                Ok(OfflineOutcome::NodeMarkedAbnormal)
            }
            None => {
                state.agents.remove(&key);
                Ok(OfflineOutcome::AgentDeleted)
            }
        }
    }

    async fn delete(&self, id: i64, project_id: &str) -> SchedulerResult<bool> {
        self.check_failure(id)?;
        self.record_write();
        Ok(self
            .state
            .lock()
            .unwrap()
            .agents
            .remove(&(project_id.to_string(), id))
            .is_some())
    }
}

#[async_trait]
impl NodeRepository for MockAgentRepository {
    async fn create_node(&self, node: &NewNode) -> SchedulerResult<Node> {
        self.record_write();
        Ok(self.insert_node(&node.project_id, node.node_status))
    }

    async fn get_node(&self, project_id: &str, node_id: i64) -> SchedulerResult<Option<Node>> {
        Ok(self
            .node(node_id)
            .filter(|n| n.project_id == project_id))
    }

    async fn update_node_status(&self, node_id: i64, status: NodeStatus) -> SchedulerResult<bool> {
        self.record_write();
        match self.state.lock().unwrap().nodes.get_mut(&node_id) {
            Some(node) => {
                node.node_status = status;
                node.updated_time = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// 心跳存储Mock，不处理过期
#[derive(Debug, Clone, Default)]
pub struct MockHeartbeatStore {
    heartbeats: Arc<Mutex<HashMap<(String, i64), i64>>>,
    failing_agents: Arc<Mutex<HashSet<i64>>>,
}

impl MockHeartbeatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, agent_id: i64, project_id: &str, timestamp_ms: i64) {
        self.heartbeats
            .lock()
            .unwrap()
            .insert((project_id.to_string(), agent_id), timestamp_ms);
    }

    /// 读取该Agent的心跳时返回错误
    pub fn fail_agent(&self, agent_id: i64) {
        self.failing_agents.lock().unwrap().insert(agent_id);
    }
}

#[async_trait]
impl HeartbeatStore for MockHeartbeatStore {
    async fn get_heartbeat(&self, agent_id: i64, project_id: &str) -> SchedulerResult<Option<i64>> {
        if self.failing_agents.lock().unwrap().contains(&agent_id) {
            return Err(SchedulerError::Redis("模拟的心跳存储故障".to_string()));
        }
        Ok(self
            .heartbeats
            .lock()
            .unwrap()
            .get(&(project_id.to_string(), agent_id))
            .copied())
    }

    async fn set_heartbeat(
        &self,
        agent_id: i64,
        project_id: &str,
        timestamp_ms: i64,
        _ttl: Duration,
    ) -> SchedulerResult<()> {
        self.put(agent_id, project_id, timestamp_ms);
        Ok(())
    }
}

/// 锁的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockBehavior {
    /// 正常加锁
    Available,
    /// 锁被其他实例持有
    Held,
    /// 锁存储不可用
    Unavailable,
}

/// 分布式锁Mock
#[derive(Debug, Clone)]
pub struct MockDistributedLock {
    behavior: Arc<Mutex<LockBehavior>>,
    held: Arc<Mutex<HashSet<String>>>,
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl MockDistributedLock {
    pub fn new(behavior: LockBehavior) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(behavior)),
            held: Arc::new(Mutex::new(HashSet::new())),
            acquired: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_behavior(&self, behavior: LockBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn acquired_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held.lock().unwrap().contains(key)
    }
}

impl Default for MockDistributedLock {
    fn default() -> Self {
        Self::new(LockBehavior::Available)
    }
}

#[async_trait]
impl DistributedLock for MockDistributedLock {
    async fn try_acquire(&self, key: &str, _ttl: Duration) -> SchedulerResult<bool> {
        match *self.behavior.lock().unwrap() {
            LockBehavior::Unavailable => Err(SchedulerError::Redis("模拟的锁存储故障".to_string())),
            LockBehavior::Held => Ok(false),
            LockBehavior::Available => {
                let inserted = self.held.lock().unwrap().insert(key.to_string());
                if inserted {
                    self.acquired.fetch_add(1, Ordering::SeqCst);
                }
                Ok(inserted)
            }
        }
    }

    async fn release(&self, key: &str) -> SchedulerResult<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.held.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::{AgentBuilder, BuildTaskBuilder};
    use dispatch_core::models::PipelineTaskStatus;

    #[tokio::test]
    async fn test_mock_upsert_keeps_single_row() {
        let repo = MockBuildTaskRepository::new();
        let first = repo
            .upsert(&BuildTaskBuilder::new().with_key("b-1", 1).build())
            .await
            .unwrap();
        let second = repo
            .upsert(
                &BuildTaskBuilder::new()
                    .with_key("b-1", 1)
                    .with_image("centos:7")
                    .build(),
            )
            .await
            .unwrap();

        assert_eq!(repo.count(), 1);
        assert_eq!(first.id, second.id);
        assert_eq!(second.image_name, "centos:7");
    }

    #[tokio::test]
    async fn test_mock_conditional_update() {
        let repo = MockBuildTaskRepository::new();
        let task = repo.upsert(&BuildTaskBuilder::new().build()).await.unwrap();
        let predicate =
            TaskPredicate::for_key(task.key()).with_statuses(&[PipelineTaskStatus::Queue]);
        let update = TaskUpdate::status(PipelineTaskStatus::Running);

        assert_eq!(repo.update_where(&predicate, &update).await.unwrap(), 1);
        assert_eq!(repo.update_where(&predicate, &update).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mock_mark_exception_with_dangling_node() {
        let repo = MockAgentRepository::new();
        let agent =
            repo.insert_agent(AgentBuilder::new().with_node(999).build(), AgentStatus::ImportOk);

        let outcome = repo.mark_exception(&agent).await.unwrap();
        assert_eq!(outcome, OfflineOutcome::AgentDeleted);
        assert!(repo.agent(agent.id, &agent.project_id).is_none());
        assert_eq!(repo.actions().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_lock_behaviors() {
        let lock = MockDistributedLock::default();
        assert!(lock.try_acquire("k", Duration::from_secs(1)).await.unwrap());
        assert!(!lock.try_acquire("k", Duration::from_secs(1)).await.unwrap());
        lock.release("k").await.unwrap();

        lock.set_behavior(LockBehavior::Unavailable);
        assert!(lock.try_acquire("k", Duration::from_secs(1)).await.is_err());
    }
}
