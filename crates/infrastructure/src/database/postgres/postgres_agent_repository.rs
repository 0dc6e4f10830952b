use async_trait::async_trait;
use chrono::Utc;
use dispatch_core::{
    models::{
        Agent, AgentAction, AgentActionRecord, AgentStatus, NewAgent, NewNode, Node, NodeStatus,
        OfflineOutcome,
    },
    traits::{AgentRepository, NodeRepository},
    SchedulerResult,
};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, instrument, warn};

use crate::{
    error_handling::{OperationContext, RepositoryErrorHelpers, RepositoryOperation},
    timeout_handler::TimeoutUtils,
};

const AGENT_COLUMNS: &str = "id, project_id, node_id, status, ip, hostname, created_time, updated_time";
const NODE_COLUMNS: &str = "id, project_id, node_status, created_time, updated_time";

/// PostgreSQL Agent/节点仓储
pub struct PostgresAgentRepository {
    pool: PgPool,
}

impl PostgresAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_agent(row: &PgRow) -> SchedulerResult<Agent> {
        let status: String = row.try_get("status")?;

        Ok(Agent {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            node_id: row.try_get("node_id")?,
            status: status.parse()?,
            ip: row.try_get("ip")?,
            hostname: row.try_get("hostname")?,
            created_time: row.try_get("created_time")?,
            updated_time: row.try_get("updated_time")?,
        })
    }

    fn row_to_node(row: &PgRow) -> SchedulerResult<Node> {
        let node_status: String = row.try_get("node_status")?;

        Ok(Node {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            node_status: NodeStatus::parse_by_name(&node_status),
            created_time: row.try_get("created_time")?,
            updated_time: row.try_get("updated_time")?,
        })
    }

    fn row_to_action(row: &PgRow) -> SchedulerResult<AgentActionRecord> {
        let action: String = row.try_get("action")?;

        Ok(AgentActionRecord {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            agent_id: row.try_get("agent_id")?,
            action: action.parse()?,
            action_time: row.try_get("action_time")?,
        })
    }
}

#[async_trait]
impl AgentRepository for PostgresAgentRepository {
    #[instrument(skip(self, agent), fields(project_id = %agent.project_id))]
    async fn register(&self, agent: &NewAgent) -> SchedulerResult<Agent> {
        let context = OperationContext::new(
            RepositoryOperation::Create,
            format!("Agent (项目: {})", agent.project_id),
        );
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO agents (project_id, node_id, status, ip, hostname, created_time, updated_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) RETURNING {AGENT_COLUMNS}"
        );

        let row = TimeoutUtils::database(
            async {
                sqlx::query(&sql)
                    .bind(&agent.project_id)
                    .bind(agent.node_id)
                    .bind(AgentStatus::UnImport.as_str())
                    .bind(&agent.ip)
                    .bind(&agent.hostname)
                    .bind(now)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "register_agent",
        )
        .await?;

        Self::row_to_agent(&row)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: i64, project_id: &str) -> SchedulerResult<Option<Agent>> {
        let context = OperationContext::new(
            RepositoryOperation::Read,
            format!("Agent {id} (项目: {project_id})"),
        );
        let sql = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1 AND project_id = $2");

        let row = TimeoutUtils::database(
            async {
                sqlx::query(&sql)
                    .bind(id)
                    .bind(project_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "get_agent",
        )
        .await?;

        row.as_ref().map(Self::row_to_agent).transpose()
    }

    #[instrument(skip(self))]
    async fn list_by_status(&self, statuses: &[AgentStatus]) -> SchedulerResult<Vec<Agent>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let context = OperationContext::new(RepositoryOperation::Query, "Agent");
        let placeholders: Vec<String> = (1..=statuses.len()).map(|i| format!("${i}")).collect();
        let sql = format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE status IN ({}) ORDER BY id ASC",
            placeholders.join(", ")
        );

        let rows = TimeoutUtils::database(
            async {
                let mut query = sqlx::query(&sql);
                for status in statuses {
                    query = query.bind(status.as_str());
                }
                query
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "list_agents_by_status",
        )
        .await?;

        rows.iter().map(Self::row_to_agent).collect()
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        id: i64,
        project_id: &str,
        status: AgentStatus,
        expected: Option<AgentStatus>,
    ) -> SchedulerResult<bool> {
        let context = OperationContext::new(
            RepositoryOperation::Update,
            format!("Agent {id} (项目: {project_id})"),
        )
        .with_additional_info(format!("状态 -> {status}"));

        let result = TimeoutUtils::database(
            async {
                let query = match expected {
                    Some(expected) => sqlx::query(
                        "UPDATE agents SET status = $1, updated_time = $2 \
                         WHERE id = $3 AND project_id = $4 AND status = $5",
                    )
                    .bind(status.as_str())
                    .bind(Utc::now())
                    .bind(id)
                    .bind(project_id)
                    .bind(expected.as_str()),
                    None => sqlx::query(
                        "UPDATE agents SET status = $1, updated_time = $2 \
                         WHERE id = $3 AND project_id = $4",
                    )
                    .bind(status.as_str())
                    .bind(Utc::now())
                    .bind(id)
                    .bind(project_id),
                };
                query
                    .execute(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "update_agent_status",
        )
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn add_action(
        &self,
        id: i64,
        project_id: &str,
        action: AgentAction,
    ) -> SchedulerResult<()> {
        let context = OperationContext::new(
            RepositoryOperation::Create,
            format!("Agent {id} 的审计记录"),
        );

        TimeoutUtils::database(
            async {
                sqlx::query(
                    "INSERT INTO agent_actions (project_id, agent_id, action, action_time) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(project_id)
                .bind(id)
                .bind(action.as_str())
                .bind(Utc::now())
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "add_agent_action",
        )
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_actions(
        &self,
        id: i64,
        project_id: &str,
    ) -> SchedulerResult<Vec<AgentActionRecord>> {
        let context = OperationContext::new(
            RepositoryOperation::Query,
            format!("Agent {id} 的审计记录"),
        );

        let rows = TimeoutUtils::database(
            async {
                sqlx::query(
                    "SELECT id, project_id, agent_id, action, action_time FROM agent_actions \
                     WHERE agent_id = $1 AND project_id = $2 ORDER BY action_time ASC, id ASC",
                )
                .bind(id)
                .bind(project_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "list_agent_actions",
        )
        .await?;

        rows.iter().map(Self::row_to_action).collect()
    }

    #[instrument(skip(self, agent), fields(agent_id = agent.id, project_id = %agent.project_id))]
    async fn mark_exception(&self, agent: &Agent) -> SchedulerResult<OfflineOutcome> {
        let context = OperationContext::new(
            RepositoryOperation::Transaction,
            agent.entity_description(),
        )
        .with_additional_info("心跳超时下线");
        let db_err = |e| RepositoryErrorHelpers::database_error(&context, e);

        TimeoutUtils::database(
            async {
                let now = Utc::now();
                let mut tx = self.pool.begin().await.map_err(db_err)?;

                let updated = sqlx::query(
                    "UPDATE agents SET status = $1, updated_time = $2 \
                     WHERE id = $3 AND project_id = $4 AND status = $5 RETURNING node_id",
                )
                .bind(AgentStatus::ImportException.as_str())
                .bind(now)
                .bind(agent.id)
                .bind(&agent.project_id)
                .bind(AgentStatus::ImportOk.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;

                let Some(row) = updated else {
                    tx.rollback().await.map_err(db_err)?;
                    debug!("{} 状态已变化，跳过下线处理", agent.entity_description());
                    return Ok(OfflineOutcome::Skipped);
                };
                let node_id: Option<i64> = row.try_get("node_id")?;

                sqlx::query(
                    "INSERT INTO agent_actions (project_id, agent_id, action, action_time) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(&agent.project_id)
                .bind(agent.id)
                .bind(AgentAction::Offline.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                let node_status = match node_id {
                    Some(node_id) => sqlx::query(
                        "SELECT node_status FROM nodes WHERE id = $1 AND project_id = $2",
                    )
                    .bind(node_id)
                    .bind(&agent.project_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?
                    .map(|r| r.try_get::<String, _>("node_status"))
                    .transpose()?
                    .map(|s| NodeStatus::parse_by_name(&s)),
                    None => None,
                };

                let outcome = match (node_id, node_status) {
                    (Some(node_id), Some(status)) if status != NodeStatus::Deleted => {
                        sqlx::query(
                            "UPDATE nodes SET node_status = $1, updated_time = $2 WHERE id = $3",
                        )
                        .bind(NodeStatus::Abnormal.as_str())
                        .bind(now)
                        .bind(node_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_err)?;
                        OfflineOutcome::NodeMarkedAbnormal
                    }
                    _ => {
                        warn!("{} 所在节点已删除或不存在，删除Agent", agent.entity_description());
                        sqlx::query("DELETE FROM agents WHERE id = $1 AND project_id = $2")
                            .bind(agent.id)
                            .bind(&agent.project_id)
                            .execute(&mut *tx)
                            .await
                            .map_err(db_err)?;
                        OfflineOutcome::AgentDeleted
                    }
                };

                tx.commit().await.map_err(db_err)?;
                Ok(outcome)
            },
            "mark_agent_exception",
        )
        .await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64, project_id: &str) -> SchedulerResult<bool> {
        let context = OperationContext::new(
            RepositoryOperation::Delete,
            format!("Agent {id} (项目: {project_id})"),
        );

        let result = TimeoutUtils::database(
            async {
                sqlx::query("DELETE FROM agents WHERE id = $1 AND project_id = $2")
                    .bind(id)
                    .bind(project_id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "delete_agent",
        )
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl NodeRepository for PostgresAgentRepository {
    #[instrument(skip(self, node), fields(project_id = %node.project_id))]
    async fn create_node(&self, node: &NewNode) -> SchedulerResult<Node> {
        let context = OperationContext::new(RepositoryOperation::Create, "节点");
        let sql = format!(
            "INSERT INTO nodes (project_id, node_status, created_time, updated_time) \
             VALUES ($1, $2, $3, $3) RETURNING {NODE_COLUMNS}"
        );

        let row = TimeoutUtils::database(
            async {
                sqlx::query(&sql)
                    .bind(&node.project_id)
                    .bind(node.node_status.as_str())
                    .bind(Utc::now())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "create_node",
        )
        .await?;

        Self::row_to_node(&row)
    }

    #[instrument(skip(self))]
    async fn get_node(&self, project_id: &str, node_id: i64) -> SchedulerResult<Option<Node>> {
        let context = OperationContext::new(RepositoryOperation::Read, format!("节点 {node_id}"));
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = $1 AND project_id = $2");

        let row = TimeoutUtils::database(
            async {
                sqlx::query(&sql)
                    .bind(node_id)
                    .bind(project_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "get_node",
        )
        .await?;

        row.as_ref().map(Self::row_to_node).transpose()
    }

    #[instrument(skip(self))]
    async fn update_node_status(&self, node_id: i64, status: NodeStatus) -> SchedulerResult<bool> {
        let context = OperationContext::new(RepositoryOperation::Update, format!("节点 {node_id}"))
            .with_additional_info(format!("状态 -> {status}"));

        let result = TimeoutUtils::database(
            async {
                sqlx::query("UPDATE nodes SET node_status = $1, updated_time = $2 WHERE id = $3")
                    .bind(status.as_str())
                    .bind(Utc::now())
                    .bind(node_id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "update_node_status",
        )
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
