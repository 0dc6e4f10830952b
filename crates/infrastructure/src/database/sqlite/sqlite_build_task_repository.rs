use async_trait::async_trait;
use chrono::Utc;
use dispatch_core::{
    models::{BuildTask, BuildTaskKey, NewBuildTask, TaskPredicate, TaskUpdate, Zone},
    traits::BuildTaskRepository,
    SchedulerResult,
};
use sqlx::{
    query::Query,
    sqlite::{SqliteArguments, SqliteRow},
    Row, Sqlite, SqlitePool,
};
use tracing::{debug, instrument};

use crate::{
    database::query_builder::{
        PlaceholderStyle, TaskQueryBuilder, TaskQueryParam, BUILD_TASK_COLUMNS,
    },
    error_handling::{OperationContext, RepositoryErrorHelpers, RepositoryOperation},
    timeout_handler::TimeoutUtils,
};

/// SQLite 构建任务仓储
pub struct SqliteBuildTaskRepository {
    pool: SqlitePool,
}

impl SqliteBuildTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<BuildTask> {
        let status: String = row.try_get("status")?;
        let zone: String = row.try_get("zone")?;

        Ok(BuildTask {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            agent_id: row.try_get("agent_id")?,
            pipeline_id: row.try_get("pipeline_id")?,
            build_id: row.try_get("build_id")?,
            vm_seq_id: row.try_get("vm_seq_id")?,
            status: status.parse()?,
            secret_key: row.try_get("secret_key")?,
            image_name: row.try_get("image_name")?,
            channel_code: row.try_get("channel_code")?,
            host_tag: row.try_get("host_tag")?,
            container_id: row.try_get("container_id")?,
            zone: Zone::parse_optional(Some(&zone))?,
            registry_user: row.try_get("registry_user")?,
            registry_pwd: row.try_get("registry_pwd")?,
            image_type: row.try_get("image_type")?,
            created_time: row.try_get("created_time")?,
            updated_time: row.try_get("updated_time")?,
        })
    }

    fn bind_params<'q>(
        mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
        params: Vec<TaskQueryParam>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        for param in params {
            query = match param {
                TaskQueryParam::Text(value) => query.bind(value),
                TaskQueryParam::Int32(value) => query.bind(value),
                TaskQueryParam::Int64(value) => query.bind(value),
                TaskQueryParam::Timestamp(value) => query.bind(value),
            };
        }
        query
    }
}

#[async_trait]
impl BuildTaskRepository for SqliteBuildTaskRepository {
    #[instrument(skip(self, task), fields(build_id = %task.build_id, vm_seq_id = task.vm_seq_id))]
    async fn upsert(&self, task: &NewBuildTask) -> SchedulerResult<BuildTask> {
        let context = OperationContext::new(
            RepositoryOperation::Create,
            format!("构建任务 {}", task.key()),
        );
        let now = Utc::now();
        let sql = format!(
            r#"
            INSERT INTO build_tasks (project_id, agent_id, pipeline_id, build_id, vm_seq_id, status, secret_key, image_name, channel_code, host_tag, zone, registry_user, registry_pwd, image_type, created_time, updated_time)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
            ON CONFLICT (build_id, vm_seq_id) DO UPDATE SET
                project_id = excluded.project_id,
                agent_id = excluded.agent_id,
                pipeline_id = excluded.pipeline_id,
                status = excluded.status,
                secret_key = excluded.secret_key,
                image_name = excluded.image_name,
                channel_code = excluded.channel_code,
                host_tag = excluded.host_tag,
                zone = excluded.zone,
                registry_user = excluded.registry_user,
                registry_pwd = excluded.registry_pwd,
                image_type = excluded.image_type,
                created_time = excluded.created_time,
                updated_time = excluded.updated_time
            RETURNING {BUILD_TASK_COLUMNS}
            "#
        );

        let row = TimeoutUtils::database(
            async {
                sqlx::query(&sql)
                    .bind(&task.project_id)
                    .bind(&task.agent_id)
                    .bind(&task.pipeline_id)
                    .bind(&task.build_id)
                    .bind(task.vm_seq_id)
                    .bind(task.status.as_str())
                    .bind(&task.secret_key)
                    .bind(&task.image_name)
                    .bind(&task.channel_code)
                    .bind(&task.host_tag)
                    .bind(Zone::column_value(task.zone))
                    .bind(&task.registry_user)
                    .bind(&task.registry_pwd)
                    .bind(&task.image_type)
                    .bind(now)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "upsert_build_task",
        )
        .await?;

        debug!("提交构建任务成功: {}", task.key());
        Self::row_to_task(&row)
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &BuildTaskKey) -> SchedulerResult<Option<BuildTask>> {
        let context = OperationContext::new(RepositoryOperation::Read, format!("构建任务 {key}"));
        let sql = format!(
            "SELECT {BUILD_TASK_COLUMNS} FROM build_tasks WHERE build_id = ?1 AND vm_seq_id = ?2"
        );

        let row = TimeoutUtils::database(
            async {
                sqlx::query(&sql)
                    .bind(&key.build_id)
                    .bind(key.vm_seq_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "get_build_task",
        )
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn list_by_build(&self, build_id: &str) -> SchedulerResult<Vec<BuildTask>> {
        let context =
            OperationContext::new(RepositoryOperation::Query, format!("构建 {build_id} 的任务"));
        let sql = format!(
            "SELECT {BUILD_TASK_COLUMNS} FROM build_tasks WHERE build_id = ?1 ORDER BY vm_seq_id ASC"
        );

        let rows = TimeoutUtils::database(
            async {
                sqlx::query(&sql)
                    .bind(build_id)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "list_build_tasks",
        )
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self, predicate))]
    async fn find(
        &self,
        predicate: &TaskPredicate,
        limit: Option<i64>,
    ) -> SchedulerResult<Vec<BuildTask>> {
        let context = OperationContext::new(RepositoryOperation::Query, "构建任务");
        let (sql, params) =
            TaskQueryBuilder::build_select(PlaceholderStyle::Question, predicate, limit);

        let rows = TimeoutUtils::database(
            async {
                Self::bind_params(sqlx::query(&sql), params)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "find_build_tasks",
        )
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self, predicate, update))]
    async fn update_where(
        &self,
        predicate: &TaskPredicate,
        update: &TaskUpdate,
    ) -> SchedulerResult<u64> {
        let Some((sql, params)) =
            TaskQueryBuilder::build_update(PlaceholderStyle::Question, predicate, update, Utc::now())
        else {
            return Ok(0);
        };
        let context = OperationContext::new(RepositoryOperation::BatchUpdate, "构建任务");

        let result = TimeoutUtils::database(
            async {
                Self::bind_params(sqlx::query(&sql), params)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "update_build_tasks",
        )
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &BuildTaskKey) -> SchedulerResult<u64> {
        let context =
            OperationContext::new(RepositoryOperation::Delete, format!("构建任务 {key}"));

        let result = TimeoutUtils::database(
            async {
                sqlx::query("DELETE FROM build_tasks WHERE build_id = ?1 AND vm_seq_id = ?2")
                    .bind(&key.build_id)
                    .bind(key.vm_seq_id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
            },
            "delete_build_task",
        )
        .await?;

        Ok(result.rows_affected())
    }
}
