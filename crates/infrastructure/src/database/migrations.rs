//! 表结构初始化
//!
//! `build_tasks` 上的 `uk_build_vm` 唯一约束保证同一个 `(build_id, vm_seq_id)` 只有一行，
//! 机房和构建机标识用空串表示"未指定"，便于直接参与等值比较。

use dispatch_core::SchedulerResult;
use sqlx::{PgPool, SqlitePool};
use tracing::debug;

const POSTGRES_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS build_tasks (
        id BIGSERIAL PRIMARY KEY,
        project_id TEXT NOT NULL,
        agent_id TEXT NOT NULL DEFAULT '',
        pipeline_id TEXT NOT NULL,
        build_id TEXT NOT NULL,
        vm_seq_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        secret_key TEXT NOT NULL,
        image_name TEXT NOT NULL,
        channel_code TEXT NOT NULL DEFAULT '',
        host_tag TEXT NOT NULL DEFAULT '',
        container_id TEXT,
        zone TEXT NOT NULL DEFAULT '',
        registry_user TEXT,
        registry_pwd TEXT,
        image_type TEXT,
        created_time TIMESTAMPTZ NOT NULL,
        updated_time TIMESTAMPTZ NOT NULL,
        CONSTRAINT uk_build_vm UNIQUE (build_id, vm_seq_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_build_tasks_status_updated ON build_tasks(status, updated_time)",
    "CREATE INDEX IF NOT EXISTS idx_build_tasks_host_tag ON build_tasks(host_tag)",
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id BIGSERIAL PRIMARY KEY,
        project_id TEXT NOT NULL,
        node_status TEXT NOT NULL,
        created_time TIMESTAMPTZ NOT NULL,
        updated_time TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id BIGSERIAL PRIMARY KEY,
        project_id TEXT NOT NULL,
        node_id BIGINT,
        status TEXT NOT NULL,
        ip TEXT NOT NULL DEFAULT '',
        hostname TEXT NOT NULL DEFAULT '',
        created_time TIMESTAMPTZ NOT NULL,
        updated_time TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status)",
    r#"
    CREATE TABLE IF NOT EXISTS agent_actions (
        id BIGSERIAL PRIMARY KEY,
        project_id TEXT NOT NULL,
        agent_id BIGINT NOT NULL,
        action TEXT NOT NULL,
        action_time TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_agent_actions_agent ON agent_actions(project_id, agent_id)",
];

const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS build_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id TEXT NOT NULL,
        agent_id TEXT NOT NULL DEFAULT '',
        pipeline_id TEXT NOT NULL,
        build_id TEXT NOT NULL,
        vm_seq_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        secret_key TEXT NOT NULL,
        image_name TEXT NOT NULL,
        channel_code TEXT NOT NULL DEFAULT '',
        host_tag TEXT NOT NULL DEFAULT '',
        container_id TEXT,
        zone TEXT NOT NULL DEFAULT '',
        registry_user TEXT,
        registry_pwd TEXT,
        image_type TEXT,
        created_time DATETIME NOT NULL,
        updated_time DATETIME NOT NULL,
        CONSTRAINT uk_build_vm UNIQUE (build_id, vm_seq_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_build_tasks_status_updated ON build_tasks(status, updated_time)",
    "CREATE INDEX IF NOT EXISTS idx_build_tasks_host_tag ON build_tasks(host_tag)",
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id TEXT NOT NULL,
        node_status TEXT NOT NULL,
        created_time DATETIME NOT NULL,
        updated_time DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id TEXT NOT NULL,
        node_id INTEGER,
        status TEXT NOT NULL,
        ip TEXT NOT NULL DEFAULT '',
        hostname TEXT NOT NULL DEFAULT '',
        created_time DATETIME NOT NULL,
        updated_time DATETIME NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status)",
    r#"
    CREATE TABLE IF NOT EXISTS agent_actions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id TEXT NOT NULL,
        agent_id INTEGER NOT NULL,
        action TEXT NOT NULL,
        action_time DATETIME NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_agent_actions_agent ON agent_actions(project_id, agent_id)",
];

pub async fn run_postgres_migrations(pool: &PgPool) -> SchedulerResult<()> {
    debug!("Running PostgreSQL database migrations");
    for statement in POSTGRES_SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    debug!("Successfully completed PostgreSQL database migrations");
    Ok(())
}

pub async fn run_sqlite_migrations(pool: &SqlitePool) -> SchedulerResult<()> {
    debug!("Running SQLite database migrations");
    for statement in SQLITE_SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
