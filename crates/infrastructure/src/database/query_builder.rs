//! 构建任务查询构造器
//!
//! 把 [`TaskPredicate`] / [`TaskUpdate`] 翻译成 SQL 和按顺序排列的参数列表。
//! PostgreSQL 与 SQLite 共用同一套翻译逻辑，只有占位符风格不同。

use chrono::{DateTime, Utc};
use dispatch_core::models::{
    HostTagCondition, ProjectScope, TaskPredicate, TaskUpdate, Zone, ZoneCondition,
};

pub const BUILD_TASK_COLUMNS: &str = "id, project_id, agent_id, pipeline_id, build_id, vm_seq_id, status, secret_key, image_name, channel_code, host_tag, container_id, zone, registry_user, registry_pwd, image_type, created_time, updated_time";

/// 占位符风格
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`
    Dollar,
    /// `?1`
    Question,
}

/// 查询参数
#[derive(Debug, Clone, PartialEq)]
pub enum TaskQueryParam {
    Text(String),
    Int32(i32),
    Int64(i64),
    Timestamp(DateTime<Utc>),
}

pub struct TaskQueryBuilder {
    style: PlaceholderStyle,
    params: Vec<TaskQueryParam>,
}

impl TaskQueryBuilder {
    pub fn new(style: PlaceholderStyle) -> Self {
        Self {
            style,
            params: Vec::new(),
        }
    }

    /// `SELECT ... WHERE ... ORDER BY updated_time ASC [LIMIT n]`
    pub fn build_select(
        style: PlaceholderStyle,
        predicate: &TaskPredicate,
        limit: Option<i64>,
    ) -> (String, Vec<TaskQueryParam>) {
        let mut builder = Self::new(style);
        let where_clause = builder.where_clause(predicate);

        let mut sql = format!(
            "SELECT {BUILD_TASK_COLUMNS} FROM build_tasks WHERE {where_clause} ORDER BY updated_time ASC, id ASC"
        );
        if let Some(limit) = limit {
            let placeholder = builder.push(TaskQueryParam::Int64(limit));
            sql.push_str(&format!(" LIMIT {placeholder}"));
        }

        (sql, builder.params)
    }

    /// `UPDATE build_tasks SET ... WHERE ...`，更新内容为空时返回 `None`
    pub fn build_update(
        style: PlaceholderStyle,
        predicate: &TaskPredicate,
        update: &TaskUpdate,
        now: DateTime<Utc>,
    ) -> Option<(String, Vec<TaskQueryParam>)> {
        if update.is_empty() {
            return None;
        }

        let mut builder = Self::new(style);
        let mut assignments = Vec::new();

        if let Some(status) = update.status {
            let p = builder.push(TaskQueryParam::Text(status.as_str().to_string()));
            assignments.push(format!("status = {p}"));
        }
        if let Some(host_tag) = &update.host_tag {
            let p = builder.push(TaskQueryParam::Text(host_tag.clone()));
            assignments.push(format!("host_tag = {p}"));
        }
        if let Some(zone) = update.zone {
            let p = builder.push(TaskQueryParam::Text(Zone::column_value(zone).to_string()));
            assignments.push(format!("zone = {p}"));
        }
        if let Some(container_id) = &update.container_id {
            let p = builder.push(TaskQueryParam::Text(container_id.clone()));
            assignments.push(format!("container_id = {p}"));
        }
        if update.touch {
            let p = builder.push(TaskQueryParam::Timestamp(now));
            assignments.push(format!("updated_time = {p}"));
        }

        let where_clause = builder.where_clause(predicate);
        let sql = format!(
            "UPDATE build_tasks SET {} WHERE {where_clause}",
            assignments.join(", ")
        );

        Some((sql, builder.params))
    }

    /// 翻译谓词，没有任何条件时返回 `1=1`
    pub fn where_clause(&mut self, predicate: &TaskPredicate) -> String {
        let mut conditions: Vec<String> = Vec::new();

        if let Some(key) = &predicate.key {
            let build_id = self.push(TaskQueryParam::Text(key.build_id.clone()));
            let vm_seq_id = self.push(TaskQueryParam::Int32(key.vm_seq_id));
            conditions.push(format!("build_id = {build_id} AND vm_seq_id = {vm_seq_id}"));
        }

        if !predicate.statuses.is_empty() {
            let list = self.push_list(predicate.statuses.iter().map(|s| s.as_str().to_string()));
            conditions.push(format!("status IN ({list})"));
        }

        if !predicate.excluded_statuses.is_empty() {
            let list = self.push_list(
                predicate
                    .excluded_statuses
                    .iter()
                    .map(|s| s.as_str().to_string()),
            );
            conditions.push(format!("status NOT IN ({list})"));
        }

        match &predicate.host_tag {
            HostTagCondition::Any => {}
            HostTagCondition::Empty => conditions.push("host_tag = ''".to_string()),
            HostTagCondition::NotEmpty => conditions.push("host_tag <> ''".to_string()),
            HostTagCondition::Equals(tag) => {
                let p = self.push(TaskQueryParam::Text(tag.clone()));
                conditions.push(format!("host_tag = {p}"));
            }
        }

        match predicate.zone {
            ZoneCondition::Any => {}
            ZoneCondition::Empty => conditions.push("zone = ''".to_string()),
            ZoneCondition::Equals(zone) => {
                let p = self.push(TaskQueryParam::Text(zone.as_str().to_string()));
                conditions.push(format!("zone = {p}"));
            }
            ZoneCondition::SetExcept(zone) => {
                let p = self.push(TaskQueryParam::Text(zone.as_str().to_string()));
                conditions.push(format!("zone <> '' AND zone <> {p}"));
            }
        }

        match &predicate.projects {
            ProjectScope::All => {}
            ProjectScope::Include(projects) if projects.is_empty() => {
                conditions.push("1=0".to_string())
            }
            ProjectScope::Include(projects) => {
                let list = self.push_list(projects.iter().cloned());
                conditions.push(format!("project_id IN ({list})"));
            }
            ProjectScope::Exclude(projects) if projects.is_empty() => {}
            ProjectScope::Exclude(projects) => {
                let list = self.push_list(projects.iter().cloned());
                conditions.push(format!("project_id NOT IN ({list})"));
            }
        }

        if let Some(cutoff) = predicate.updated_before {
            let p = self.push(TaskQueryParam::Timestamp(cutoff));
            conditions.push(format!("updated_time <= {p}"));
        }

        if conditions.is_empty() {
            "1=1".to_string()
        } else {
            conditions.join(" AND ")
        }
    }

    fn push(&mut self, param: TaskQueryParam) -> String {
        self.params.push(param);
        let index = self.params.len();
        match self.style {
            PlaceholderStyle::Dollar => format!("${index}"),
            PlaceholderStyle::Question => format!("?{index}"),
        }
    }

    fn push_list(&mut self, values: impl Iterator<Item = String>) -> String {
        values
            .map(|v| self.push(TaskQueryParam::Text(v)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::models::{
        BuildTaskKey, PipelineTaskStatus, QueueCapability, QueueTaskFilter,
    };

    #[test]
    fn test_empty_predicate() {
        let (sql, params) =
            TaskQueryBuilder::build_select(PlaceholderStyle::Dollar, &TaskPredicate::new(), None);

        assert!(sql.contains("WHERE 1=1"));
        assert!(sql.ends_with("ORDER BY updated_time ASC, id ASC"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_queue_filter_translation() {
        let predicate = QueueTaskFilter::new(
            QueueCapability::Zone(Zone::Shanghai),
            ProjectScope::include(["p1", "p2"]),
        )
        .to_predicate();

        let (sql, params) =
            TaskQueryBuilder::build_select(PlaceholderStyle::Dollar, &predicate, Some(10));

        assert!(sql.contains("status IN ($1)"));
        assert!(sql.contains("host_tag = ''"));
        assert!(sql.contains("zone = $2"));
        assert!(sql.contains("project_id IN ($3, $4)"));
        assert!(sql.contains("LIMIT $5"));
        assert_eq!(params[1], TaskQueryParam::Text("SHANGHAI".to_string()));
        assert_eq!(params[4], TaskQueryParam::Int64(10));
    }

    #[test]
    fn test_empty_project_scopes() {
        let mut builder = TaskQueryBuilder::new(PlaceholderStyle::Question);
        let clause = builder.where_clause(
            &TaskPredicate::new().with_projects(ProjectScope::include(Vec::<String>::new())),
        );
        assert_eq!(clause, "1=0");

        let mut builder = TaskQueryBuilder::new(PlaceholderStyle::Question);
        let clause = builder.where_clause(
            &TaskPredicate::new().with_projects(ProjectScope::exclude(Vec::<String>::new())),
        );
        assert_eq!(clause, "1=1");
    }

    #[test]
    fn test_conditional_update() {
        let now = Utc::now();
        let predicate = TaskPredicate::for_key(BuildTaskKey::new("b-1", 1))
            .with_statuses(&[PipelineTaskStatus::Queue]);
        let update = TaskUpdate::status(PipelineTaskStatus::Running).with_host_tag("host-1");

        let (sql, params) =
            TaskQueryBuilder::build_update(PlaceholderStyle::Question, &predicate, &update, now)
                .unwrap();

        assert_eq!(
            sql,
            "UPDATE build_tasks SET status = ?1, host_tag = ?2, updated_time = ?3 WHERE build_id = ?4 AND vm_seq_id = ?5 AND status IN (?6)"
        );
        assert_eq!(params[2], TaskQueryParam::Timestamp(now));
        assert_eq!(params.len(), 6);
    }

    #[test]
    fn test_reclaim_update_does_not_touch() {
        let now = Utc::now();
        let predicate = TaskPredicate::new()
            .with_statuses(&[PipelineTaskStatus::Queue])
            .with_zone(ZoneCondition::SetExcept(Zone::Shenzhen))
            .updated_before(now);

        let (sql, _) = TaskQueryBuilder::build_update(
            PlaceholderStyle::Dollar,
            &predicate,
            &TaskUpdate::reset_zone(Some(Zone::Shenzhen)),
            now,
        )
        .unwrap();

        assert!(!sql.contains("updated_time ="));
        assert!(sql.contains("zone <> '' AND zone <> $3"));
        assert!(sql.contains("updated_time <= $4"));
    }

    #[test]
    fn test_empty_update_is_skipped() {
        assert!(TaskQueryBuilder::build_update(
            PlaceholderStyle::Dollar,
            &TaskPredicate::new(),
            &TaskUpdate::default(),
            Utc::now(),
        )
        .is_none());
    }
}
