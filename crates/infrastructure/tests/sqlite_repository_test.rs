use chrono::{Duration, Utc};
use dispatch_core::{
    config::DatabaseConfig,
    models::{
        AgentAction, AgentStatus, BuildTaskKey, HostTagCondition, NewNode, NodeStatus,
        OfflineOutcome, PipelineTaskStatus, ProjectScope, QueueCapability, QueueTaskFilter,
        TaskPredicate, TaskUpdate, Zone, ZoneCondition,
    },
    traits::{AgentRepository, BuildTaskRepository, NodeRepository},
};
use dispatch_infrastructure::database::DatabaseManager;
use dispatch_testing_utils::{AgentBuilder, BuildTaskBuilder};

async fn setup() -> DatabaseManager {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..DatabaseConfig::default()
    };
    DatabaseManager::new(&config).await.unwrap()
}

#[tokio::test]
async fn test_upsert_replaces_existing_row() {
    let db = setup().await;
    let repo = db.build_task_repository();

    let first = repo
        .upsert(&BuildTaskBuilder::new().with_key("b-1", 1).build())
        .await
        .unwrap();
    repo.update_where(
        &TaskPredicate::for_key(first.key()),
        &TaskUpdate::container("c-123"),
    )
    .await
    .unwrap();

    let second = repo
        .upsert(
            &BuildTaskBuilder::new()
                .with_key("b-1", 1)
                .with_image("centos:7")
                .with_zone(Zone::Tianjin)
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.image_name, "centos:7");
    assert_eq!(second.zone, Some(Zone::Tianjin));
    assert_eq!(second.container_id.as_deref(), Some("c-123"));
    assert_eq!(repo.list_by_build("b-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_conditional_claim_has_single_winner() {
    let db = setup().await;
    let repo = db.build_task_repository();
    let task = repo.upsert(&BuildTaskBuilder::new().build()).await.unwrap();

    let predicate = TaskPredicate::for_key(task.key())
        .with_statuses(&[PipelineTaskStatus::Queue])
        .with_host_tag(HostTagCondition::Empty);

    let first = repo
        .update_where(
            &predicate,
            &TaskUpdate::status(PipelineTaskStatus::Running).with_host_tag("host-a"),
        )
        .await
        .unwrap();
    let second = repo
        .update_where(
            &predicate,
            &TaskUpdate::status(PipelineTaskStatus::Running).with_host_tag("host-b"),
        )
        .await
        .unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 0);

    let stored = repo.get(&task.key()).await.unwrap().unwrap();
    assert_eq!(stored.status, PipelineTaskStatus::Running);
    assert_eq!(stored.host_tag, "host-a");
    assert!(stored.updated_time >= task.updated_time);
}

#[tokio::test]
async fn test_queue_filters_and_project_scopes() {
    let db = setup().await;
    let repo = db.build_task_repository();

    repo.upsert(&BuildTaskBuilder::new().with_key("b-1", 1).with_project("p1").build())
        .await
        .unwrap();
    repo.upsert(
        &BuildTaskBuilder::new()
            .with_key("b-2", 1)
            .with_project("p2")
            .with_zone(Zone::Shanghai)
            .build(),
    )
    .await
    .unwrap();
    repo.upsert(
        &BuildTaskBuilder::new()
            .with_key("b-3", 1)
            .with_project("p1")
            .with_host_tag("host-1")
            .build(),
    )
    .await
    .unwrap();

    let public = repo
        .find(
            &QueueTaskFilter::new(QueueCapability::Unconstrained, ProjectScope::All).to_predicate(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(public.len(), 1);
    assert_eq!(public[0].build_id, "b-1");

    let shanghai = repo
        .find(
            &QueueTaskFilter::new(QueueCapability::Zone(Zone::Shanghai), ProjectScope::All)
                .to_predicate(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(shanghai.len(), 1);
    assert_eq!(shanghai[0].build_id, "b-2");

    let tagged = repo
        .find(
            &QueueTaskFilter::new(
                QueueCapability::HostTag("host-1".to_string()),
                ProjectScope::exclude(["p2"]),
            )
            .to_predicate(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].build_id, "b-3");

    let none = repo
        .find(
            &TaskPredicate::new().with_projects(ProjectScope::include(Vec::<String>::new())),
            None,
        )
        .await
        .unwrap();
    assert!(none.is_empty());

    let all = repo
        .find(
            &TaskPredicate::new().with_projects(ProjectScope::exclude(Vec::<String>::new())),
            Some(2),
        )
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_reclaim_updates_respect_cutoff_and_do_not_touch() {
    let db = setup().await;
    let repo = db.build_task_repository();

    let task = repo
        .upsert(
            &BuildTaskBuilder::new()
                .with_zone(Zone::Guangzhou)
                .with_host_tag("host-1")
                .build(),
        )
        .await
        .unwrap();

    // 截止时间早于任务更新时间，不应命中
    let stale_cutoff = task.updated_time - Duration::seconds(20);
    let predicate = TaskPredicate::new()
        .with_statuses(&[PipelineTaskStatus::Queue])
        .with_host_tag(HostTagCondition::NotEmpty)
        .updated_before(stale_cutoff);
    assert_eq!(
        repo.update_where(&predicate, &TaskUpdate::clear_host_tag())
            .await
            .unwrap(),
        0
    );

    let cutoff = Utc::now() + Duration::seconds(1);
    let predicate = TaskPredicate::new()
        .with_statuses(&[PipelineTaskStatus::Queue])
        .with_zone(ZoneCondition::SetExcept(Zone::Shenzhen))
        .updated_before(cutoff);
    assert_eq!(
        repo.update_where(&predicate, &TaskUpdate::reset_zone(Some(Zone::Shenzhen)))
            .await
            .unwrap(),
        1
    );

    let stored = repo.get(&task.key()).await.unwrap().unwrap();
    assert_eq!(stored.zone, Some(Zone::Shenzhen));
    assert_eq!(stored.host_tag, "host-1");
    assert_eq!(stored.updated_time, task.updated_time);
}

#[tokio::test]
async fn test_delete_task() {
    let db = setup().await;
    let repo = db.build_task_repository();
    let task = repo.upsert(&BuildTaskBuilder::new().build()).await.unwrap();

    assert_eq!(repo.delete(&task.key()).await.unwrap(), 1);
    assert_eq!(repo.delete(&task.key()).await.unwrap(), 0);
    assert!(repo
        .get(&BuildTaskKey::new("b-test", 1))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_agent_status_transitions() {
    let db = setup().await;
    let agents = db.agent_repository();

    let agent = agents.register(&AgentBuilder::new().build()).await.unwrap();
    assert_eq!(agent.status, AgentStatus::UnImport);

    // 期望状态不匹配时不更新
    assert!(!agents
        .update_status(
            agent.id,
            &agent.project_id,
            AgentStatus::UnImport,
            Some(AgentStatus::UnImportOk),
        )
        .await
        .unwrap());

    assert!(agents
        .update_status(
            agent.id,
            &agent.project_id,
            AgentStatus::UnImportOk,
            Some(AgentStatus::UnImport),
        )
        .await
        .unwrap());

    let listed = agents
        .list_by_status(&[AgentStatus::UnImportOk])
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert!(agents.list_by_status(&[]).await.unwrap().is_empty());

    agents
        .add_action(agent.id, &agent.project_id, AgentAction::Online)
        .await
        .unwrap();
    let actions = agents.list_actions(agent.id, &agent.project_id).await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action, AgentAction::Online);
}

#[tokio::test]
async fn test_mark_exception_marks_live_node_abnormal() {
    let db = setup().await;
    let agents = db.agent_repository();
    let nodes = db.node_repository();

    let node = nodes
        .create_node(&NewNode {
            project_id: "test-project".to_string(),
            node_status: NodeStatus::Normal,
        })
        .await
        .unwrap();
    let agent = agents
        .register(&AgentBuilder::new().with_node(node.id).build())
        .await
        .unwrap();
    agents
        .update_status(agent.id, &agent.project_id, AgentStatus::ImportOk, None)
        .await
        .unwrap();

    let outcome = agents.mark_exception(&agent).await.unwrap();
    assert_eq!(outcome, OfflineOutcome::NodeMarkedAbnormal);

    let stored = agents.get(agent.id, &agent.project_id).await.unwrap().unwrap();
    assert_eq!(stored.status, AgentStatus::ImportException);
    let node = nodes.get_node("test-project", node.id).await.unwrap().unwrap();
    assert_eq!(node.node_status, NodeStatus::Abnormal);

    let actions = agents.list_actions(agent.id, &agent.project_id).await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action, AgentAction::Offline);

    // 已不是 IMPORT_OK，重复调用不做任何修改
    assert_eq!(
        agents.mark_exception(&agent).await.unwrap(),
        OfflineOutcome::Skipped
    );
    assert_eq!(
        agents.list_actions(agent.id, &agent.project_id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_mark_exception_deletes_agent_without_live_node() {
    let db = setup().await;
    let agents = db.agent_repository();
    let nodes = db.node_repository();

    let deleted_node = nodes
        .create_node(&NewNode {
            project_id: "test-project".to_string(),
            node_status: NodeStatus::Deleted,
        })
        .await
        .unwrap();

    for node_id in [Some(deleted_node.id), Some(9_999), None] {
        let mut builder = AgentBuilder::new();
        if let Some(node_id) = node_id {
            builder = builder.with_node(node_id);
        }
        let agent = agents.register(&builder.build()).await.unwrap();
        agents
            .update_status(agent.id, &agent.project_id, AgentStatus::ImportOk, None)
            .await
            .unwrap();

        assert_eq!(
            agents.mark_exception(&agent).await.unwrap(),
            OfflineOutcome::AgentDeleted
        );
        assert!(agents.get(agent.id, &agent.project_id).await.unwrap().is_none());
        // 审计记录保留
        assert_eq!(
            agents.list_actions(agent.id, &agent.project_id).await.unwrap().len(),
            1
        );
    }
}
