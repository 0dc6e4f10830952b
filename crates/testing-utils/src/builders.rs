//! 测试数据构建器

use dispatch_core::models::{NewAgent, NewBuildTask, PipelineTaskStatus, Zone};

/// 构建任务提交请求构建器
pub struct BuildTaskBuilder {
    task: NewBuildTask,
}

impl BuildTaskBuilder {
    pub fn new() -> Self {
        Self {
            task: NewBuildTask {
                project_id: "test-project".to_string(),
                agent_id: String::new(),
                pipeline_id: "p-test".to_string(),
                build_id: "b-test".to_string(),
                vm_seq_id: 1,
                status: PipelineTaskStatus::Queue,
                secret_key: "secret".to_string(),
                image_name: "tlinux:latest".to_string(),
                channel_code: "BS".to_string(),
                host_tag: String::new(),
                zone: None,
                registry_user: None,
                registry_pwd: None,
                image_type: None,
            },
        }
    }

    pub fn with_project(mut self, project_id: &str) -> Self {
        self.task.project_id = project_id.to_string();
        self
    }

    pub fn with_key(mut self, build_id: &str, vm_seq_id: i32) -> Self {
        self.task.build_id = build_id.to_string();
        self.task.vm_seq_id = vm_seq_id;
        self
    }

    pub fn with_zone(mut self, zone: Zone) -> Self {
        self.task.zone = Some(zone);
        self
    }

    pub fn with_host_tag(mut self, host_tag: &str) -> Self {
        self.task.host_tag = host_tag.to_string();
        self
    }

    pub fn with_status(mut self, status: PipelineTaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_secret(mut self, secret: &str) -> Self {
        self.task.secret_key = secret.to_string();
        self
    }

    pub fn with_image(mut self, image_name: &str) -> Self {
        self.task.image_name = image_name.to_string();
        self
    }

    pub fn with_registry(mut self, user: &str, pwd: &str) -> Self {
        self.task.registry_user = Some(user.to_string());
        self.task.registry_pwd = Some(pwd.to_string());
        self
    }

    pub fn build(self) -> NewBuildTask {
        self.task
    }
}

impl Default for BuildTaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Agent注册请求构建器
pub struct AgentBuilder {
    agent: NewAgent,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            agent: NewAgent {
                project_id: "test-project".to_string(),
                node_id: None,
                ip: "127.0.0.1".to_string(),
                hostname: "agent-host".to_string(),
            },
        }
    }

    pub fn with_project(mut self, project_id: &str) -> Self {
        self.agent.project_id = project_id.to_string();
        self
    }

    pub fn with_node(mut self, node_id: i64) -> Self {
        self.agent.node_id = Some(node_id);
        self
    }

    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.agent.hostname = hostname.to_string();
        self
    }

    pub fn build(self) -> NewAgent {
        self.agent
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
