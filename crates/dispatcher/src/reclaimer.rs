use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::queue_scheduler::DispatchQueueScheduler;

/// 周期执行构建任务回收扫描
pub struct TaskReclaimer {
    scheduler: Arc<DispatchQueueScheduler>,
    interval: Duration,
}

impl TaskReclaimer {
    pub fn new(scheduler: Arc<DispatchQueueScheduler>) -> Self {
        let interval = Duration::from_secs(scheduler.config().reclaim_interval_seconds);
        Self {
            scheduler,
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 运行回收循环直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("启动构建任务回收循环, 间隔: {:?}", self.interval);

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // 扫描内部已记录错误，这里不会失败
                    self.scheduler.run_reclamation(Utc::now()).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("回收循环收到关闭信号");
                    break;
                }
            }
        }
    }
}
