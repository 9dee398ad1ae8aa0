//! 单会话轮询任务
//!
//! 每个会话一个后台任务，固定周期读取设备、封装信封并推入引擎队列。
//! 每个周期都受崩溃保护；控制信号在每次 tick 时检查。

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::reader::DeviceReader;
use super::session::SessionPool;
use crate::core::{QueueData, RuleEngine};

/// 轮询控制信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    Running,
    Paused,
    Stopped,
}

/// 单个会话的轮询任务
pub struct PollTask {
    pub index: usize,
    pub label: String,
    pub in_end_id: String,
    pub period: Duration,
    pub deadline: Duration,
    pub pool: Arc<SessionPool>,
    pub engine: Arc<dyn RuleEngine>,
    pub control: watch::Receiver<PollControl>,
}

impl PollTask {
    /// 在后台运行
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        // 首次采集在一个周期之后
        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(session = self.index, target_addr = %self.label, "轮询任务已启动，周期 {:?}", self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = self.control.changed() => {
                    if changed.is_err() || *self.control.borrow() == PollControl::Stopped {
                        break;
                    }
                    continue;
                }
            }

            let control = *self.control.borrow();
            match control {
                PollControl::Stopped => break,
                PollControl::Paused => {
                    debug!(session = self.index, "已暂停，跳过本轮");
                    continue;
                }
                PollControl::Running => {}
            }

            if let Err(panic) = AssertUnwindSafe(self.cycle()).catch_unwind().await {
                error!(
                    session = self.index,
                    target_addr = %self.label,
                    "本轮轮询异常: {}",
                    panic_message(panic.as_ref())
                );
            }
        }

        info!(session = self.index, target_addr = %self.label, "轮询任务已退出");
    }

    /// 一次完整的采集与推送
    async fn cycle(&self) {
        let Some(client) = self.pool.client(self.index).await else {
            warn!(session = self.index, "会话没有可用连接，跳过本轮");
            return;
        };

        let snapshot = DeviceReader::new(client.as_ref(), self.deadline, &self.label)
            .snapshot()
            .await;

        let data = match serde_json::to_string(&snapshot) {
            Ok(data) => data,
            Err(e) => {
                error!(session = self.index, "SNMPResource 序列化失败: {}", e);
                return;
            }
        };

        let envelope = QueueData {
            in_end: self.engine.get_in_end(&self.in_end_id),
            out_end: None,
            engine: Arc::clone(&self.engine),
            data,
        };

        if let Err(e) = self.engine.push_queue(envelope).await {
            error!(session = self.index, "SNMPResource 推送队列失败: {}", e);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知错误".to_string()
    }
}
