//! 任务进度表
//!
//! 每个任务一个 watch 通道：服务端写入快照，轮询方读取最新值，
//! 读写双方都不会等待对方的 I/O。

use crate::catalog::JobStatus;
use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Backup,
    Restore,
}

/// 某一时刻的任务进度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub percent: u8,
    pub label: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// 单个任务的进度句柄，由执行任务的服务持有
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    sender: watch::Sender<ProgressSnapshot>,
    cancel: CancellationToken,
}

impl JobHandle {
    fn new(id: Uuid, kind: JobKind) -> Self {
        let (sender, _) = watch::channel(ProgressSnapshot {
            job_id: id,
            kind,
            percent: 0,
            label: String::new(),
            status: JobStatus::Pending,
            error: None,
            updated_at: Utc::now(),
        });
        Self {
            id,
            sender,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 更新进度，百分比不会回退
    pub fn set(&self, percent: u8, label: impl Into<String>) {
        let label = label.into();
        self.sender.send_modify(|snapshot| {
            snapshot.percent = snapshot.percent.max(percent.min(100));
            snapshot.label = label;
            snapshot.updated_at = Utc::now();
        });
    }

    pub fn mark_started(&self) {
        self.sender.send_modify(|snapshot| {
            if snapshot.status.can_transition_to(JobStatus::InProgress) {
                snapshot.status = JobStatus::InProgress;
                snapshot.updated_at = Utc::now();
            }
        });
    }

    pub fn complete(&self, label: impl Into<String>) {
        let label = label.into();
        self.sender.send_modify(|snapshot| {
            if snapshot.status.can_transition_to(JobStatus::Completed) {
                snapshot.status = JobStatus::Completed;
                snapshot.percent = 100;
                snapshot.label = label;
                snapshot.updated_at = Utc::now();
            }
        });
    }

    /// 失败时进度保持在当前位置
    pub fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        self.sender.send_modify(|snapshot| {
            if snapshot.status.can_transition_to(JobStatus::Failed) {
                snapshot.status = JobStatus::Failed;
                snapshot.error = Some(error);
                snapshot.updated_at = Utc::now();
            }
        });
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.sender.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 在步骤边界调用，已取消时返回 `Cancelled`
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(VaultError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// 进度表，按任务 ID 索引
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    jobs: Arc<DashMap<Uuid, Arc<JobHandle>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Uuid, kind: JobKind) -> Arc<JobHandle> {
        let handle = Arc::new(JobHandle::new(id, kind));
        self.jobs.insert(id, handle.clone());
        handle
    }

    pub fn get(&self, id: Uuid) -> Option<ProgressSnapshot> {
        self.jobs.get(&id).map(|h| h.snapshot())
    }

    pub fn subscribe(&self, id: Uuid) -> Option<watch::Receiver<ProgressSnapshot>> {
        self.jobs.get(&id).map(|h| h.subscribe())
    }

    /// 请求取消任务；任务不存在或已结束时返回 false
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.jobs.get(&id) {
            Some(handle) if !handle.snapshot().status.is_terminal() => {
                handle.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// 所有任务的当前进度，最近更新的在前
    pub fn list(&self) -> Vec<ProgressSnapshot> {
        let mut snapshots: Vec<ProgressSnapshot> =
            self.jobs.iter().map(|entry| entry.snapshot()).collect();
        snapshots.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        snapshots
    }

    /// 删除在 `before` 之前结束的任务，返回删除数量
    pub fn prune_finished(&self, before: DateTime<Utc>) -> usize {
        let count = self.jobs.len();
        self.jobs.retain(|_, handle| {
            let snapshot = handle.snapshot();
            !(snapshot.status.is_terminal() && snapshot.updated_at < before)
        });
        count - self.jobs.len()
    }
}

/// 等待任务结束，返回最终进度
pub async fn wait_until_finished(
    mut receiver: watch::Receiver<ProgressSnapshot>,
) -> ProgressSnapshot {
    loop {
        let snapshot = receiver.borrow_and_update().clone();
        if snapshot.status.is_terminal() {
            return snapshot;
        }
        if receiver.changed().await.is_err() {
            return receiver.borrow().clone();
        }
    }
}
