// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use crate::domain::models::job::JobStatus;

/// 任务进度事件
///
/// 每个页面处理完成后以及状态变更时发出。事件是尽力而为的
/// 通知，消费者滞后时丢弃而不阻塞编排器。
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// 任务ID
    pub job_id: Uuid,
    /// 当前页面序号（从1开始）
    pub page_index: u32,
    /// 累计抓取条目数
    pub items_scraped: u64,
    /// 累计失败条目数
    pub items_failed: u64,
    /// 当前处理的URL
    pub current_url: String,
    /// 任务状态
    pub status: JobStatus,
}

/// 进度事件发送端
///
/// None表示调用方不关心进度
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    /// 创建带缓冲的事件通道
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx: Some(tx) }, rx)
    }

    /// 静默发送端，事件直接丢弃
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// 尽力而为地发送事件
    ///
    /// 通道已满或已关闭时丢弃事件，不向调用方传播错误
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                trace!("Progress event dropped: {}", e);
            }
        }
    }
}
