//! 上传队列与串行处理管线
//!
//! 队列状态只能通过 `QueueCommand` 变更；驱动任务在每次队列变更或锁释放时
//! 尝试启动下一个 PENDING 条目，同一时刻最多一个条目处于 PROCESSING。

use dm_core::DocRecord;
use uuid::Uuid;

pub mod lock;
pub mod pipeline;
pub mod queue;
pub mod thumbnail;

pub use lock::{LockGuard, ProcessingLock};
pub use pipeline::{Pipeline, PipelineHandle};
pub use queue::{EnqueueOutcome, QueueCommand, QueueStore, UploadQueue, PROCESSING_FAILED};

/// 驱动任务的唤醒事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    QueueChanged,
    LockReleased,
    Shutdown,
}

/// 对外广播的处理进度
#[derive(Debug, Clone)]
pub enum PipelineNotice {
    Started { id: Uuid, file_name: String },
    Committed(DocRecord),
    Failed { id: Uuid, message: String },
    /// 条目被移除或暂停，未写库
    Aborted { id: Uuid },
    /// 没有 PENDING 也没有 PROCESSING
    Idle,
}
