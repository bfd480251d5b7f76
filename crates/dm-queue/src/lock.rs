use crate::PipelineEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// 单槽处理锁：同一时刻最多一个条目在处理
#[derive(Clone)]
pub struct ProcessingLock {
    held: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl ProcessingLock {
    pub fn new(events: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self {
            held: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    pub fn try_acquire(&self) -> Option<LockGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LockGuard { lock: self.clone() })
    }
}

/// 无论任务如何结束，drop 时释放锁并唤醒驱动
pub struct LockGuard {
    lock: ProcessingLock,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
        let _ = self.lock.events.send(PipelineEvent::LockReleased);
    }
}
