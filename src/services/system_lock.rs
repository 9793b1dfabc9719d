use std::sync::atomic::{AtomicBool, Ordering};

/// Administrative kill-switch for the delivery pipeline.
///
/// An explicit injected instance rather than a module-level global, so tests
/// can construct isolated locks. When engaged, worker invocations become
/// no-ops; already-claimed messages are unaffected and webhook ingestion
/// continues (status reconciliation is read-side bookkeeping).
#[derive(Debug, Default)]
pub struct SystemLock {
    locked: AtomicBool,
}

impl SystemLock {
    pub fn new(locked: bool) -> Self {
        SystemLock {
            locked: AtomicBool::new(locked),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
        tracing::warn!("System lock engaged; worker invocations will no-op");
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
        tracing::info!("System lock released");
    }
}
