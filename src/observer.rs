use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Hooks into membership changes of the local view. All methods default to
/// no-ops, so implementors pick only what they care about.
pub trait MembershipObserver: Send + Sync {
    fn on_join(&self, _addr: SocketAddr) {}

    fn on_leave(&self, _addr: SocketAddr) {}

    fn on_stop(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl MembershipObserver for NoopObserver {}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Metrics {
    pub active_members: u32,
    pub sent_num: u32,
    pub received_num: u32,
}

/// Wraps the user observer with counters and lifecycle logging.
pub(crate) struct Instrumented {
    me: SocketAddr,
    active_members: AtomicU32,
    sent_num: AtomicU32,
    received_num: AtomicU32,
    inner: Arc<dyn MembershipObserver>,
}

impl Instrumented {
    pub(crate) fn new(me: SocketAddr, inner: Arc<dyn MembershipObserver>) -> Instrumented {
        Instrumented {
            me,
            active_members: AtomicU32::new(0),
            sent_num: AtomicU32::new(0),
            received_num: AtomicU32::new(0),
            inner,
        }
    }

    pub(crate) fn on_join(&self, addr: SocketAddr) {
        log::info!("{} joined, me: {}", addr, self.me);
        self.active_members.fetch_add(1, Ordering::Relaxed);
        self.inner.on_join(addr);
    }

    pub(crate) fn on_leave(&self, addr: SocketAddr) {
        log::info!("{} left, me: {}", addr, self.me);
        let _ = self.active_members
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
        self.inner.on_leave(addr);
    }

    pub(crate) fn on_stop(&self) {
        log::info!("{} stopped", self.me);
        self.inner.on_stop();
    }

    pub(crate) fn pinged(&self) {
        self.sent_num.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn received(&self) {
        self.received_num.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn metrics(&self) -> Metrics {
        Metrics {
            active_members: self.active_members.load(Ordering::Relaxed),
            sent_num: self.sent_num.load(Ordering::Relaxed),
            received_num: self.received_num.load(Ordering::Relaxed),
        }
    }
}
