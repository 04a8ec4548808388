//! Thread identity with liveness tracking.
//!
//! Registries (entity bound-thread sets, lock owners) hold [`ThreadHandle`]s. A handle keeps a
//! weak reference to an anchor owned by the thread's thread-local storage; once the thread
//! exits the anchor is dropped and [`ThreadHandle::is_alive`] turns false, so dead entries can
//! be reaped lazily without asking the OS.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

thread_local! {
    static LIVENESS: Arc<()> = Arc::new(());
}

#[derive(Clone)]
pub struct ThreadHandle {
    id: ThreadId,
    name: Option<Arc<str>>,
    liveness: Weak<()>,
}

impl ThreadHandle {
    /// Handle for the calling thread.
    pub fn current() -> Self {
        let current = thread::current();
        // During TLS teardown the anchor is already gone; the handle is born dead.
        let liveness = LIVENESS
            .try_with(Arc::downgrade)
            .unwrap_or_else(|_| Weak::new());
        Self {
            id: current.id(),
            name: current.name().map(Arc::from),
            liveness,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.strong_count() > 0
    }

    pub fn is_current(&self) -> bool {
        self.id == thread::current().id()
    }
}

impl PartialEq for ThreadHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ThreadHandle {}

impl Hash for ThreadHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "Thread[{name}]"),
            None => write!(f, "Thread[{:?}]", self.id),
        }
    }
}
