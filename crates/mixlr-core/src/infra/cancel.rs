//! Cooperative cancellation
//!
//! A token is a shared atomic flag. Jobs poll it inside their innermost
//! loops. A child token also reports cancellation of its parent, which lets
//! a scheduler abort its own jobs without touching the caller's token.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every job observing this token
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self
                .ancestors
                .iter()
                .any(|ancestor| ancestor.load(Ordering::Relaxed))
    }

    /// Create a token that is also cancelled whenever this one is
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(Arc::clone(&self.flag));
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }
}
