//! Host completion tokens.
//!
//! The host keeps a unit of background work alive until its deferral is
//! completed. A `Deferral` completes at most once: explicitly through
//! [`Deferral::complete`], or implicitly when dropped. Every exit path of
//! whatever owns it therefore signals the host.

use std::fmt;
use std::sync::Mutex;

use tokio::sync::oneshot;

type Completion = Box<dyn FnOnce() + Send>;

pub struct Deferral {
    completion: Mutex<Option<Completion>>,
}

impl Deferral {
    /// Create a deferral plus a waiter that resolves once it completes.
    pub fn new() -> (Self, DeferralWaiter) {
        let (tx, rx) = oneshot::channel();
        let deferral = Self::from_fn(move || {
            let _ = tx.send(());
        });
        (deferral, DeferralWaiter { rx, done: false })
    }

    /// Wrap a host callback API (e.g. `deferral.Complete()`).
    pub fn from_fn(complete: impl FnOnce() + Send + 'static) -> Self {
        Self {
            completion: Mutex::new(Some(Box::new(complete))),
        }
    }

    /// A deferral with no host obligation behind it.
    pub fn noop() -> Self {
        Self {
            completion: Mutex::new(None),
        }
    }

    /// Signal the host. Returns `false` if already completed.
    pub fn complete(&self) -> bool {
        let completion = match self.completion.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match completion {
            Some(complete) => {
                complete();
                true
            }
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        match self.completion.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl Drop for Deferral {
    fn drop(&mut self) {
        self.complete();
    }
}

impl fmt::Debug for Deferral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferral")
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Host-side view of a [`Deferral`].
#[derive(Debug)]
pub struct DeferralWaiter {
    rx: oneshot::Receiver<()>,
    done: bool,
}

impl DeferralWaiter {
    /// Wait until the deferral completes (or is dropped).
    pub async fn completed(&mut self) {
        if !self.done {
            let _ = (&mut self.rx).await;
            self.done = true;
        }
    }

    pub fn is_completed(&mut self) -> bool {
        if !self.done {
            self.done = self.rx.try_recv().is_ok();
        }
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> (Deferral, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let deferral = Deferral::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (deferral, count)
    }

    #[test]
    fn completes_exactly_once() {
        let (deferral, count) = counting();

        assert!(deferral.complete());
        assert!(!deferral.complete());
        drop(deferral);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_completes() {
        let (deferral, count) = counting();
        assert!(!deferral.is_completed());

        drop(deferral);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_is_already_complete() {
        let deferral = Deferral::noop();
        assert!(deferral.is_completed());
        assert!(!deferral.complete());
    }

    #[tokio::test]
    async fn waiter_observes_completion() {
        let (deferral, mut waiter) = Deferral::new();
        assert!(!waiter.is_completed());

        deferral.complete();

        assert!(waiter.is_completed());
        waiter.completed().await;
    }

    #[tokio::test]
    async fn waiter_resolves_when_owner_drops() {
        let (deferral, mut waiter) = Deferral::new();
        tokio::spawn(async move {
            let _owned = deferral;
        });

        tokio::time::timeout(std::time::Duration::from_secs(5), waiter.completed())
            .await
            .unwrap();
    }
}
