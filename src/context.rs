//! Execution context carried through runner chains.
//!
//! A [`Context`] carries a cancellation signal, an optional deadline and
//! request-scoped values. Values are keyed by their type, so an identifier
//! extractor asks for exactly the type the caller stored:
//!
//! ```rust
//! use admission::Context;
//!
//! struct Caller(String);
//!
//! let ctx = Context::background().with_value(Caller("alice".to_string()));
//! assert_eq!(ctx.value::<Caller>().map(|c| c.0.as_str()), Some("alice"));
//! ```

use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Shared cancellation state. Cancelling a node cancels every live descendant.
struct CancelState {
    cancelled: AtomicBool,
    notify: watch::Sender<bool>,
    children: Mutex<Vec<Weak<CancelState>>>,
}

impl CancelState {
    fn new() -> Arc<Self> {
        let (notify, _) = watch::channel(false);
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            notify,
            children: Mutex::new(Vec::new()),
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.send_replace(true);

        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }

    fn child(&self) -> Arc<Self> {
        let child = Self::new();
        // The flag is checked under the children lock so a concurrent cancel
        // either sees the new child or the child sees the flag.
        let mut children = self.children.lock();
        if self.is_cancelled() {
            drop(children);
            child.cancel();
        } else {
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        child
    }
}

struct Inner {
    cancel: Option<Arc<CancelState>>,
    deadline: Option<Instant>,
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

/// Cancellable carrier of request-scoped values.
///
/// Cloning is cheap; derived contexts never affect their parent.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// The root context: never cancelled, no deadline, no values.
    pub fn background() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancel: None,
                deadline: None,
                values: HashMap::new(),
            }),
        }
    }

    /// Derive a context that is cancelled by the returned handle or by any
    /// cancellation of this context.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let state = match &self.inner.cancel {
            Some(parent) => parent.child(),
            None => CancelState::new(),
        };

        let ctx = self.derive(Some(state.clone()), self.inner.deadline, None);
        (ctx, CancelHandle { state })
    }

    /// Derive a context that counts as cancelled once `deadline` has passed.
    ///
    /// An earlier deadline inherited from this context still applies.
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let deadline = match self.inner.deadline {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        };
        self.derive(self.inner.cancel.clone(), Some(deadline), None)
    }

    /// Derive a context that counts as cancelled after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// Derive a context carrying `value`, replacing any earlier value of the same type.
    pub fn with_value<T>(&self, value: T) -> Context
    where
        T: Send + Sync + 'static,
    {
        self.derive(
            self.inner.cancel.clone(),
            self.inner.deadline,
            Some((TypeId::of::<T>(), Arc::new(value))),
        )
    }

    /// Look up the value of type `T` carried by this context.
    pub fn value<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.inner
            .values
            .get(&TypeId::of::<T>())
            .and_then(|value| (**value).downcast_ref::<T>())
    }

    /// The effective deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Whether the context has been cancelled or its deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        let signalled = self
            .inner
            .cancel
            .as_ref()
            .map(|state| state.is_cancelled())
            .unwrap_or(false);

        signalled
            || self
                .inner
                .deadline
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(false)
    }

    /// Wait until the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a context with neither a cancel handle nor a deadline.
    pub async fn cancelled(&self) {
        let deadline = async {
            match self.inner.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                None => std::future::pending::<()>().await,
            }
        };

        let signal = async {
            match &self.inner.cancel {
                Some(state) => {
                    let mut rx = state.notify.subscribe();
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = deadline => {}
            _ = signal => {}
        }
    }

    fn derive(
        &self,
        cancel: Option<Arc<CancelState>>,
        deadline: Option<Instant>,
        value: Option<(TypeId, Arc<dyn Any + Send + Sync>)>,
    ) -> Context {
        let mut values = self.inner.values.clone();
        if let Some((key, value)) = value {
            values.insert(key, value);
        }

        Context {
            inner: Arc::new(Inner {
                cancel,
                deadline,
                values,
            }),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.inner.deadline)
            .field("values", &self.inner.values.len())
            .finish()
    }
}

/// Cancels the context returned alongside it by [`Context::with_cancel`].
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    /// Cancel the associated context and every context derived from it.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
