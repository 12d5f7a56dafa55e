//! # Callback Registry
//!
//! Ordered lifecycle hooks per model type, including around-callbacks that
//! nest like a call stack and an after-commit/after-rollback queue flushed
//! by the transaction manager. Around-callbacks use a boxed-future
//! continuation (`futures::future::BoxFuture`) in the same style as the
//! rest of the crate's async trait objects.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Error;

/// Every lifecycle hook a model callback can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    AfterInitialize,
    AfterFind,
    BeforeValidation,
    AfterValidation,
    BeforeSave,
    AroundSave,
    AfterSave,
    BeforeCreate,
    AroundCreate,
    AfterCreate,
    BeforeUpdate,
    AroundUpdate,
    AfterUpdate,
    BeforeDestroy,
    AroundDestroy,
    AfterDestroy,
    AfterTouch,
    AfterCommit,
    AfterRollback,
    AfterCreateCommit,
    AfterUpdateCommit,
    AfterDestroyCommit,
}

/// A plain (non-around) callback: runs, optionally halting the operation by
/// returning `Err`.
pub type PlainCallback<T> = Arc<dyn Fn(&mut T) -> Result<(), Error> + Send + Sync>;

/// An around-callback's continuation: the rest of the chain (inner
/// around-callbacks, then the operation itself), threading the instance
/// through by value so each level owns it without borrow conflicts.
pub type Continuation<T> = Box<dyn FnOnce(T) -> BoxFuture<'static, Result<T, Error>> + Send>;

/// An around-callback: receives the instance and a continuation it must
/// invoke to let the operation (and any more-nested around-callbacks)
/// proceed. Not calling the continuation halts the operation.
pub type AroundCallback<T> =
    Arc<dyn Fn(T, Continuation<T>) -> BoxFuture<'static, Result<T, Error>> + Send + Sync>;

/// Ordered callback lists per hook for a single model type.
pub struct CallbackRegistry<T> {
    before: std::collections::HashMap<Hook, Vec<PlainCallback<T>>>,
    after: std::collections::HashMap<Hook, Vec<PlainCallback<T>>>,
    around: std::collections::HashMap<Hook, Vec<AroundCallback<T>>>,
}

impl<T: Send + 'static> CallbackRegistry<T> {
    pub fn new() -> Self {
        Self { before: Default::default(), after: Default::default(), around: Default::default() }
    }

    /// Registers a `before_*`/`after_*` plain callback for `hook`, appended
    /// in registration order.
    pub fn on(&mut self, hook: Hook, callback: impl Fn(&mut T) -> Result<(), Error> + Send + Sync + 'static) -> &mut Self {
        let list = if is_before_hook(hook) { &mut self.before } else { &mut self.after };
        list.entry(hook).or_default().push(Arc::new(callback));
        self
    }

    /// Registers an around-callback for `hook`. Around-callbacks nest in
    /// registration order: the first registered is outermost.
    pub fn around(
        &mut self,
        hook: Hook,
        callback: impl Fn(T, Continuation<T>) -> BoxFuture<'static, Result<T, Error>> + Send + Sync + 'static,
    ) -> &mut Self {
        self.around.entry(hook).or_default().push(Arc::new(callback));
        self
    }

    /// Runs every plain callback registered for `hook` in order, halting
    /// (and returning the error) on the first failure.
    pub fn run_plain(&self, hook: Hook, instance: &mut T) -> Result<(), Error> {
        let list = if is_before_hook(hook) { self.before.get(&hook) } else { self.after.get(&hook) };
        if let Some(callbacks) = list {
            for cb in callbacks {
                cb(instance)?;
            }
        }
        Ok(())
    }

    /// Wraps `operation` in every around-callback registered for `hook`,
    /// outermost-first, then runs the innermost operation and hands back
    /// `instance` (possibly mutated by `operation`). If any around-callback
    /// declines to invoke its continuation, the chain halts with that
    /// callback's own `Ok`/`Err` result instead of running the operation.
    pub async fn run_around<F>(&self, hook: Hook, instance: T, operation: F) -> Result<T, Error>
    where
        F: FnOnce(T) -> BoxFuture<'static, Result<T, Error>> + Send + 'static,
    {
        let empty: Vec<AroundCallback<T>> = Vec::new();
        let callbacks = self.around.get(&hook).unwrap_or(&empty);
        chain_from(callbacks, 0, instance, Box::new(operation)).await
    }
}

/// Builds and immediately invokes the continuation chain starting at
/// `index`: `callbacks[index]` wrapping everything after it, down to
/// `operation` at the core.
fn chain_from<T: Send + 'static>(
    callbacks: &[AroundCallback<T>],
    index: usize,
    instance: T,
    operation: Continuation<T>,
) -> BoxFuture<'static, Result<T, Error>> {
    if index >= callbacks.len() {
        return operation(instance);
    }
    let callback = callbacks[index].clone();
    let owned: Vec<AroundCallback<T>> = callbacks.to_vec();
    let next: Continuation<T> =
        Box::new(move |inst: T| chain_from(&owned, index + 1, inst, operation));
    callback(instance, next)
}

impl<T: Send + 'static> Default for CallbackRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn is_before_hook(hook: Hook) -> bool {
    matches!(
        hook,
        Hook::BeforeValidation | Hook::BeforeSave | Hook::BeforeCreate | Hook::BeforeUpdate | Hook::BeforeDestroy
    )
}

/// A deferred commit/rollback callback, queued during a transaction and
/// flushed once the top-level transaction resolves: `after_*_commit`
/// callbacks fire only after the top-level transaction commits; on
/// rollback, the commit queue is discarded and `after_rollback` runs
/// instead.
pub struct CommitQueue {
    on_commit: Vec<Box<dyn FnOnce() + Send>>,
    on_rollback: Vec<Box<dyn FnOnce() + Send>>,
}

impl CommitQueue {
    pub fn new() -> Self {
        Self { on_commit: Vec::new(), on_rollback: Vec::new() }
    }

    pub fn push_commit(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.on_commit.push(Box::new(callback));
    }

    pub fn push_rollback(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.on_rollback.push(Box::new(callback));
    }

    /// Runs every queued commit callback, in registration order, then
    /// empties the queue. Called once the owning transaction actually
    /// commits (for a nested savepoint, only once the outermost
    /// transaction commits).
    pub fn flush_commit(&mut self) {
        for cb in self.on_commit.drain(..) {
            cb();
        }
        self.on_rollback.clear();
    }

    /// Discards every queued commit callback and runs the rollback queue.
    pub fn flush_rollback(&mut self) {
        self.on_commit.clear();
        for cb in self.on_rollback.drain(..) {
            cb();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.on_commit.is_empty() && self.on_rollback.is_empty()
    }

    /// Current length of the commit queue, used as a savepoint's entry
    /// watermark (`Transaction::begin_nested`).
    pub fn commit_len(&self) -> usize {
        self.on_commit.len()
    }

    /// Current length of the rollback queue, used as a savepoint's entry
    /// watermark.
    pub fn rollback_len(&self) -> usize {
        self.on_rollback.len()
    }

    /// Resolves a nested savepoint's rollback without disturbing callbacks
    /// registered by an enclosing scope: runs only the rollback callbacks
    /// queued since `rollback_mark`, and discards (without running) only the
    /// commit callbacks queued since `commit_mark` — items queued before the
    /// savepoint was entered stay queued for the enclosing transaction to
    /// resolve on its own eventual commit or rollback.
    pub fn rollback_since(&mut self, commit_mark: usize, rollback_mark: usize) {
        let pending_rollbacks = self.on_rollback.split_off(rollback_mark);
        self.on_commit.truncate(commit_mark);
        for cb in pending_rollbacks {
            cb();
        }
    }
}

impl Default for CommitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget {
        touched: Vec<&'static str>,
    }

    #[test]
    fn plain_before_callbacks_run_in_order() {
        let mut registry = CallbackRegistry::<Widget>::new();
        registry.on(Hook::BeforeSave, |w| {
            w.touched.push("first");
            Ok(())
        });
        registry.on(Hook::BeforeSave, |w| {
            w.touched.push("second");
            Ok(())
        });
        let mut widget = Widget { touched: vec![] };
        registry.run_plain(Hook::BeforeSave, &mut widget).unwrap();
        assert_eq!(widget.touched, vec!["first", "second"]);
    }

    #[test]
    fn before_callback_halt_propagates_error() {
        let mut registry = CallbackRegistry::<Widget>::new();
        registry.on(Hook::BeforeDestroy, |_| Err(Error::invalid_argument("halted")));
        let mut widget = Widget { touched: vec![] };
        assert!(registry.run_plain(Hook::BeforeDestroy, &mut widget).is_err());
    }

    #[tokio::test]
    async fn around_callbacks_nest_outermost_first() {
        let mut registry = CallbackRegistry::<Widget>::new();
        registry.around(Hook::AroundSave, |mut w: Widget, next| {
            Box::pin(async move {
                w.touched.push("outer_enter");
                w = next(w).await?;
                w.touched.push("outer_exit");
                Ok(w)
            })
        });
        registry.around(Hook::AroundSave, |mut w: Widget, next| {
            Box::pin(async move {
                w.touched.push("inner_enter");
                w = next(w).await?;
                w.touched.push("inner_exit");
                Ok(w)
            })
        });
        let widget = Widget { touched: vec![] };
        let widget = registry
            .run_around(Hook::AroundSave, widget, |mut w| {
                Box::pin(async move {
                    w.touched.push("core");
                    Ok(w)
                })
            })
            .await
            .unwrap();
        assert_eq!(widget.touched, vec!["outer_enter", "inner_enter", "core", "inner_exit", "outer_exit"]);
    }

    #[tokio::test]
    async fn around_callback_can_halt_without_invoking_continuation() {
        let mut registry = CallbackRegistry::<Widget>::new();
        registry.around(Hook::AroundSave, |_w: Widget, _next| {
            Box::pin(async move { Err(Error::invalid_argument("declined")) })
        });
        let widget = Widget { touched: vec![] };
        let result = registry
            .run_around(Hook::AroundSave, widget, |w| Box::pin(async move { Ok(w) }))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn commit_queue_flush_commit_runs_and_clears() {
        let mut queue = CommitQueue::new();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = ran.clone();
        queue.push_commit(move || ran_clone.store(true, std::sync::atomic::Ordering::SeqCst));
        queue.flush_commit();
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
        assert!(queue.is_empty());
    }

    #[test]
    fn commit_queue_flush_rollback_discards_commit_callbacks() {
        let mut queue = CommitQueue::new();
        let committed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let committed_clone = committed.clone();
        queue.push_commit(move || committed_clone.store(true, std::sync::atomic::Ordering::SeqCst));
        queue.flush_rollback();
        assert!(!committed.load(std::sync::atomic::Ordering::SeqCst));
    }
}
