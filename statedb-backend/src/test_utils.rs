//! Test doubles for stores and state managers.
//!
//! [`CountingStore`] and [`ScriptedManager`] wrap a real implementation,
//! record every call in order, and can be told to fail (or never return) on
//! chosen calls.

use crate::db::{create_memory_pool, run_migrations};
use crate::error::{StoreError, StoreResult};
use crate::lock::LockInfo;
use crate::state::{RemoteState, StateDocument, StateManager};
use crate::store::{MemoryStore, StateStore};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Helper to create an in-memory test database with migrations applied
pub async fn create_test_db() -> SqlitePool {
    let pool = create_memory_pool()
        .await
        .expect("Failed to create in-memory database");

    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

#[derive(Debug)]
struct Script<C> {
    calls: Vec<C>,
    failing: HashSet<C>,
    hanging: HashSet<C>,
    hanging_after: HashSet<C>,
}

enum Outcome {
    Proceed,
    Fail,
    Hang,
    HangAfter,
}

impl<C: Copy + Eq + std::hash::Hash + std::fmt::Debug> Script<C> {
    fn new() -> Self {
        Self {
            calls: Vec::new(),
            failing: HashSet::new(),
            hanging: HashSet::new(),
            hanging_after: HashSet::new(),
        }
    }

    fn enter(&mut self, call: C) -> Outcome {
        self.calls.push(call);
        if self.failing.contains(&call) {
            Outcome::Fail
        } else if self.hanging.contains(&call) {
            Outcome::Hang
        } else if self.hanging_after.contains(&call) {
            Outcome::HangAfter
        } else {
            Outcome::Proceed
        }
    }

    fn count(&self, call: C) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }
}

fn lock_script<C>(script: &Mutex<Script<C>>) -> MutexGuard<'_, Script<C>> {
    script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn scripted_failure<C: std::fmt::Debug>(call: C) -> StoreError {
    StoreError::Unavailable(format!("scripted {call:?} failure"))
}

/// Poll `done` every millisecond. Panics after five seconds.
pub async fn wait_until(description: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {description}");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreCall {
    List,
    Delete,
    Get,
    Put,
    Lock,
    Unlock,
}

/// [`StateStore`] decorator that records calls and injects failures.
#[derive(Debug)]
pub struct CountingStore<S> {
    inner: S,
    script: Mutex<Script<StoreCall>>,
}

impl<S: StateStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            script: Mutex::new(Script::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Make every later `call` fail with [`StoreError::Unavailable`].
    pub fn fail_on(&self, call: StoreCall) {
        lock_script(&self.script).failing.insert(call);
    }

    pub fn clear_failures(&self) {
        lock_script(&self.script).failing.clear();
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        lock_script(&self.script).calls.clone()
    }

    pub fn count(&self, call: StoreCall) -> usize {
        lock_script(&self.script).count(call)
    }

    pub fn total(&self) -> usize {
        lock_script(&self.script).calls.len()
    }

    fn enter(&self, call: StoreCall) -> StoreResult<()> {
        match lock_script(&self.script).enter(call) {
            Outcome::Fail => Err(scripted_failure(call)),
            Outcome::Proceed | Outcome::Hang | Outcome::HangAfter => Ok(()),
        }
    }
}

#[async_trait]
impl<S: StateStore> StateStore for CountingStore<S> {
    async fn list_names(&self, namespace: &str) -> StoreResult<Vec<String>> {
        self.enter(StoreCall::List)?;
        self.inner.list_names(namespace).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> StoreResult<()> {
        self.enter(StoreCall::Delete)?;
        self.inner.delete(namespace, name).await
    }

    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<Vec<u8>>> {
        self.enter(StoreCall::Get)?;
        self.inner.get(namespace, name).await
    }

    async fn put(&self, namespace: &str, name: &str, data: &[u8]) -> StoreResult<()> {
        self.enter(StoreCall::Put)?;
        self.inner.put(namespace, name, data).await
    }

    async fn lock(&self, namespace: &str, name: &str, info: &LockInfo) -> StoreResult<String> {
        self.enter(StoreCall::Lock)?;
        self.inner.lock(namespace, name, info).await
    }

    async fn unlock(&self, namespace: &str, name: &str, id: &str) -> StoreResult<()> {
        self.enter(StoreCall::Unlock)?;
        self.inner.unlock(namespace, name, id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerCall {
    Lock,
    Unlock,
    State,
    WriteState,
    RefreshState,
    PersistState,
}

/// [`StateManager`] decorator that records calls and injects failures or
/// hangs. Clones share the call log.
#[derive(Debug, Clone)]
pub struct ScriptedManager<M> {
    inner: M,
    script: Arc<Mutex<Script<ManagerCall>>>,
}

impl<M: StateManager> ScriptedManager<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            script: Arc::new(Mutex::new(Script::new())),
        }
    }

    /// Make every later `call` fail with [`StoreError::Unavailable`].
    pub fn fail_on(self, call: ManagerCall) -> Self {
        lock_script(&self.script).failing.insert(call);
        self
    }

    /// Make every later async `call` wait forever after being recorded.
    pub fn hang_on(self, call: ManagerCall) -> Self {
        lock_script(&self.script).hanging.insert(call);
        self
    }

    /// Let every later async `call` complete on the inner manager, then wait
    /// forever instead of returning its result.
    pub fn hang_after(self, call: ManagerCall) -> Self {
        lock_script(&self.script).hanging_after.insert(call);
        self
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn calls(&self) -> Vec<ManagerCall> {
        lock_script(&self.script).calls.clone()
    }

    pub fn count(&self, call: ManagerCall) -> usize {
        lock_script(&self.script).count(call)
    }

    /// Wait until `call` has been made at least `times` times. Panics after
    /// five seconds.
    pub async fn wait_for(&self, call: ManagerCall, times: usize) {
        let description = format!("{times} {call:?} call(s)");
        wait_until(&description, || self.count(call) >= times).await;
    }

    fn enter(&self, call: ManagerCall) -> Outcome {
        lock_script(&self.script).enter(call)
    }

    async fn proceed<T>(
        &self,
        call: ManagerCall,
        inner: impl std::future::Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match self.enter(call) {
            Outcome::Fail => Err(scripted_failure(call)),
            Outcome::Hang => std::future::pending().await,
            Outcome::Proceed => inner.await,
            Outcome::HangAfter => {
                let _ = inner.await;
                std::future::pending().await
            }
        }
    }
}

impl ScriptedManager<RemoteState<MemoryStore>> {
    /// Manager for `name` in namespace `public` of a new [`MemoryStore`].
    pub fn memory(name: &str) -> Self {
        Self::new(RemoteState::new(
            Arc::new(MemoryStore::new()),
            "public",
            name,
        ))
    }

    /// New manager for the same workspace and store, with an empty snapshot
    /// and its own call log.
    pub fn fresh(&self) -> Self {
        Self::new(RemoteState::new(
            Arc::clone(self.inner.store()),
            self.inner.namespace(),
            self.inner.workspace(),
        ))
    }

    pub fn is_locked(&self) -> bool {
        self.inner
            .store()
            .lock_holder(self.inner.namespace(), self.inner.workspace())
            .is_some()
    }
}

#[async_trait]
impl<M: StateManager> StateManager for ScriptedManager<M> {
    fn workspace(&self) -> &str {
        self.inner.workspace()
    }

    async fn lock(&self, info: &LockInfo) -> StoreResult<String> {
        self.proceed(ManagerCall::Lock, self.inner.lock(info)).await
    }

    async fn unlock(&self, id: &str) -> StoreResult<()> {
        self.proceed(ManagerCall::Unlock, self.inner.unlock(id)).await
    }

    fn state(&self) -> Option<StateDocument> {
        self.enter(ManagerCall::State);
        self.inner.state()
    }

    fn write_state(&self, state: StateDocument) -> StoreResult<()> {
        match self.enter(ManagerCall::WriteState) {
            Outcome::Fail => Err(scripted_failure(ManagerCall::WriteState)),
            Outcome::Proceed | Outcome::Hang | Outcome::HangAfter => {
                self.inner.write_state(state)
            }
        }
    }

    async fn refresh_state(&self) -> StoreResult<()> {
        self.proceed(ManagerCall::RefreshState, self.inner.refresh_state())
            .await
    }

    async fn persist_state(&self) -> StoreResult<()> {
        self.proceed(ManagerCall::PersistState, self.inner.persist_state())
            .await
    }
}
