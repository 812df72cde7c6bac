//! Watch dispatch
//!
//! A `WatchDispatcher` owns the child-event stream of one watched parent and
//! runs a loop that hands each event to the subscriptions whose predicate
//! accepts it. Subscriptions are explicit: `subscribe` returns a
//! `SubscriptionHandle`, and dropping the handle removes the subscription.

pub mod listener;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use keeper_coordination::{ChildEvent, ChildEventStream};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use self::listener::{ChildListener, FnChildListener};

type Predicate = Box<dyn Fn(&ChildEvent) -> bool + Send + Sync>;

struct Subscription {
    predicate: Predicate,
    listener: Arc<dyn ChildListener>,
}

struct Registry {
    path: String,
    subscriptions: DashMap<u64, Arc<Subscription>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Registry {
    fn dispatch(&self, event: &ChildEvent) {
        // Collect first so listeners run without a map shard locked.
        let matching: Vec<Arc<Subscription>> = self
            .subscriptions
            .iter()
            .filter(|entry| (entry.value().predicate)(event))
            .map(|entry| entry.value().clone())
            .collect();

        debug!(path = %self.path, %event, listeners = matching.len(), "Dispatching child event");
        for subscription in matching {
            subscription.listener.on_event(event);
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let all: Vec<Arc<Subscription>> = self
            .subscriptions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for subscription in all {
            subscription.listener.on_closed();
        }
    }
}

/// Dispatch loop for the child notifications of one parent path.
pub struct WatchDispatcher {
    registry: Arc<Registry>,
    task: JoinHandle<()>,
}

impl WatchDispatcher {
    /// Start dispatching `events`. Must be called within a tokio runtime.
    pub fn start(path: impl Into<String>, mut events: ChildEventStream) -> Self {
        let registry = Arc::new(Registry {
            path: path.into(),
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let loop_registry = registry.clone();
        let task = tokio::spawn(async move {
            debug!(path = %loop_registry.path, "Watch dispatcher started");
            while let Some(event) = events.recv().await {
                loop_registry.dispatch(&event);
            }
            info!(path = %loop_registry.path, "Watch stream ended");
            loop_registry.close();
        });

        Self { registry, task }
    }

    /// Subscribe a closure to events accepted by `predicate`.
    pub fn subscribe<P, F>(&self, predicate: P, on_event: F) -> SubscriptionHandle
    where
        P: Fn(&ChildEvent) -> bool + Send + Sync + 'static,
        F: Fn(&ChildEvent) + Send + Sync + 'static,
    {
        self.subscribe_listener(predicate, Arc::new(FnChildListener::new(on_event)))
    }

    /// Subscribe a listener to events accepted by `predicate`.
    ///
    /// If the stream has already ended the listener's `on_closed` runs
    /// immediately.
    pub fn subscribe_listener<P>(
        &self,
        predicate: P,
        listener: Arc<dyn ChildListener>,
    ) -> SubscriptionHandle
    where
        P: Fn(&ChildEvent) -> bool + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst);
        self.registry.subscriptions.insert(
            id,
            Arc::new(Subscription {
                predicate: Box::new(predicate),
                listener: listener.clone(),
            }),
        );
        if self.registry.closed.load(Ordering::SeqCst) {
            listener.on_closed();
        }

        SubscriptionHandle {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn path(&self) -> &str {
        &self.registry.path
    }

    pub fn subscription_count(&self) -> usize {
        self.registry.subscriptions.len()
    }

    /// Whether the underlying stream has ended.
    pub fn is_closed(&self) -> bool {
        self.registry.closed.load(Ordering::SeqCst)
    }
}

impl Drop for WatchDispatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Keeps a subscription alive. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    id: u64,
    registry: Weak<Registry>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {}
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.subscriptions.remove(&self.id);
            debug!(path = %registry.path, id = self.id, "Unsubscribed");
        }
    }
}
