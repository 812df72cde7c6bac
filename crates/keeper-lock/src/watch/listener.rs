//! Child-notification listener trait

use keeper_coordination::ChildEvent;

/// Trait for receiving child notifications from a `WatchDispatcher`.
pub trait ChildListener: Send + Sync + 'static {
    /// Called for every event accepted by the subscription's predicate.
    fn on_event(&self, event: &ChildEvent);

    /// Called once the underlying watch stream has ended.
    fn on_closed(&self) {}
}

/// A simple listener that invokes a closure.
pub struct FnChildListener<F>
where
    F: Fn(&ChildEvent) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnChildListener<F>
where
    F: Fn(&ChildEvent) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ChildListener for FnChildListener<F>
where
    F: Fn(&ChildEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &ChildEvent) {
        (self.f)(event);
    }
}
