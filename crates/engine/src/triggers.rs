//! Trigger dispatch
//!
//! Triggers are registered globally or for one entity type. Every event
//! reaches all global triggers plus the triggers of the event's type.
//!
//! # Concurrency
//!
//! Each registry sits behind its own `RwLock`. `fire` copies the matching
//! trigger handles under a read lock and dispatches after releasing it, so
//! registration during dispatch never blocks and never disturbs an
//! in-flight dispatch.
//!
//! # Failures
//!
//! A trigger that returns an error or panics is reported as
//! `TriggerFailed` in the [`DispatchReport`]; the remaining triggers still
//! run.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tessera_core::{EntityKey, EntityType, Error, EventKind, Record, Result};
use tracing::warn;

/// Outcome of one trigger invocation
pub type TriggerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Lifecycle callback
pub trait Trigger: Send + Sync {
    /// Name used in failure reports
    fn name(&self) -> &str;

    /// Observe one event
    fn on_event(&self, event: &TriggerEvent) -> TriggerResult;
}

/// A lifecycle transition of one canonical instance
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    /// Transition kind
    pub kind: EventKind,
    /// Type of the instance
    pub entity_type: Arc<EntityType>,
    /// Identity key of the instance
    pub key: EntityKey,
    /// Values before the transition; `None` for creation
    pub before: Option<Record>,
    /// Values after the transition; `None` for deletion
    pub after: Option<Record>,
}

impl TriggerEvent {
    /// Event for a newly created instance
    pub fn created(entity_type: Arc<EntityType>, key: EntityKey, after: Record) -> Self {
        TriggerEvent {
            kind: EventKind::Created,
            entity_type,
            key,
            before: None,
            after: Some(after),
        }
    }

    /// Event for a changed instance
    pub fn updated(entity_type: Arc<EntityType>, key: EntityKey, before: Record, after: Record) -> Self {
        TriggerEvent {
            kind: EventKind::Updated,
            entity_type,
            key,
            before: Some(before),
            after: Some(after),
        }
    }

    /// Event for a removed instance
    pub fn deleted(entity_type: Arc<EntityType>, key: EntityKey, before: Option<Record>) -> Self {
        TriggerEvent {
            kind: EventKind::Deleted,
            entity_type,
            key,
            before,
            after: None,
        }
    }
}

/// Trigger backed by a closure
pub struct FnTrigger<F> {
    name: String,
    callback: F,
}

impl<F> FnTrigger<F>
where
    F: Fn(&TriggerEvent) -> TriggerResult + Send + Sync,
{
    /// Wrap `callback` under `name`
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        FnTrigger {
            name: name.into(),
            callback,
        }
    }
}

impl<F> Trigger for FnTrigger<F>
where
    F: Fn(&TriggerEvent) -> TriggerResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &TriggerEvent) -> TriggerResult {
        (self.callback)(event)
    }
}

/// Result of one `fire`
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Triggers invoked
    pub fired: usize,
    /// `TriggerFailed` for each trigger that errored or panicked
    pub failures: Vec<Error>,
}

impl DispatchReport {
    /// Whether every trigger succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold another report into this one
    pub fn absorb(&mut self, other: DispatchReport) {
        self.fired += other.fired;
        self.failures.extend(other.failures);
    }
}

fn same_trigger(a: &Arc<dyn Trigger>, b: &Arc<dyn Trigger>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Global and per-type trigger registrations
#[derive(Default)]
pub struct TriggerDispatcher {
    global: RwLock<Vec<Arc<dyn Trigger>>>,
    typed: RwLock<FxHashMap<String, Vec<Arc<dyn Trigger>>>>,
}

impl TriggerDispatcher {
    /// Create a dispatcher with no registrations
    pub fn new() -> Self {
        TriggerDispatcher::default()
    }

    fn check(trigger: &Arc<dyn Trigger>) -> Result<()> {
        if trigger.name().is_empty() {
            return Err(Error::illegal("trigger name must not be empty"));
        }
        Ok(())
    }

    /// Register a trigger for every event
    ///
    /// Returns `false` if the same trigger handle was already registered.
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` for an unnamed trigger.
    pub fn register_global(&self, trigger: Arc<dyn Trigger>) -> Result<bool> {
        Self::check(&trigger)?;
        let mut global = self.global.write();
        if global.iter().any(|t| same_trigger(t, &trigger)) {
            return Ok(false);
        }
        global.push(trigger);
        Ok(true)
    }

    /// Remove a global trigger; `false` if it was not registered
    pub fn unregister_global(&self, trigger: &Arc<dyn Trigger>) -> bool {
        let mut global = self.global.write();
        let before = global.len();
        global.retain(|t| !same_trigger(t, trigger));
        global.len() != before
    }

    /// Register a trigger for events of one type
    ///
    /// Returns `false` if the same trigger handle was already registered
    /// for the type.
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` for an empty type name or unnamed trigger.
    pub fn register_for_type(&self, type_name: &str, trigger: Arc<dyn Trigger>) -> Result<bool> {
        if type_name.is_empty() {
            return Err(Error::illegal("entity type name must not be empty"));
        }
        Self::check(&trigger)?;
        let mut typed = self.typed.write();
        let set = typed.entry(type_name.to_string()).or_default();
        if set.iter().any(|t| same_trigger(t, &trigger)) {
            return Ok(false);
        }
        set.push(trigger);
        Ok(true)
    }

    /// Remove a type trigger; `false` if it was not registered
    pub fn unregister_for_type(&self, type_name: &str, trigger: &Arc<dyn Trigger>) -> bool {
        let mut typed = self.typed.write();
        let Some(set) = typed.get_mut(type_name) else {
            return false;
        };
        let before = set.len();
        set.retain(|t| !same_trigger(t, trigger));
        let removed = set.len() != before;
        if set.is_empty() {
            typed.remove(type_name);
        }
        removed
    }

    /// Whether any trigger would observe events of `type_name`
    pub fn has_triggers(&self, type_name: &str) -> bool {
        !self.global.read().is_empty() || self.typed.read().contains_key(type_name)
    }

    /// Number of registrations, global plus per-type
    pub fn len(&self) -> usize {
        self.global.read().len() + self.typed.read().values().map(Vec::len).sum::<usize>()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self, type_name: &str) -> Vec<Arc<dyn Trigger>> {
        let mut targets: Vec<Arc<dyn Trigger>> = self.global.read().clone();
        if let Some(set) = self.typed.read().get(type_name) {
            targets.extend(set.iter().cloned());
        }
        targets
    }

    /// Dispatch `event` to the triggers registered when dispatch starts
    pub fn fire(&self, event: &TriggerEvent) -> DispatchReport {
        let targets = self.snapshot(event.entity_type.name());
        let mut report = DispatchReport::default();
        for trigger in targets {
            report.fired += 1;
            let reason = match catch_unwind(AssertUnwindSafe(|| trigger.on_event(event))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "trigger panicked".to_string()),
            };
            warn!(
                target: "tessera::trigger",
                trigger = trigger.name(),
                event = %event.kind,
                entity_type = event.entity_type.name(),
                key = %event.key,
                reason = %reason,
                "Trigger failed"
            );
            report.failures.push(Error::TriggerFailed {
                trigger: trigger.name().to_string(),
                event: event.kind,
                entity_type: event.entity_type.name().to_string(),
                key: event.key.to_string(),
                reason,
            });
        }
        report
    }
}

impl std::fmt::Debug for TriggerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerDispatcher")
            .field("global", &self.global.read().len())
            .field("typed", &self.typed.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessera_core::ScalarType;

    fn person() -> Arc<EntityType> {
        Arc::new(
            EntityType::builder("Person")
                .key("id", ScalarType::Integer)
                .build()
                .unwrap(),
        )
    }

    fn counter(name: &str, hits: Arc<AtomicUsize>) -> Arc<dyn Trigger> {
        Arc::new(FnTrigger::new(name, move |_: &TriggerEvent| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }

    fn event() -> TriggerEvent {
        TriggerEvent::created(person(), EntityKey::Int(1), Record::new().with("id", 1i64))
    }

    #[test]
    fn test_global_and_typed_both_fire() {
        let dispatcher = TriggerDispatcher::new();
        let global = Arc::new(AtomicUsize::new(0));
        let typed = Arc::new(AtomicUsize::new(0));
        let other = Arc::new(AtomicUsize::new(0));
        dispatcher.register_global(counter("g", global.clone())).unwrap();
        dispatcher
            .register_for_type("Person", counter("t", typed.clone()))
            .unwrap();
        dispatcher
            .register_for_type("Car", counter("c", other.clone()))
            .unwrap();

        let report = dispatcher.fire(&event());
        assert_eq!(report.fired, 2);
        assert!(report.is_clean());
        assert_eq!(global.load(Ordering::SeqCst), 1);
        assert_eq!(typed.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registration_is_a_set() {
        let dispatcher = TriggerDispatcher::new();
        let t = counter("g", Arc::new(AtomicUsize::new(0)));
        assert!(dispatcher.register_global(Arc::clone(&t)).unwrap());
        assert!(!dispatcher.register_global(Arc::clone(&t)).unwrap());
        assert_eq!(dispatcher.len(), 1);
        assert!(dispatcher.unregister_global(&t));
        assert!(!dispatcher.unregister_global(&t));
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_unregister_for_type() {
        let dispatcher = TriggerDispatcher::new();
        let t = counter("t", Arc::new(AtomicUsize::new(0)));
        dispatcher.register_for_type("Person", Arc::clone(&t)).unwrap();
        assert!(dispatcher.has_triggers("Person"));
        assert!(!dispatcher.has_triggers("Car"));
        assert!(dispatcher.unregister_for_type("Person", &t));
        assert!(!dispatcher.has_triggers("Person"));
        assert!(!dispatcher.unregister_for_type("Car", &t));
    }

    #[test]
    fn test_illegal_registrations() {
        let dispatcher = TriggerDispatcher::new();
        let unnamed = counter("", Arc::new(AtomicUsize::new(0)));
        assert!(matches!(
            dispatcher.register_global(unnamed),
            Err(Error::IllegalArgument(_))
        ));
        let t = counter("t", Arc::new(AtomicUsize::new(0)));
        assert!(matches!(
            dispatcher.register_for_type("", t),
            Err(Error::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_failing_trigger_does_not_stop_dispatch() {
        let dispatcher = TriggerDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        dispatcher
            .register_global(Arc::new(FnTrigger::new("broken", |_: &TriggerEvent| {
                Err("constraint violated".into())
            })))
            .unwrap();
        dispatcher
            .register_global(Arc::new(FnTrigger::new("panics", |_: &TriggerEvent| -> TriggerResult {
                panic!("kaboom")
            })))
            .unwrap();
        dispatcher.register_global(counter("ok", hits.clone())).unwrap();

        let report = dispatcher.fire(&event());
        assert_eq!(report.fired, 3);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(report.failures.len(), 2);
        match &report.failures[0] {
            Error::TriggerFailed {
                trigger,
                event,
                entity_type,
                key,
                reason,
            } => {
                assert_eq!(trigger, "broken");
                assert_eq!(*event, EventKind::Created);
                assert_eq!(entity_type, "Person");
                assert_eq!(key, "1");
                assert_eq!(reason, "constraint violated");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(report.failures[1].to_string().contains("kaboom"));
    }

    #[test]
    fn test_registration_during_dispatch() {
        let dispatcher = Arc::new(TriggerDispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let d = Arc::clone(&dispatcher);
        let s = Arc::clone(&seen);
        dispatcher
            .register_global(Arc::new(FnTrigger::new("registrar", move |e: &TriggerEvent| {
                s.lock().push(e.key.clone());
                let late = counter("late", Arc::new(AtomicUsize::new(0)));
                d.register_for_type("Person", late)?;
                Ok(())
            })))
            .unwrap();

        let report = dispatcher.fire(&event());
        assert!(report.is_clean());
        assert_eq!(report.fired, 1);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(dispatcher.len(), 2);
    }

    static_assertions::assert_impl_all!(TriggerDispatcher: Send, Sync);
}
