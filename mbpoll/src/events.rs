//! Observer registration and event dispatch.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, trace};

use crate::config::ConnectionConfig;
use crate::error::PollError;
use crate::state::EngineState;
use crate::transport::{ConnectionKind, ModbusData};

/// Notifications published by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The link opened.
    Connect {
        kind: ConnectionKind,
        config: ConnectionConfig,
    },
    /// The link closed on request.
    Close,
    /// A request succeeded.
    Data(ModbusData),
    /// A configuration, transport or budget failure, or a monitor overlap.
    Error(PollError),
    /// Every state assignment.
    StateChange {
        state: EngineState,
        description: &'static str,
    },
    PollingStart,
    PollingStop,
    MonitorStart,
    MonitorStop,
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::Connect { .. } => EventKind::Connect,
            EngineEvent::Close => EventKind::Close,
            EngineEvent::Data(_) => EventKind::Data,
            EngineEvent::Error(_) => EventKind::Error,
            EngineEvent::StateChange { .. } => EventKind::StateChange,
            EngineEvent::PollingStart => EventKind::PollingStart,
            EngineEvent::PollingStop => EventKind::PollingStop,
            EngineEvent::MonitorStart => EventKind::MonitorStart,
            EngineEvent::MonitorStop => EventKind::MonitorStop,
        }
    }
}

/// Event channel names listeners subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Close,
    Data,
    Error,
    StateChange,
    PollingStart,
    PollingStop,
    MonitorStart,
    MonitorStop,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::Connect,
        EventKind::Close,
        EventKind::Data,
        EventKind::Error,
        EventKind::StateChange,
        EventKind::PollingStart,
        EventKind::PollingStop,
        EventKind::MonitorStart,
        EventKind::MonitorStop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Close => "close",
            EventKind::Data => "data",
            EventKind::Error => "error",
            EventKind::StateChange => "stateChange",
            EventKind::PollingStart => "polling-start",
            EventKind::PollingStop => "polling-stop",
            EventKind::MonitorStart => "monitor-start",
            EventKind::MonitorStop => "monitor-stop",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered observer.
pub type Listener = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Listener registry shared between the engine and its handles.
///
/// Listeners run synchronously on the engine task and must not block.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<HashMap<EventKind, Vec<Listener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one kind of event.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.entry(kind).or_default().push(Arc::new(listener));
    }

    /// Drop every listener of one kind.
    pub fn remove_all(&self, kind: EventKind) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.remove(&kind);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        listeners.get(&kind).map_or(0, Vec::len)
    }

    pub fn has_listeners(&self, kind: EventKind) -> bool {
        self.listener_count(kind) > 0
    }

    /// Deliver an event to the listeners of its kind.
    ///
    /// Errors go through [`emit_error`](Self::emit_error).
    pub fn emit(&self, event: EngineEvent) {
        if let EngineEvent::Error(error) = event {
            self.emit_error(error);
            return;
        }
        self.dispatch(&event);
    }

    /// Deliver an error only if someone listens for errors.
    ///
    /// Returns whether the error was dispatched.
    pub fn emit_error(&self, error: PollError) -> bool {
        if !self.has_listeners(EventKind::Error) {
            debug!(error = %error, "No error listener registered, error not dispatched");
            return false;
        }
        self.dispatch(&EngineEvent::Error(error));
        true
    }

    fn dispatch(&self, event: &EngineEvent) {
        let kind = event.kind();
        // Snapshot so listeners may register further listeners.
        let targets: Vec<Listener> = {
            let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            listeners.get(&kind).cloned().unwrap_or_default()
        };

        trace!(event = %kind, listeners = targets.len(), "Dispatching event");
        for listener in targets {
            listener(event);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<(EventKind, usize)> = EventKind::ALL
            .into_iter()
            .map(|kind| (kind, self.listener_count(kind)))
            .filter(|(_, count)| *count > 0)
            .collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(bus: &EventBus, kind: EventKind) -> Arc<Mutex<Vec<EventKind>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.on(kind, move |event| sink.lock().unwrap().push(event.kind()));
        seen
    }

    #[test]
    fn test_error_without_listener_is_not_dispatched() {
        let bus = EventBus::new();
        let stops = recorder(&bus, EventKind::PollingStop);

        assert!(!bus.emit_error(PollError::Overlap));
        bus.emit(EngineEvent::Error(PollError::Busy));
        assert!(stops.lock().unwrap().is_empty());
    }

    #[test]
    fn test_error_with_listener() {
        let bus = EventBus::new();
        let errors = recorder(&bus, EventKind::Error);

        assert!(bus.emit_error(PollError::Overlap));
        bus.emit(EngineEvent::Error(PollError::Busy));
        assert_eq!(errors.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_events_routed_by_kind() {
        let bus = EventBus::new();
        let starts = recorder(&bus, EventKind::PollingStart);
        let stops = recorder(&bus, EventKind::PollingStop);

        bus.emit(EngineEvent::PollingStart);
        bus.emit(EngineEvent::PollingStop);
        bus.emit(EngineEvent::PollingStop);

        assert_eq!(starts.lock().unwrap().len(), 1);
        assert_eq!(stops.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_remove_all() {
        let bus = EventBus::new();
        let seen = recorder(&bus, EventKind::Close);
        assert_eq!(bus.listener_count(EventKind::Close), 1);

        bus.remove_all(EventKind::Close);
        bus.emit(EngineEvent::Close);
        assert!(seen.lock().unwrap().is_empty());
        assert!(!bus.has_listeners(EventKind::Close));
    }

    #[test]
    fn test_listener_can_register_during_dispatch() {
        let bus = EventBus::new();
        let inner = bus.clone();
        bus.on(EventKind::MonitorStart, move |_| {
            inner.on(EventKind::MonitorStop, |_| {});
        });

        bus.emit(EngineEvent::MonitorStart);
        assert_eq!(bus.listener_count(EventKind::MonitorStop), 1);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(EventKind::PollingStop.to_string(), "polling-stop");
        assert_eq!(EventKind::StateChange.as_str(), "stateChange");
    }
}
