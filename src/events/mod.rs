//! Event bus for crawl telemetry
//!
//! The queue, the persisted state and the orchestrator all announce lifecycle
//! changes through a shared event vocabulary. Subscribers register per event
//! kind and are invoked synchronously, in registration order, at emission
//! time. Progress reporting consumes these events without coupling to the
//! emitting component's internals.

use std::collections::HashMap;
use std::sync::RwLock;

/// Discriminant for [`Event`], used as the subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // Orchestrator lifecycle
    Initialized,
    UrlsCollected,
    PageScraped,
    RunCompleted,

    // Queue lifecycle
    Active,
    Idle,
    TaskAdded,
    TaskCompleted,
    TaskSucceeded,
    TaskFailed,

    // State lifecycle
    UrlProcessed,
    UrlFailed,
    ImageLoadFailure,
    StateLoadError,
    StateSaved,
}

/// A crawl lifecycle event
#[derive(Debug, Clone)]
pub enum Event {
    Initialized,
    UrlsCollected {
        total_urls: usize,
        duplicates: usize,
        sections: usize,
    },
    PageScraped {
        url: String,
        index: usize,
        output_path: Option<String>,
    },
    RunCompleted {
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },

    Active,
    Idle,
    TaskAdded {
        id: String,
    },
    TaskCompleted {
        id: String,
    },
    TaskSucceeded {
        id: String,
    },
    TaskFailed {
        id: String,
        error: String,
    },

    UrlProcessed {
        url: String,
    },
    UrlFailed {
        url: String,
        error: String,
    },
    ImageLoadFailure {
        url: String,
    },
    StateLoadError {
        file: String,
        error: String,
    },
    StateSaved {
        forced: bool,
    },
}

impl Event {
    /// Returns the kind this event is dispatched under
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Initialized => EventKind::Initialized,
            Event::UrlsCollected { .. } => EventKind::UrlsCollected,
            Event::PageScraped { .. } => EventKind::PageScraped,
            Event::RunCompleted { .. } => EventKind::RunCompleted,
            Event::Active => EventKind::Active,
            Event::Idle => EventKind::Idle,
            Event::TaskAdded { .. } => EventKind::TaskAdded,
            Event::TaskCompleted { .. } => EventKind::TaskCompleted,
            Event::TaskSucceeded { .. } => EventKind::TaskSucceeded,
            Event::TaskFailed { .. } => EventKind::TaskFailed,
            Event::UrlProcessed { .. } => EventKind::UrlProcessed,
            Event::UrlFailed { .. } => EventKind::UrlFailed,
            Event::ImageLoadFailure { .. } => EventKind::ImageLoadFailure,
            Event::StateLoadError { .. } => EventKind::StateLoadError,
            Event::StateSaved { .. } => EventKind::StateSaved,
        }
    }
}

type Handler = Box<dyn Fn(&Event) + Send + Sync>;

/// Synchronous publish-subscribe bus
///
/// Handlers for a kind run in registration order; handlers registered with
/// [`EventBus::on_any`] run first for every event. Handlers must not
/// register new subscriptions from inside a callback.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,
    any_handlers: RwLock<Vec<Handler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a handler to one event kind
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .expect("event handler lock poisoned")
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
    }

    /// Subscribes a handler to every event (used for bus-to-bus forwarding)
    pub fn on_any<F>(&self, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.any_handlers
            .write()
            .expect("event handler lock poisoned")
            .push(Box::new(handler));
    }

    /// Emits an event to all matching subscribers, synchronously
    pub fn emit(&self, event: &Event) {
        for handler in self
            .any_handlers
            .read()
            .expect("event handler lock poisoned")
            .iter()
        {
            handler(event);
        }
        if let Some(list) = self
            .handlers
            .read()
            .expect("event handler lock poisoned")
            .get(&event.kind())
        {
            for handler in list {
                handler(event);
            }
        }
    }

    /// Number of handlers registered for a kind
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .expect("event handler lock poisoned")
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_emit_reaches_subscriber() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        bus.on(EventKind::Idle, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&Event::Idle);
        bus.emit(&Event::Idle);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_emit_skips_other_kinds() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        bus.on(EventKind::Idle, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&Event::Active);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registration_order_preserved() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let o = order.clone();
            bus.on(EventKind::Active, move |_| {
                o.lock().unwrap().push(tag);
            });
        }

        bus.emit(&Event::Active);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_on_any_sees_every_event() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        bus.on_any(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&Event::Active);
        bus.emit(&Event::Idle);
        bus.emit(&Event::Initialized);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_event_payload_delivered() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));

        let s = seen.clone();
        bus.on(EventKind::UrlFailed, move |event| {
            if let Event::UrlFailed { url, error } = event {
                *s.lock().unwrap() = Some((url.clone(), error.clone()));
            }
        });

        bus.emit(&Event::UrlFailed {
            url: "https://docs.example.com/a".to_string(),
            error: "HTTP 404 Not Found".to_string(),
        });

        let got = seen.lock().unwrap().clone().unwrap();
        assert_eq!(got.0, "https://docs.example.com/a");
        assert_eq!(got.1, "HTTP 404 Not Found");
    }

    #[test]
    fn test_handler_count() {
        let bus = EventBus::new();
        assert_eq!(bus.handler_count(EventKind::Idle), 0);
        bus.on(EventKind::Idle, |_| {});
        bus.on(EventKind::Idle, |_| {});
        assert_eq!(bus.handler_count(EventKind::Idle), 2);
    }
}
