//! # Events
//!
//! Named, synchronous event dispatch. Listeners run in registration order and
//! receive exclusive access to the fields an event exposes, which they may
//! rewrite in place.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::context::{EnvironmentContext, Exception};
use crate::options::HandlerOptions;
use crate::types::Result;

/// Name of the event fired by the public error page
pub const APPLICATION_ERROR: &str = "applicationError";

/// Context fields start-up listeners may rewrite
pub struct StartUpArgs<'a> {
    pub code: &'a mut i64,
    pub message: &'a mut String,
    pub file: &'a mut String,
    pub line: &'a mut u32,
    pub environment: &'a mut EnvironmentContext,
    pub options: &'a mut HandlerOptions,
}

/// Arguments of a fired event
pub enum EventArgs<'a> {
    /// Fired before rendering
    StartUp(StartUpArgs<'a>),
    /// Fired after rendering, before output
    ShutDown { html: &'a mut String },
    /// Fired by the public error page
    ApplicationError { exceptions: &'a [Exception] },
}

impl fmt::Debug for EventArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventArgs::StartUp(args) => f
                .debug_struct("StartUp")
                .field("code", &args.code)
                .field("message", &args.message)
                .finish_non_exhaustive(),
            EventArgs::ShutDown { html } => f.debug_struct("ShutDown").field("len", &html.len()).finish(),
            EventArgs::ApplicationError { exceptions } => f
                .debug_struct("ApplicationError")
                .field("exceptions", &exceptions.len())
                .finish(),
        }
    }
}

/// Named event dispatch
pub trait EventBus: Send + Sync {
    /// Runs the listeners of `name`; the first listener error stops dispatch
    fn fire(&self, name: &str, args: &mut EventArgs<'_>) -> Result<()>;
}

/// A registered listener
pub type Listener = Arc<dyn Fn(&mut EventArgs<'_>) -> Result<()> + Send + Sync>;

/// Listener registry keyed by event name
#[derive(Default)]
pub struct Events {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener to `name`
    pub fn listen<S, F>(&self, name: S, listener: F)
    where
        S: Into<String>,
        F: Fn(&mut EventArgs<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.into())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Number of listeners registered for `name`
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, Vec::len)
    }
}

impl EventBus for Events {
    fn fire(&self, name: &str, args: &mut EventArgs<'_>) -> Result<()> {
        // Listeners may register further listeners, so the lock is released first.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default();

        debug!(event = %name, listeners = listeners.len(), "Firing event");

        for listener in listeners {
            listener(args)?;
        }
        Ok(())
    }
}

/// Event bus without listeners
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl EventBus for NoEvents {
    fn fire(&self, _name: &str, _args: &mut EventArgs<'_>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Error, ErrorKind};
    use std::sync::Mutex;

    #[test]
    fn test_listeners_run_in_order_and_mutate() {
        let events = Events::new();
        events.listen("errorShutDown", |args| {
            if let EventArgs::ShutDown { html } = args {
                html.push_str("a");
            }
            Ok(())
        });
        events.listen("errorShutDown", |args| {
            if let EventArgs::ShutDown { html } = args {
                html.push_str("b");
            }
            Ok(())
        });

        let mut html = String::from(">");
        events
            .fire("errorShutDown", &mut EventArgs::ShutDown { html: &mut html })
            .unwrap();
        assert_eq!(html, ">ab");
        assert_eq!(events.listener_count("errorShutDown"), 2);
        assert_eq!(events.listener_count("other"), 0);
    }

    #[test]
    fn test_start_up_listener_rewrites_fields() {
        let events = Events::new();
        events.listen("errorStartUp", |args| {
            if let EventArgs::StartUp(fields) = args {
                *fields.code = 500;
                fields.message.push_str(" (escalated)");
                fields
                    .environment
                    .insert("user".into(), serde_json::json!("alice"));
            }
            Ok(())
        });

        let mut code = 2;
        let mut message = String::from("warning");
        let mut file = String::new();
        let mut line = 0;
        let mut environment = EnvironmentContext::new();
        let mut options = HandlerOptions::default();
        let mut args = EventArgs::StartUp(StartUpArgs {
            code: &mut code,
            message: &mut message,
            file: &mut file,
            line: &mut line,
            environment: &mut environment,
            options: &mut options,
        });
        events.fire("errorStartUp", &mut args).unwrap();

        assert_eq!(code, 500);
        assert_eq!(message, "warning (escalated)");
        assert_eq!(environment["user"], "alice");
    }

    #[test]
    fn test_listener_error_stops_dispatch() {
        let calls = Arc::new(Mutex::new(0));
        let events = Events::new();
        events.listen(APPLICATION_ERROR, |_| Err(Error::event("listener failed")));
        let counter = Arc::clone(&calls);
        events.listen(APPLICATION_ERROR, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        let err = events
            .fire(APPLICATION_ERROR, &mut EventArgs::ApplicationError { exceptions: &[] })
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Event);
        assert_eq!(*calls.lock().unwrap(), 0);
    }
}
