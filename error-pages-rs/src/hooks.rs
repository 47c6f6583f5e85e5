//! # Process Hooks
//!
//! Composition root of the error pipeline. `ErrorsResource` resolves the
//! configured handler and renderer by name, validates the handler options and
//! registers thin adapters with a [`HookRegistrar`]. Each adapter normalizes
//! its failure into a [`Failure`] and hands it to `write_error`.
//!
//! The last runtime error lives in an explicitly shared [`LastErrorSlot`],
//! written once and read once by the shutdown adapter.

use std::collections::HashMap;
use std::fmt;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::OnceCell;
use tracing::{debug, error, warn};

use crate::context::{EnvironmentContext, Exception, Failure};
use crate::handler::{ErrorHandler, Handler};
use crate::options::{ErrorsOptions, HandlerOptions};
use crate::renderer::{DefaultRenderer, Renderer};
use crate::types::{Error, Result};

/// Runs once at process shutdown
pub type ShutdownHook = Box<dyn FnOnce() + Send>;

/// Receives uncaught exceptions
pub type ExceptionHook = Arc<dyn Fn(Exception) + Send + Sync>;

/// Receives runtime errors
pub type ErrorHook = Arc<dyn Fn(Failure) + Send + Sync>;

/// Builds a handler around a renderer
pub type HandlerFactory = Arc<dyn Fn(Arc<dyn Renderer>) -> Arc<dyn Handler> + Send + Sync>;

/// Builds a renderer
pub type RendererFactory = Arc<dyn Fn() -> Arc<dyn Renderer> + Send + Sync>;

/// Registers process-wide failure callbacks
pub trait HookRegistrar {
    fn on_shutdown(&mut self, hook: ShutdownHook);
    fn on_exception(&mut self, hook: ExceptionHook);
    fn on_error(&mut self, hook: ErrorHook);
}

/// Write-once store of the last runtime error, read at most once
#[derive(Debug, Default)]
pub struct LastErrorSlot {
    failure: OnceCell<Failure>,
    consumed: AtomicBool,
}

impl LastErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `failure` unless a failure was already recorded
    pub fn record(&self, failure: Failure) -> bool {
        self.failure.set(failure).is_ok()
    }

    pub fn is_recorded(&self) -> bool {
        self.failure.get().is_some()
    }

    /// Returns the recorded failure the first time only
    pub fn take(&self) -> Option<Failure> {
        let failure = self.failure.get()?;
        if self.consumed.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(failure.clone())
    }
}

/// Hook registrar owned by the process entry point.
///
/// Exception hooks become the process panic hook unless the registrar is
/// detached; detached hooks only run through [`ProcessHooks::throw`].
pub struct ProcessHooks {
    last_error: Arc<LastErrorSlot>,
    install_panic_hook: bool,
    exception_hook: Option<ExceptionHook>,
    error_hook: Option<ErrorHook>,
    shutdown_hooks: Vec<ShutdownHook>,
}

impl fmt::Debug for ProcessHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHooks")
            .field("last_error", &self.last_error)
            .field("install_panic_hook", &self.install_panic_hook)
            .field("exception_hook", &self.exception_hook.is_some())
            .field("error_hook", &self.error_hook.is_some())
            .field("shutdown_hooks", &self.shutdown_hooks.len())
            .finish()
    }
}

impl ProcessHooks {
    pub fn new(last_error: Arc<LastErrorSlot>) -> Self {
        Self {
            last_error,
            install_panic_hook: true,
            exception_hook: None,
            error_hook: None,
            shutdown_hooks: Vec::new(),
        }
    }

    /// Registrar that leaves the process panic hook alone
    pub fn detached(last_error: Arc<LastErrorSlot>) -> Self {
        Self {
            install_panic_hook: false,
            ..Self::new(last_error)
        }
    }

    /// Reports a runtime error.
    ///
    /// The failure is recorded in the last error slot. When an error hook is
    /// registered it handles the failure and the slot is consumed, so the
    /// shutdown adapter does not report it a second time.
    pub fn raise<S, F>(&self, code: i64, message: S, file: F, line: u32, environment: EnvironmentContext)
    where
        S: Into<String>,
        F: Into<String>,
    {
        let failure = Failure::new(code, message)
            .at(file, line)
            .environment(environment);

        if !self.last_error.record(failure.clone()) {
            debug!("Last error already recorded");
        }
        if let Some(hook) = &self.error_hook {
            self.last_error.take();
            hook(failure);
        }
    }

    /// Hands an uncaught exception to the exception hook
    pub fn throw(&self, exception: Exception) {
        match &self.exception_hook {
            Some(hook) => hook(exception),
            None => warn!(class = %exception.class(), "No exception hook registered"),
        }
    }

    /// Runs the shutdown hooks in registration order
    pub fn shutdown(&mut self) {
        debug!(hooks = self.shutdown_hooks.len(), "Running shutdown hooks");
        for hook in self.shutdown_hooks.drain(..) {
            hook();
        }
    }
}

impl HookRegistrar for ProcessHooks {
    fn on_shutdown(&mut self, hook: ShutdownHook) {
        self.shutdown_hooks.push(hook);
    }

    fn on_exception(&mut self, hook: ExceptionHook) {
        if self.install_panic_hook {
            let panic_hook = Arc::clone(&hook);
            panic::set_hook(Box::new(move |info| {
                panic_hook(Exception::from_panic(info));
            }));
        }
        self.exception_hook = Some(hook);
    }

    fn on_error(&mut self, hook: ErrorHook) {
        self.error_hook = Some(hook);
    }
}

/// Named handler and renderer factories plus the adapters built from them
pub struct ErrorsResource {
    handlers: HashMap<String, HandlerFactory>,
    renderers: HashMap<String, RendererFactory>,
    last_error: Arc<LastErrorSlot>,
    explicit_error: Arc<Mutex<Option<Failure>>>,
}

impl fmt::Debug for ErrorsResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<&String> = self.handlers.keys().collect();
        handlers.sort();
        let mut renderers: Vec<&String> = self.renderers.keys().collect();
        renderers.sort();
        f.debug_struct("ErrorsResource")
            .field("handlers", &handlers)
            .field("renderers", &renderers)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl ErrorsResource {
    /// Resource with the `errorHandler` handler and `default` renderer
    pub fn new(last_error: Arc<LastErrorSlot>) -> Self {
        let mut resource = Self {
            handlers: HashMap::new(),
            renderers: HashMap::new(),
            last_error,
            explicit_error: Arc::new(Mutex::new(None)),
        };
        resource
            .register_handler("errorHandler", |renderer| Arc::new(ErrorHandler::new(renderer)))
            .register_renderer("default", || Arc::new(DefaultRenderer::new()));
        resource
    }

    pub fn register_handler<S, F>(&mut self, name: S, factory: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn(Arc<dyn Renderer>) -> Arc<dyn Handler> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn register_renderer<S, F>(&mut self, name: S, factory: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn() -> Arc<dyn Renderer> + Send + Sync + 'static,
    {
        self.renderers.insert(name.into(), Arc::new(factory));
        self
    }

    /// Failure the shutdown adapter reports before consulting the slot
    pub fn set_last_error(&self, failure: Failure) {
        *self
            .explicit_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(failure);
    }

    /// Builds and validates the handler, then registers the enabled adapters
    pub fn init(&self, options: &ErrorsOptions, registrar: &mut dyn HookRegistrar) -> Result<Arc<dyn Handler>> {
        let renderer_name = options.handler_options.renderer.as_deref().unwrap_or("default");
        let renderer = self.renderers.get(renderer_name).ok_or_else(|| {
            Error::configuration(format!("Renderer {} not registered", renderer_name))
        })?;
        let factory = self.handlers.get(&options.handler).ok_or_else(|| {
            Error::configuration(format!("Error handler {} not registered", options.handler))
        })?;

        let handler = factory(renderer());
        handler.validate(&options.handler_options)?;

        let handler_options = Arc::new(options.handler_options.clone());

        if options.shutdown_hook {
            let handler = Arc::clone(&handler);
            let handler_options = Arc::clone(&handler_options);
            let explicit_error = Arc::clone(&self.explicit_error);
            let last_error = Arc::clone(&self.last_error);
            registrar.on_shutdown(Box::new(move || {
                let failure = explicit_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                    .or_else(|| last_error.take());
                match failure {
                    Some(failure) => report(handler.as_ref(), failure, &handler_options),
                    None => debug!("No pending error at shutdown"),
                }
            }));
        }

        if options.exception_hook {
            let handler = Arc::clone(&handler);
            let handler_options = Arc::clone(&handler_options);
            registrar.on_exception(Arc::new(move |exception| {
                report(handler.as_ref(), Failure::from_exception(exception), &handler_options);
            }));
        }

        if options.error_hook {
            let handler = Arc::clone(&handler);
            let handler_options = Arc::clone(&handler_options);
            registrar.on_error(Arc::new(move |failure| {
                report(handler.as_ref(), failure, &handler_options);
            }));
        }

        debug!(
            handler = %options.handler,
            renderer = %renderer_name,
            shutdown = options.shutdown_hook,
            exception = options.exception_hook,
            error = options.error_hook,
            "Error hooks registered"
        );
        Ok(handler)
    }
}

fn report(handler: &dyn Handler, failure: Failure, options: &HandlerOptions) {
    if let Err(e) = handler.write_error(failure, options) {
        error!(error = %e, kind = ?e.kind, "Error handler failed");
    }
}
