//! # Error Pages
//!
//! Error diagnostics and error page rendering for Phoenix ORCH services.
//!
//! ## Features
//!
//! - Failure snapshots with representative source locations resolved by a
//!   configurable skip depth per exception class
//! - Pluggable diagnostic widgets (developer bar, call stack)
//! - Two-stage template composition: content inlining, then field binding
//! - Lifecycle events whose listeners may rewrite the failure or the page
//! - Hook adapters for shutdown, uncaught exceptions and runtime errors
//! - A public, widget-less application error page
//!

pub mod types;
pub mod markup;
pub mod context;
pub mod trace;
pub mod options;
pub mod compositor;
pub mod renderer;
pub mod widget;
pub mod highlight;
pub mod callbacks;
pub mod events;
pub mod listeners;
pub mod handler;
pub mod hooks;
pub mod public_page;
pub mod host;
pub mod logging;
pub mod monitoring;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use types::{Error, ErrorKind, Result};
pub use context::{ErrorContext, Exception, Failure, StackFrame};
pub use trace::{ResolvedTrace, TraceResolver};
pub use options::{ErrorsOptions, HandlerOptions, RenderOptions, WidgetConfig};
pub use compositor::{TemplateCompositor, TemplateData};
pub use renderer::{DefaultRenderer, Renderer};
pub use widget::{Widget, WidgetPipeline, WidgetRegistry};
pub use callbacks::Callbacks;
pub use events::{EventArgs, EventBus, Events};
pub use handler::{ErrorHandler, Handler, HandlerState};
pub use hooks::{ErrorsResource, HookRegistrar, LastErrorSlot, ProcessHooks};
pub use public_page::{PageOutcome, PublicErrorPage};
pub use logging::{init_logging, LoggingConfig};

use tracing_appender::non_blocking::WorkerGuard;

/// Initializes logging with default settings
pub fn init() -> Result<Option<WorkerGuard>> {
    init_logging(LoggingConfig::default())
}

/// Initializes logging and reads the errors options from `config`
pub fn init_with_config(config: config::Config) -> Result<(ErrorsOptions, Option<WorkerGuard>)> {
    let logging = LoggingConfig::try_from(config.clone())?;
    let options = ErrorsOptions::try_from(config)?;
    let guard = init_logging(logging)?;
    Ok((options, guard))
}
