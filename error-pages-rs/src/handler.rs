//! # Error Handler
//!
//! Single entry point for a failure. `write_error` builds the error context,
//! resolves the representative location, lets start-up listeners rewrite the
//! context, renders the page through the widget pipeline, lets shutdown
//! listeners rewrite the markup, writes it out and optionally terminates.
//!
//! Widget and listener faults are not guarded and propagate to the caller. A
//! caller that routes such a fault back into `write_error` re-enters the
//! handler while the first failure is still being reported.

use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, Local};
use tracing::{debug, info, warn};

use crate::callbacks::Callbacks;
use crate::compositor::TemplateData;
use crate::context::{ErrorContext, Exception, Failure};
use crate::events::{EventArgs, EventBus, NoEvents};
use crate::host::HostEnvironment;
use crate::logging;
use crate::markup::escape_html;
use crate::monitoring;
use crate::options::HandlerOptions;
use crate::renderer::{DefaultRenderer, PageSource, Renderer};
use crate::types::{Error, Result};
use crate::widget::{Injector, ResourceInjector, WidgetPipeline, WidgetRegistry, WidgetSeed};

/// Number of message characters kept in the page title
pub const TITLE_MESSAGE_CHARS: usize = 40;

/// Format of the generated time
pub const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Progress of one `write_error` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerState {
    Idle,
    ContextBuilt,
    Resolved,
    /// Rendering disabled or produced no output
    RenderSkipped,
    Rendered,
    Written,
    /// The terminator ran and returned
    Terminated,
}

impl fmt::Display for HandlerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Reports failures
pub trait Handler: Send + Sync {
    /// Reports one failure and returns the last state reached
    fn write_error(&self, failure: Failure, options: &HandlerOptions) -> Result<HandlerState>;

    /// Resolves every named callable of `options`
    fn validate(&self, options: &HandlerOptions) -> Result<()>;
}

/// The `Title... | TITLE | product | tagline` page title
pub fn page_title(message: &str, error_title: &str, product: &str, tagline: &str) -> String {
    let head: String = message.chars().take(TITLE_MESSAGE_CHARS).collect();
    format!(
        "{}... | {} | {} | {}",
        head,
        error_title.to_uppercase(),
        product,
        tagline
    )
}

/// Orchestrates the error page pipeline
pub struct ErrorHandler {
    renderer: Arc<dyn Renderer>,
    events: Arc<dyn EventBus>,
    /// Widget factories layered over the built-ins
    registry: WidgetRegistry,
    injector: Arc<dyn Injector>,
    callbacks: Arc<Callbacks>,
    host: HostEnvironment,
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("registry", &self.registry)
            .field("callbacks", &self.callbacks)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(Arc::new(DefaultRenderer::new()))
    }
}

impl ErrorHandler {
    /// Handler with built-in callbacks and widgets and no event listeners
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        let callbacks = Arc::new(Callbacks::with_builtins());
        Self {
            renderer,
            events: Arc::new(NoEvents),
            registry: WidgetRegistry::new(),
            injector: Arc::new(ResourceInjector::new()),
            callbacks,
            host: HostEnvironment::detect(),
        }
    }

    pub fn events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Widget factories; same-named built-ins are shadowed
    pub fn registry(mut self, registry: WidgetRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn injector(mut self, injector: Arc<dyn Injector>) -> Self {
        self.injector = injector;
        self
    }

    /// Replaces the named callables, built-in widgets included
    pub fn callbacks(mut self, callbacks: Arc<Callbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn host(mut self, host: HostEnvironment) -> Self {
        self.host = host;
        self
    }

    /// Built-in widgets bound to the current callbacks, then the registered ones
    fn widget_registry(&self) -> WidgetRegistry {
        let mut registry = WidgetRegistry::with_builtins(Arc::clone(&self.callbacks));
        registry.extend(&self.registry);
        registry
    }

    fn render(&self, context: &ErrorContext) -> Result<Option<String>> {
        let options = context.options();
        let seed = WidgetSeed::from_context(context);
        let registry = self.widget_registry();
        let mut pipeline =
            WidgetPipeline::build(&seed, &options.widgets, &registry, self.injector.as_ref())?;
        debug!(widgets = ?pipeline.names(), "Widgets preprocessed");

        let rendered = {
            let mut page = ErrorPage {
                context,
                host: &self.host,
                callbacks: &self.callbacks,
                renderer: self.renderer.as_ref(),
                pipeline: &mut pipeline,
            };
            self.renderer.render(&mut page, options)?
        };

        match rendered {
            Some(html) => Ok(Some(pipeline.postprocess(html)?)),
            None => Ok(None),
        }
    }
}

impl Handler for ErrorHandler {
    fn write_error(&self, failure: Failure, options: &HandlerOptions) -> Result<HandlerState> {
        monitoring::record_failure();

        let mut context = ErrorContext::new(failure, options.clone());
        debug!(incident = %context.incident(), state = %HandlerState::ContextBuilt, "Error context built");

        context.resolve_trace();
        debug!(file = %context.file(), line = context.line(), state = %HandlerState::Resolved, "Trace resolved");
        logging::log_failure(&context);

        let start_up = context.options().error_start_up.clone();
        self.events
            .fire(&start_up, &mut EventArgs::StartUp(context.start_up_args()))
            .map_err(|e| e.in_listener(&start_up))?;

        let mut html = String::new();
        let mut state = HandlerState::RenderSkipped;
        if context.options().disable {
            debug!("Rendering disabled");
        } else {
            match self.render(&context)? {
                Some(rendered) => {
                    html = rendered;
                    state = HandlerState::Rendered;
                }
                None => warn!(incident = %context.incident(), "Error page not rendered"),
            }
        }
        debug!(state = %state, bytes = html.len(), "Render step finished");

        let shut_down = context.options().error_shut_down.clone();
        self.events
            .fire(&shut_down, &mut EventArgs::ShutDown { html: &mut html })
            .map_err(|e| e.in_listener(&shut_down))?;

        if let Some(name) = &context.options().write_function {
            let write = self.callbacks.write_function(name)?;
            write(&html)?;
        }
        state = HandlerState::Written;

        if let Some(name) = &context.options().terminator {
            let terminate = self.callbacks.terminator(name)?;
            info!(incident = %context.incident(), terminator = %name, "Terminating after error page");
            terminate();
            state = HandlerState::Terminated;
        }

        Ok(state)
    }

    fn validate(&self, options: &HandlerOptions) -> Result<()> {
        self.widget_registry().validate(&options.widgets)?;

        if let Some(name) = &options.write_function {
            self.callbacks.write_function(name)?;
        }
        if let Some(name) = &options.terminator {
            self.callbacks.terminator(name)?;
        }
        if let Some(file_code) = &options.error_file_code {
            self.callbacks.highlighter(&file_code.callback)?;
        }
        if let Some(name) = &options.url_constant {
            options
                .constant(name)
                .ok_or_else(|| Error::configuration(format!("Constant {} is not defined", name)))?;
        }
        Ok(())
    }
}

/// Accessor surface the error page binds against
struct ErrorPage<'a> {
    context: &'a ErrorContext,
    host: &'a HostEnvironment,
    callbacks: &'a Callbacks,
    renderer: &'a dyn Renderer,
    pipeline: &'a mut WidgetPipeline,
}

impl ErrorPage<'_> {
    fn error_title(&self) -> &str {
        self.context.options().title_for(self.context.code())
    }

    fn error_note(&self) -> String {
        exception_note(self.context.exception())
    }

    fn error_page_url(&self) -> Result<String> {
        let options = self.context.options();
        let Some(name) = &options.url_constant else {
            return Ok(String::new());
        };
        let url = options
            .constant(name)
            .and_then(|value| value.as_str())
            .ok_or_else(|| Error::configuration(format!("Constant {} is not defined", name)))?;
        let url = escape_html(url);
        Ok(format!("<a href=\"{}\">{}</a>", url, url))
    }

    fn error_file_code(&self) -> Result<String> {
        let Some(file_code) = &self.context.options().error_file_code else {
            return Ok(String::new());
        };
        let highlight = self.callbacks.highlighter(&file_code.callback)?;
        Ok(highlight(
            self.context.file(),
            self.context.line(),
            file_code.from,
            file_code.to,
        ))
    }
}

impl TemplateData for ErrorPage<'_> {
    fn field(&mut self, name: &str) -> Result<Option<String>> {
        let value = match name {
            "error-title" => escape_html(self.error_title()),
            "error-code" => self.context.code().to_string(),
            "error-message" => escape_html(self.context.message()),
            "error-note" => escape_html(&self.error_note()),
            "error-file" => escape_html(self.context.file()),
            "error-line" => self.context.line().to_string(),
            "generated-time" => self
                .host
                .request_time
                .map(|time| time.format(DATE_FORMAT).to_string())
                .unwrap_or_default(),
            "error-page-url" => self.error_page_url()?,
            "runtime-version" => escape_html(&self.host.runtime_version),
            "server-info" => escape_html(self.host.server_software.as_deref().unwrap_or_default()),
            "product-version" => escape_html(&self.host.product_version),
            "current-year" => Local::now().year().to_string(),
            "error-file-code" => self.error_file_code()?,
            "widgets" => self.renderer.render_widgets(self.pipeline.active())?,
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

impl PageSource for ErrorPage<'_> {
    fn title(&self) -> String {
        let options = self.context.options();
        page_title(
            self.context.message(),
            self.error_title(),
            &options.product,
            &options.tagline,
        )
    }
}

/// Class of an exception as shown in notes
pub fn exception_note(exception: Option<&Exception>) -> String {
    exception
        .map(|exception| format!("({})", exception.class()))
        .unwrap_or_default()
}
