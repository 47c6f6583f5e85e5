//! # Public Error Page
//!
//! Branded application error page shown to visitors. It has no widgets: the
//! layout, content blocks and assets come from [`RenderOptions`] and fields
//! bind against the configured `data` object.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::compositor::{Composition, TemplateCompositor};
use crate::context::Exception;
use crate::events::{EventArgs, EventBus, NoEvents, APPLICATION_ERROR};
use crate::monitoring;
use crate::options::RenderOptions;
use crate::types::{ErrorKind, Result};

/// Layout used when none is configured
pub const APPLICATION_LAYOUT: &str = include_str!("../layouts/application.html");

/// Status the host treats as "page not found"
pub const NOT_FOUND: u16 = 404;

/// Status set on a rendered error page
pub const INTERNAL_SERVER_ERROR: u16 = 500;

/// Response of the host framework
pub trait HostResponse {
    /// Whether the dispatch loop recorded exceptions
    fn is_exception(&self) -> bool;
    fn status(&self) -> u16;
    fn set_status(&mut self, status: u16);
    fn exceptions(&self) -> &[Exception];
    fn set_body(&mut self, body: String);
}

/// Plain response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub exceptions: Vec<Exception>,
    pub body: Option<String>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            exceptions: Vec::new(),
            body: None,
        }
    }
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn exception(mut self, exception: Exception) -> Self {
        self.exceptions.push(exception);
        self
    }
}

impl HostResponse for Response {
    fn is_exception(&self) -> bool {
        !self.exceptions.is_empty()
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    fn exceptions(&self) -> &[Exception] {
        &self.exceptions
    }

    fn set_body(&mut self, body: String) {
        self.body = Some(body);
    }
}

/// Result of [`PublicErrorPage::dispatch_loop_shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Not an application error; the response is untouched
    Skipped,
    /// Composition failed and was logged; the response is untouched
    Failed,
    /// Body replaced and status set to 500
    Rendered,
}

/// Renders the public application error page
pub struct PublicErrorPage {
    options: RenderOptions,
    events: Arc<dyn EventBus>,
    compositor: TemplateCompositor,
}

impl PublicErrorPage {
    pub fn new(options: RenderOptions) -> Self {
        Self {
            options,
            events: Arc::new(NoEvents),
            compositor: TemplateCompositor::new(),
        }
    }

    pub fn events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Composes the page after announcing the exceptions.
    ///
    /// `Ok(None)` means the templates could not be composed.
    pub fn render(&self, exceptions: &[Exception]) -> Result<Option<String>> {
        self.events
            .fire(APPLICATION_ERROR, &mut EventArgs::ApplicationError { exceptions })
            .map_err(|e| e.in_listener(APPLICATION_ERROR))?;

        let composition = match Composition::from_options(&self.compositor, &self.options, APPLICATION_LAYOUT) {
            Ok(composition) => composition,
            Err(e) if e.kind == ErrorKind::IO => {
                error!(error = %e, "Public error page templates unreadable");
                monitoring::record_render_failure();
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut data = self
            .options
            .data
            .clone()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        self.compositor.compose(&composition, &mut data)
    }

    /// Replaces the body of an exceptional response with the error page.
    ///
    /// A 404 carrying exactly one exception is a missing page, not an
    /// application error, and is skipped after the event fired.
    pub fn dispatch_loop_shutdown(&self, response: &mut dyn HostResponse) -> Result<PageOutcome> {
        if !response.is_exception() {
            return Ok(PageOutcome::Skipped);
        }

        let not_found = response.status() == NOT_FOUND && response.exceptions().len() == 1;
        if not_found {
            self.events
                .fire(
                    APPLICATION_ERROR,
                    &mut EventArgs::ApplicationError {
                        exceptions: response.exceptions(),
                    },
                )
                .map_err(|e| e.in_listener(APPLICATION_ERROR))?;
            debug!("Page not found; public error page skipped");
            return Ok(PageOutcome::Skipped);
        }

        match self.render(response.exceptions())? {
            Some(html) => {
                response.set_status(INTERNAL_SERVER_ERROR);
                response.set_body(html);
                monitoring::record_public_page();
                info!(status = INTERNAL_SERVER_ERROR, "Public error page rendered");
                Ok(PageOutcome::Rendered)
            }
            None => Ok(PageOutcome::Failed),
        }
    }
}
