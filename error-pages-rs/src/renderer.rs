//! # Renderer
//!
//! Turns the error handler's accessor surface into a page and renders the
//! fragments of active widgets.

use tracing::error;

use crate::compositor::{Composition, TemplateCompositor, TemplateData};
use crate::monitoring;
use crate::options::HandlerOptions;
use crate::types::{ErrorKind, Result};
use crate::widget::WidgetSlot;

/// Layout used when none is configured
pub const ERROR_HANDLER_LAYOUT: &str = include_str!("../layouts/error-handler.html");

/// Binding surface of a page, plus its composite title
pub trait PageSource: TemplateData {
    fn title(&self) -> String;
}

/// Renders error pages
pub trait Renderer: Send + Sync {
    /// Composes the page; `Ok(None)` means nothing could be rendered
    fn render(&self, page: &mut dyn PageSource, options: &HandlerOptions) -> Result<Option<String>>;

    /// Concatenates the fragments of widgets that have a template
    fn render_widgets(&self, widgets: &mut [WidgetSlot]) -> Result<String>;
}

/// Renderer backed by the template compositor
#[derive(Debug, Clone, Default)]
pub struct DefaultRenderer {
    compositor: TemplateCompositor,
}

impl DefaultRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for DefaultRenderer {
    fn render(&self, page: &mut dyn PageSource, options: &HandlerOptions) -> Result<Option<String>> {
        let mut composition =
            match Composition::from_options(&self.compositor, &options.render, ERROR_HANDLER_LAYOUT) {
                Ok(composition) => composition,
                Err(e) if e.kind == ErrorKind::IO => {
                    error!(error = %e, "Error page templates unreadable");
                    monitoring::record_render_failure();
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
        composition.title = Some(page.title());

        self.compositor.compose(&composition, page)
    }

    fn render_widgets(&self, widgets: &mut [WidgetSlot]) -> Result<String> {
        let mut code = String::new();
        for slot in widgets.iter_mut() {
            let Some(script) = slot.script.clone() else {
                continue;
            };
            if let Some(fragment) = self.compositor.render_fragment(&script, slot)? {
                code.push_str(&fragment);
            }
        }
        Ok(code)
    }
}
