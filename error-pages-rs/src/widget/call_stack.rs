//! Call stack widget.
//!
//! Lists the frames of the failure, outermost caller first when the stack is
//! captured live, each with its signature and a source excerpt. The page
//! first receives a placeholder that `postprocess` replaces with the list.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::callbacks::{Callbacks, Highlighter};
use crate::compositor::TemplateData;
use crate::context::StackFrame;
use crate::markup::escape_html;
use crate::options::lookup_ignore_case;
use crate::types::Result;
use crate::widget::{option_str, Widget, WidgetOptions, WidgetSeed};

/// Fragment template of the widget
pub const CALL_STACK_LAYOUT: &str = include_str!("../../layouts/call-stack.html");

/// Token rendered into the page in place of the list
pub const CALLSTACK_PLACEHOLDER: &str = "{CALLSTACK}";

/// Lines shown before and after each frame's line
pub const SOURCE_WINDOW: usize = 6;

/// Paths whose frames are dropped from a live capture
pub const INTERNAL_PATHS: &[&str] = &["error-pages-rs/src/", "/rustc/", "/.cargo/registry/"];

/// Renders the frames of the failure.
///
/// Options: `applicationPath` shortens displayed paths, `stackFunction`
/// names the live capture used when there is no exception, `internalPaths`
/// replaces the list of filtered directories.
pub struct CallStack {
    seed: WidgetSeed,
    callbacks: Arc<Callbacks>,
    trace: Vec<StackFrame>,
    application_path: Option<String>,
    call_stack: String,
}

impl CallStack {
    pub fn new(seed: WidgetSeed, callbacks: Arc<Callbacks>) -> Self {
        Self {
            seed,
            callbacks,
            trace: Vec::new(),
            application_path: None,
            call_stack: String::new(),
        }
    }

    /// Frames selected by `preprocess`
    pub fn frames(&self) -> &[StackFrame] {
        &self.trace
    }

    fn highlighter(&self) -> Highlighter {
        let name = self
            .seed
            .options
            .error_file_code
            .as_ref()
            .map_or("plain", |code| code.callback.as_str());

        self.callbacks
            .highlighter(name)
            .unwrap_or_else(|_| Arc::new(crate::highlight::plain))
    }

    fn display_path(&self, file: &str) -> String {
        let root = self
            .application_path
            .as_deref()
            .and_then(|path| Path::new(path).parent())
            .map(|parent| parent.display().to_string())
            .filter(|parent| !parent.is_empty() && parent != "/");

        match root {
            Some(root) if file.starts_with(&root) => format!(".{}", &file[root.len()..]),
            _ => file.to_string(),
        }
    }

    /// Renders the list and returns the placeholder
    pub fn render_call_stack(&mut self) -> String {
        let highlight = self.highlighter();
        let mut html = String::from("<ul class=\"call-stack\">");

        for (index, frame) in self.trace.iter().enumerate() {
            let path = frame
                .file
                .as_deref()
                .map(|file| self.display_path(file))
                .unwrap_or_default();
            let directory = Path::new(&path)
                .parent()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default();
            let basename = Path::new(&path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let line = frame.line.map(|l| l.to_string()).unwrap_or_default();

            html.push_str(&format!(
                "<li>{}. <em>{}/</em><strong>{}</strong>:{} \
                 <a href=\"#\" class=\"show-source\">source</a> ",
                index + 1,
                escape_html(&directory),
                escape_html(&basename),
                line
            ));

            if frame.arguments.is_empty() {
                html.push_str(&format!(
                    "<span class=\"side\">{}()</span>",
                    escape_html(&frame.callee())
                ));
            } else {
                html.push_str(&format!(
                    "<span class=\"side\">{}</span><div class=\"table args\"><table>",
                    escape_html(&frame.signature())
                ));
                for (arg_index, argument) in frame.arguments.iter().enumerate() {
                    html.push_str(&format!(
                        "<tr><td>#{}</td><td>{}</td></tr>",
                        arg_index,
                        escape_html(&argument.to_string())
                    ));
                }
                html.push_str("</table></div>");
            }

            if let (Some(file), Some(line)) = (&frame.file, frame.line) {
                html.push_str(&format!(
                    "<div class=\"code source\">{}</div>",
                    highlight(file, line, SOURCE_WINDOW, SOURCE_WINDOW)
                ));
            }

            html.push_str("</li>");
        }

        html.push_str("</ul>");
        self.call_stack = html;
        CALLSTACK_PLACEHOLDER.to_string()
    }

    fn live_trace(&self, options: &WidgetOptions) -> Option<Vec<StackFrame>> {
        let name = option_str(options, "stackFunction")?;
        let Some(capture) = self.callbacks.stack_function(name) else {
            debug!(stack_function = %name, "Stack function not registered");
            return None;
        };

        let internal: Vec<String> = match lookup_ignore_case(options, "internalPaths") {
            Some(Value::Array(paths)) => paths
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => INTERNAL_PATHS.iter().map(|p| p.to_string()).collect(),
        };

        let mut trace = capture();
        if !trace.is_empty() {
            trace.remove(0);
        }
        trace.reverse();
        trace.retain(|frame| {
            !frame
                .file
                .as_deref()
                .is_some_and(|file| internal.iter().any(|path| file.contains(path.as_str())))
        });

        Some(trace)
    }
}

impl TemplateData for CallStack {
    fn field(&mut self, name: &str) -> Result<Option<String>> {
        Ok(match name {
            "call-stack" => Some(self.render_call_stack()),
            _ => None,
        })
    }
}

impl Widget for CallStack {
    fn preprocess(&mut self, options: &WidgetOptions) -> Result<bool> {
        self.application_path = option_str(options, "applicationPath").map(str::to_string);

        self.trace = match &self.seed.exception {
            Some(exception) => exception.frames().to_vec(),
            None => match self.live_trace(options) {
                Some(trace) => trace,
                None => return Ok(true),
            },
        };

        Ok(self.trace.is_empty())
    }

    fn postprocess(&mut self, html: String) -> Result<String> {
        Ok(html.replace(CALLSTACK_PLACEHOLDER, &self.call_stack))
    }
}
