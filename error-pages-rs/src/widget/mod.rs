//! # Widgets
//!
//! Pluggable diagnostic extensions run around the rendered error page.
//!
//! Widgets are declared in configuration by the name of a registered factory
//! and run in declaration order. Each one is built from the same snapshot of
//! the failure, may receive injected resources, and then decides in
//! `preprocess` whether it takes part. Active widgets contribute a fragment to
//! the page and post-process the final markup in turn.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::callbacks::Callbacks;
use crate::compositor::TemplateData;
use crate::context::{EnvironmentContext, ErrorContext, Exception};
use crate::host::HostRequestInfo;
use crate::monitoring;
use crate::options::{lookup_ignore_case, HandlerOptions, WidgetConfig};
use crate::types::{Error, Result};

pub mod call_stack;
pub mod dev_bar;

pub use call_stack::CallStack;
pub use dev_bar::DevBar;

/// Per-widget options from configuration
pub type WidgetOptions = serde_json::Map<String, Value>;

/// Reads a string option, tolerating keys lowercased by the config loader
pub fn option_str<'a>(options: &'a WidgetOptions, key: &str) -> Option<&'a str> {
    lookup_ignore_case(options, key).and_then(Value::as_str)
}

/// `devBar` and `callStack` configured with their bundled templates.
///
/// `app_time_constant` names the constant holding the application start time.
pub fn default_widgets(app_time_constant: &str) -> IndexMap<String, WidgetConfig> {
    let mut widgets = IndexMap::new();
    widgets.insert(
        "devBar".to_string(),
        WidgetConfig::new("devBar").option("appTimeConstant", Value::from(app_time_constant)),
    );
    widgets.insert(
        "callStack".to_string(),
        WidgetConfig::new("callStack")
            .script(call_stack::CALL_STACK_LAYOUT)
            .option("stackFunction", Value::from("backtrace")),
    );
    widgets
}

/// Data every widget is constructed with
#[derive(Debug, Clone)]
pub struct WidgetSeed {
    pub code: i64,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub environment: EnvironmentContext,
    pub options: HandlerOptions,
    pub exception: Option<Exception>,
}

impl WidgetSeed {
    pub fn from_context(context: &ErrorContext) -> Self {
        Self {
            code: context.code(),
            message: context.message().to_string(),
            file: context.file().to_string(),
            line: context.line(),
            environment: context.environment().clone(),
            options: context.options().clone(),
            exception: context.exception().cloned(),
        }
    }
}

/// A resource handed to a widget
#[derive(Clone)]
pub enum Dependency {
    Request(Arc<dyn HostRequestInfo>),
    Value(Value),
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Request(_) => f.write_str("Request"),
            Dependency::Value(value) => write!(f, "Value({})", value),
        }
    }
}

/// A diagnostic extension of the error page.
///
/// Template fields of the widget's fragment are answered through
/// [`TemplateData`].
pub trait Widget: TemplateData + Send {
    /// Returns `true` to suppress the widget
    fn preprocess(&mut self, options: &WidgetOptions) -> Result<bool>;

    /// Rewrites the rendered page
    fn postprocess(&mut self, html: String) -> Result<String> {
        Ok(html)
    }

    /// Receives a resource named by the widget's injection spec
    fn inject(&mut self, setter: &str, _dependency: Dependency) -> Result<()> {
        Err(Error::configuration(format!(
            "Widget does not accept injected resource {}",
            setter
        )))
    }
}

/// Builds a widget from the failure snapshot
pub type WidgetFactory = Arc<dyn Fn(WidgetSeed) -> Box<dyn Widget> + Send + Sync>;

/// Named widget factories
#[derive(Clone, Default)]
pub struct WidgetRegistry {
    factories: HashMap<String, WidgetFactory>,
}

impl fmt::Debug for WidgetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("WidgetRegistry").field("factories", &names).finish()
    }
}

impl WidgetRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `devBar` and `callStack`
    pub fn with_builtins(callbacks: Arc<Callbacks>) -> Self {
        let mut registry = Self::new();
        registry.register("devBar", |seed| Box::new(DevBar::new(seed)));
        registry.register("callStack", move |seed| {
            Box::new(CallStack::new(seed, Arc::clone(&callbacks)))
        });
        registry
    }

    /// Registers a factory, replacing any previous one with the same name
    pub fn register<S, F>(&mut self, name: S, factory: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn(WidgetSeed) -> Box<dyn Widget> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Copies the factories of `other`, replacing same-named ones
    pub fn extend(&mut self, other: &WidgetRegistry) -> &mut Self {
        for (name, factory) in &other.factories {
            self.factories.insert(name.clone(), Arc::clone(factory));
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Fails on the first widget whose object is not registered
    pub fn validate(&self, widgets: &IndexMap<String, WidgetConfig>) -> Result<()> {
        for (name, config) in widgets {
            if !self.contains(&config.object) {
                return Err(Error::configuration(format!(
                    "Widget class {} not registered",
                    config.object
                ))
                .context("widget", name));
            }
        }
        Ok(())
    }

    /// Builds a widget by factory name
    pub fn instantiate(&self, object: &str, seed: WidgetSeed) -> Result<Box<dyn Widget>> {
        let factory = self.factories.get(object).ok_or_else(|| {
            Error::configuration(format!("Widget class {} not registered", object))
        })?;
        Ok(factory(seed))
    }
}

/// Resolves injection specs into dependencies
pub trait Injector: Send + Sync {
    /// Applies every `setter: resource` pair of `spec` to the widget
    fn inject(&self, widget: &mut dyn Widget, spec: &serde_json::Map<String, Value>) -> Result<()>;
}

/// Injects the current request and named values
#[derive(Clone, Default)]
pub struct ResourceInjector {
    request: Option<Arc<dyn HostRequestInfo>>,
    resources: HashMap<String, Value>,
}

impl ResourceInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resource named `request`
    pub fn request(mut self, request: Arc<dyn HostRequestInfo>) -> Self {
        self.request = Some(request);
        self
    }

    /// Adds a named value resource
    pub fn resource<S: Into<String>>(mut self, name: S, value: Value) -> Self {
        self.resources.insert(name.into(), value);
        self
    }
}

impl Injector for ResourceInjector {
    fn inject(&self, widget: &mut dyn Widget, spec: &serde_json::Map<String, Value>) -> Result<()> {
        for (setter, resource) in spec {
            let resource = resource.as_str().unwrap_or(setter.as_str());

            let dependency = if resource == "request" {
                match &self.request {
                    Some(request) => Dependency::Request(Arc::clone(request)),
                    None => {
                        debug!(setter = %setter, "No request to inject");
                        continue;
                    }
                }
            } else {
                let value = self.resources.get(resource).ok_or_else(|| {
                    Error::configuration(format!("Unknown resource {}", resource))
                        .context("setter", setter)
                })?;
                Dependency::Value(value.clone())
            };

            widget.inject(setter, dependency)?;
        }
        Ok(())
    }
}

/// A widget that survived preprocessing
pub struct WidgetSlot {
    pub name: String,
    /// Fragment template, if configured
    pub script: Option<String>,
    pub widget: Box<dyn Widget>,
}

impl TemplateData for WidgetSlot {
    fn field(&mut self, name: &str) -> Result<Option<String>> {
        self.widget.field(name).map_err(|e| e.in_widget(&self.name))
    }
}

impl fmt::Debug for WidgetSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetSlot")
            .field("name", &self.name)
            .field("script", &self.script)
            .finish_non_exhaustive()
    }
}

/// Active widgets of one failure, in configuration order
#[derive(Debug, Default)]
pub struct WidgetPipeline {
    slots: Vec<WidgetSlot>,
}

impl WidgetPipeline {
    /// Instantiates, injects and preprocesses the configured widgets.
    ///
    /// Unknown widget names fail before any widget runs. Suppressed widgets
    /// are dropped.
    pub fn build(
        seed: &WidgetSeed,
        widgets: &IndexMap<String, WidgetConfig>,
        registry: &WidgetRegistry,
        injector: &dyn Injector,
    ) -> Result<Self> {
        registry.validate(widgets)?;

        let mut slots = Vec::new();
        for (name, config) in widgets {
            let mut widget = registry.instantiate(&config.object, seed.clone())?;

            if let Some(spec) = &config.inject {
                injector
                    .inject(widget.as_mut(), spec)
                    .map_err(|e| e.in_widget(name))?;
            }

            let mut options = config.options.clone();
            if let Some(script) = &config.script {
                options
                    .entry("script")
                    .or_insert_with(|| Value::String(script.clone()));
            }

            if widget.preprocess(&options).map_err(|e| e.in_widget(name))? {
                debug!(widget = %name, "Widget suppressed");
                monitoring::record_widget_suppressed();
                continue;
            }

            slots.push(WidgetSlot {
                name: name.clone(),
                script: config.script.clone(),
                widget,
            });
        }

        Ok(Self { slots })
    }

    pub fn active(&mut self) -> &mut [WidgetSlot] {
        &mut self.slots
    }

    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.name.as_str()).collect()
    }

    /// Feeds the page through every active widget in order
    pub fn postprocess(&mut self, html: String) -> Result<String> {
        let mut html = html;
        for slot in &mut self.slots {
            html = slot
                .widget
                .postprocess(html)
                .map_err(|e| e.in_widget(&slot.name))?;
        }
        Ok(html)
    }
}
