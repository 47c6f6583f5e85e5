//! # Handler Options
//!
//! Configuration surface of the error handler, the public error page and the
//! composition root. Options deserialize from camelCase keys and every field
//! has a default, so a partial configuration is always usable.
//!
//! Callable options (write function, terminator, highlighter, widget objects,
//! renderer, handler) are names resolved through registries at setup.

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Result;

/// Default document type declaration
pub const DEFAULT_DOCTYPE: &str = "<!DOCTYPE html>";

/// Default title shown when no per-code override exists
pub const DEFAULT_ERROR_TITLE: &str = "Error";

/// Looks a key up exactly, then ignoring ASCII case.
///
/// The `config` crate may hand keys back lowercased.
pub fn lookup_ignore_case<'a, V>(map: impl IntoIterator<Item = (&'a String, &'a V)>, key: &str) -> Option<&'a V>
where
    V: 'a,
{
    let mut fallback = None;
    for (k, v) in map {
        if k == key {
            return Some(v);
        }
        if fallback.is_none() && k.eq_ignore_ascii_case(key) {
            fallback = Some(v);
        }
    }
    fallback
}

/// Reads `key`, falling back to its lowercased path.
///
/// Environment sources lowercase every key they collect, so camelCase options
/// set through `ERROR_PAGES__*` variables only exist in lowercase.
pub(crate) fn config_get<T: DeserializeOwned>(cfg: &config::Config, key: &str) -> Option<T> {
    match cfg.get::<T>(key) {
        Ok(value) => Some(value),
        Err(_) => {
            let lower = key.to_lowercase();
            if lower == key {
                return None;
            }
            cfg.get::<T>(&lower).ok()
        }
    }
}

/// `ERROR_PAGES__*` variables, `__` separating path segments
fn environment() -> config::Environment {
    config::Environment::with_prefix("ERROR_PAGES")
        .separator("__")
        .try_parsing(true)
}

/// Favicon link attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favicon {
    #[serde(rename = "type")]
    pub mime: String,
    pub href: String,
}

impl Favicon {
    pub fn new<M: Into<String>, H: Into<String>>(mime: M, href: H) -> Self {
        Self {
            mime: mime.into(),
            href: href.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AssetSource {
    List(Vec<Option<String>>),
    Named(IndexMap<String, Option<String>>),
}

/// Ordered asset references; empty entries are kept but never rendered
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "AssetSource")]
pub struct AssetList(Vec<Option<String>>);

impl From<AssetSource> for AssetList {
    fn from(source: AssetSource) -> Self {
        match source {
            AssetSource::List(list) => AssetList(list),
            AssetSource::Named(map) => AssetList(map.into_values().collect()),
        }
    }
}

impl<S: Into<String>> FromIterator<S> for AssetList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        AssetList(iter.into_iter().map(|s| Some(s.into())).collect())
    }
}

impl AssetList {
    /// Non-empty entries in configuration order
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter_map(|entry| entry.as_deref())
            .filter(|entry| !entry.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }
}

/// One or more markup blocks (literal markup or file paths)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptSource {
    One(String),
    Many(Vec<String>),
}

impl ScriptSource {
    pub fn values(&self) -> Vec<&str> {
        match self {
            ScriptSource::One(value) => vec![value.as_str()],
            ScriptSource::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for ScriptSource {
    fn from(value: &str) -> Self {
        ScriptSource::One(value.to_string())
    }
}

/// Options of the template compositor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderOptions {
    pub doctype: String,
    /// Layout path or literal markup
    pub layout: Option<String>,
    /// Named content blocks
    pub scripts: IndexMap<String, ScriptSource>,
    /// Binding data for the public page
    pub data: Option<Value>,
    pub favicon: Option<Favicon>,
    pub stylesheets: AssetList,
    pub javascripts: AssetList,
    pub title: Option<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            doctype: DEFAULT_DOCTYPE.to_string(),
            layout: None,
            scripts: IndexMap::new(),
            data: None,
            favicon: None,
            stylesheets: AssetList::default(),
            javascripts: AssetList::default(),
            title: None,
        }
    }
}

impl RenderOptions {
    /// Reads render keys below `prefix` (e.g. `"error_handler"`)
    fn read(cfg: &config::Config, prefix: &str) -> Self {
        let mut base = RenderOptions::default();
        let key = |name: &str| format!("{}.{}", prefix, name);

        if let Some(doctype) = config_get::<String>(cfg, &key("doctype")) {
            base.doctype = doctype;
        }
        if let Some(layout) = config_get::<String>(cfg, &key("layout")) {
            base.layout = Some(layout);
        }
        if let Some(scripts) = config_get::<IndexMap<String, ScriptSource>>(cfg, &key("scripts")) {
            base.scripts = scripts;
        }
        if let Some(data) = config_get::<Value>(cfg, &key("data")) {
            base.data = Some(data);
        }
        if let Some(favicon) = config_get::<Favicon>(cfg, &key("favicon")) {
            base.favicon = Some(favicon);
        }
        if let Some(stylesheets) = config_get::<AssetList>(cfg, &key("stylesheets")) {
            base.stylesheets = stylesheets;
        }
        if let Some(javascripts) = config_get::<AssetList>(cfg, &key("javascripts")) {
            base.javascripts = javascripts;
        }
        if let Some(title) = config_get::<String>(cfg, &key("title")) {
            base.title = Some(title);
        }

        base
    }
}

impl TryFrom<config::Config> for RenderOptions {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        Ok(RenderOptions::read(&cfg, "public_page"))
    }
}

/// Source excerpt window and highlighter name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorFileCode {
    pub callback: String,
    pub from: usize,
    pub to: usize,
}

impl Default for ErrorFileCode {
    fn default() -> Self {
        Self {
            callback: "plain".to_string(),
            from: 6,
            to: 6,
        }
    }
}

/// One configured widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetConfig {
    /// Registered widget factory name
    pub object: String,
    /// Fragment template path or literal markup
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub options: serde_json::Map<String, Value>,
    /// Resources injected into the widget, keyed by setter name
    #[serde(default)]
    pub inject: Option<serde_json::Map<String, Value>>,
}

impl WidgetConfig {
    pub fn new<S: Into<String>>(object: S) -> Self {
        Self {
            object: object.into(),
            script: None,
            options: serde_json::Map::new(),
            inject: None,
        }
    }

    pub fn script<S: Into<String>>(mut self, script: S) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn option<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn inject<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.inject
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }
}

/// Options of the error handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandlerOptions {
    pub disable: bool,
    /// Start-up event name
    pub error_start_up: String,
    /// Shutdown event name
    pub error_shut_down: String,
    /// Registered renderer name
    pub renderer: Option<String>,
    pub write_function: Option<String>,
    pub terminator: Option<String>,
    /// Page titles keyed by error code
    pub error_title: HashMap<String, String>,
    /// Name of the constant holding the page link URL
    pub url_constant: Option<String>,
    pub error_file_code: Option<ErrorFileCode>,
    /// Widgets in execution order
    pub widgets: IndexMap<String, WidgetConfig>,
    /// Skip depth keyed by exception class
    pub exception_trace_index: HashMap<String, usize>,
    /// Named values such as URLs or the application start time
    pub constants: HashMap<String, Value>,
    pub product: String,
    pub tagline: String,
    /// Unix time in seconds, set by the debug listener
    pub application_stop_time: Option<f64>,
    /// Peak memory in bytes, set by the debug listener.
    ///
    /// When probed rather than supplied, this is the highest resident size
    /// the process has observed, not the kernel's high-water mark.
    pub memory_peak: Option<u64>,
    #[serde(flatten)]
    pub render: RenderOptions,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            disable: false,
            error_start_up: "errorStartUp".to_string(),
            error_shut_down: "errorShutDown".to_string(),
            renderer: None,
            write_function: None,
            terminator: None,
            error_title: HashMap::new(),
            url_constant: None,
            error_file_code: None,
            widgets: IndexMap::new(),
            exception_trace_index: HashMap::new(),
            constants: HashMap::new(),
            product: "Phoenix ORCH".to_string(),
            tagline: "Error Handler".to_string(),
            application_stop_time: None,
            memory_peak: None,
            render: RenderOptions::default(),
        }
    }
}

impl HandlerOptions {
    /// Loads options from an optional file layered with `ERROR_PAGES__*` variables
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.as_ref()).required(true));
        }
        let cfg = builder.add_source(environment()).build()?;

        Ok(HandlerOptions::try_from(cfg)?)
    }

    /// Configured title for an error code
    pub fn title_for(&self, code: i64) -> &str {
        self.error_title
            .get(&code.to_string())
            .map(String::as_str)
            .unwrap_or(DEFAULT_ERROR_TITLE)
    }

    /// Named constant value
    pub fn constant(&self, name: &str) -> Option<&Value> {
        lookup_ignore_case(&self.constants, name)
    }

    /// Skip depth for an exception class
    pub fn skip_depth(&self, class: &str) -> usize {
        lookup_ignore_case(&self.exception_trace_index, class)
            .copied()
            .unwrap_or(0)
    }

    /// Adds a widget at the end of the execution order
    pub fn widget<S: Into<String>>(mut self, name: S, config: WidgetConfig) -> Self {
        self.widgets.insert(name.into(), config);
        self
    }
}

impl TryFrom<config::Config> for HandlerOptions {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        let mut base = HandlerOptions {
            render: RenderOptions::read(&cfg, "error_handler"),
            ..HandlerOptions::default()
        };

        if let Some(disable) = config_get::<bool>(&cfg, "error_handler.disable") {
            base.disable = disable;
        }
        if let Some(name) = config_get::<String>(&cfg, "error_handler.errorStartUp") {
            base.error_start_up = name;
        }
        if let Some(name) = config_get::<String>(&cfg, "error_handler.errorShutDown") {
            base.error_shut_down = name;
        }
        if let Some(renderer) = config_get::<String>(&cfg, "error_handler.renderer") {
            base.renderer = Some(renderer);
        }
        if let Some(write_function) = config_get::<String>(&cfg, "error_handler.writeFunction") {
            base.write_function = Some(write_function);
        }
        if let Some(terminator) = config_get::<String>(&cfg, "error_handler.terminator") {
            base.terminator = Some(terminator);
        }
        if let Some(titles) = config_get::<HashMap<String, String>>(&cfg, "error_handler.errorTitle") {
            base.error_title = titles;
        }
        if let Some(url_constant) = config_get::<String>(&cfg, "error_handler.urlConstant") {
            base.url_constant = Some(url_constant);
        }
        if let Some(file_code) = config_get::<ErrorFileCode>(&cfg, "error_handler.errorFileCode") {
            base.error_file_code = Some(file_code);
        }
        if let Some(widgets) = config_get::<IndexMap<String, WidgetConfig>>(&cfg, "error_handler.widgets") {
            base.widgets = widgets;
        }
        if let Some(index) = config_get::<HashMap<String, usize>>(&cfg, "error_handler.exceptionTraceIndex") {
            base.exception_trace_index = index;
        }
        if let Some(constants) = config_get::<HashMap<String, Value>>(&cfg, "error_handler.constants") {
            base.constants = constants;
        }
        if let Some(product) = config_get::<String>(&cfg, "error_handler.product") {
            base.product = product;
        }
        if let Some(tagline) = config_get::<String>(&cfg, "error_handler.tagline") {
            base.tagline = tagline;
        }

        Ok(base)
    }
}

/// Options of the composition root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorsOptions {
    /// Registered handler factory name
    pub handler: String,
    pub shutdown_hook: bool,
    pub exception_hook: bool,
    pub error_hook: bool,
    #[serde(flatten)]
    pub handler_options: HandlerOptions,
}

impl Default for ErrorsOptions {
    fn default() -> Self {
        Self {
            handler: "errorHandler".to_string(),
            shutdown_hook: false,
            exception_hook: false,
            error_hook: false,
            handler_options: HandlerOptions::default(),
        }
    }
}

impl TryFrom<config::Config> for ErrorsOptions {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        let mut base = ErrorsOptions::default();

        if let Some(handler) = config_get::<String>(&cfg, "errors.handler") {
            base.handler = handler;
        }
        if let Some(flag) = config_get::<bool>(&cfg, "errors.shutdownHook") {
            base.shutdown_hook = flag;
        }
        if let Some(flag) = config_get::<bool>(&cfg, "errors.exceptionHook") {
            base.exception_hook = flag;
        }
        if let Some(flag) = config_get::<bool>(&cfg, "errors.errorHook") {
            base.error_hook = flag;
        }
        base.handler_options = HandlerOptions::try_from(cfg)?;

        Ok(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = HandlerOptions::default();
        assert!(!options.disable);
        assert_eq!(options.error_start_up, "errorStartUp");
        assert_eq!(options.error_shut_down, "errorShutDown");
        assert_eq!(options.render.doctype, DEFAULT_DOCTYPE);
        assert_eq!(options.title_for(500), DEFAULT_ERROR_TITLE);
    }

    #[test]
    fn test_deserialize_camel_case() {
        let options: HandlerOptions = serde_json::from_value(json!({
            "disable": true,
            "errorTitle": { "500": "Fatal error" },
            "exceptionTraceIndex": { "QueryError": 2 },
            "widgets": {
                "bar": { "object": "devBar", "options": { "appTimeConstant": "START" } },
                "stack": { "object": "callStack" }
            },
            "stylesheets": ["/css/page.css", "", null],
            "javascripts": { "main": "/js/page.js", "off": null },
            "favicon": { "type": "image/png", "href": "/favicon.png" }
        }))
        .unwrap();

        assert!(options.disable);
        assert_eq!(options.title_for(500), "Fatal error");
        assert_eq!(options.skip_depth("QueryError"), 2);
        assert_eq!(options.widgets.keys().collect::<Vec<_>>(), vec!["bar", "stack"]);
        assert_eq!(options.render.stylesheets.entries().collect::<Vec<_>>(), vec!["/css/page.css"]);
        assert_eq!(options.render.javascripts.entries().collect::<Vec<_>>(), vec!["/js/page.js"]);
        assert_eq!(options.render.favicon.unwrap().mime, "image/png");
    }

    #[test]
    fn test_lookup_ignores_case() {
        let mut options = HandlerOptions::default();
        options.constants.insert("app_time".into(), json!(1.5));
        options.exception_trace_index.insert("queryerror".into(), 3);

        assert_eq!(options.constant("APP_TIME"), Some(&json!(1.5)));
        assert_eq!(options.skip_depth("QueryError"), 3);
        assert_eq!(options.skip_depth("Other"), 0);
    }

    #[test]
    fn test_script_source_forms() {
        let one: ScriptSource = serde_json::from_value(json!("<p>a</p>")).unwrap();
        let many: ScriptSource = serde_json::from_value(json!(["a.html", "b.html"])).unwrap();

        assert_eq!(one.values(), vec!["<p>a</p>"]);
        assert_eq!(many.values(), vec!["a.html", "b.html"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "error_handler": {{
                    "disable": true,
                    "doctype": "<!DOCTYPE html5>",
                    "errorTitle": {{ "404": "Not found" }},
                    "errorFileCode": {{ "callback": "rust", "from": 2, "to": 3 }},
                    "stylesheets": ["/a.css", "/b.css"]
                }}
            }}"#
        )
        .unwrap();

        let options = HandlerOptions::load(Some(file.path())).unwrap();
        assert!(options.disable);
        assert_eq!(options.render.doctype, "<!DOCTYPE html5>");
        assert_eq!(options.title_for(404), "Not found");
        let file_code = options.error_file_code.unwrap();
        assert_eq!((file_code.callback.as_str(), file_code.from, file_code.to), ("rust", 2, 3));
        assert_eq!(options.render.stylesheets.entries().count(), 2);
    }

    fn from_variables(vars: &[(&str, &str)]) -> config::Config {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Config::builder()
            .add_source(environment().source(Some(source)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_environment_layer_reads_camel_case_keys() {
        let cfg = from_variables(&[
            ("ERROR_PAGES__ERROR_HANDLER__EXCEPTIONTRACEINDEX__QUERYERROR", "2"),
            ("ERROR_PAGES__ERROR_HANDLER__WRITEFUNCTION", "stdout"),
            ("ERROR_PAGES__ERROR_HANDLER__ERRORTITLE__500", "Fatal error"),
            ("ERROR_PAGES__ERROR_HANDLER__URLCONSTANT", "URL"),
            ("ERROR_PAGES__ERRORS__ERRORHOOK", "true"),
        ]);

        let options = ErrorsOptions::try_from(cfg).unwrap();
        assert!(options.error_hook);
        assert!(!options.shutdown_hook);

        let handler = options.handler_options;
        assert_eq!(handler.skip_depth("QueryError"), 2);
        assert_eq!(handler.write_function.as_deref(), Some("stdout"));
        assert_eq!(handler.title_for(500), "Fatal error");
        assert_eq!(handler.url_constant.as_deref(), Some("URL"));
    }

    #[test]
    fn test_config_get_prefers_exact_key() {
        let cfg = config::Config::builder()
            .set_override("error_handler.writeFunction", "record")
            .unwrap()
            .set_override("error_handler.writefunction", "stdout")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(
            config_get::<String>(&cfg, "error_handler.writeFunction").as_deref(),
            Some("record")
        );
        assert!(config_get::<String>(&cfg, "error_handler.missing").is_none());
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = HandlerOptions::load(Some("/nonexistent/error-pages.toml")).unwrap_err();
        assert!(err.is_configuration());
    }
}
