//! # Error Context
//!
//! Immutable snapshot of one failure occurrence, the exception chain that may
//! have caused it and the call stack frames it carries.

use std::fmt;
use std::panic::PanicHookInfo;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::StartUpArgs;
use crate::options::HandlerOptions;
use crate::trace::TraceResolver;

/// Ambient variables captured with a failure
pub type EnvironmentContext = serde_json::Map<String, serde_json::Value>;

static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->|</?[A-Za-z!?][^>]*>").expect("static regex"));

/// Removes markup tags from a message
pub fn strip_tags(message: &str) -> String {
    TAG_PATTERN.replace_all(message, "").into_owned()
}

/// How a frame's function was called
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallType {
    /// Associated function, rendered `::`
    Static,
    /// Method on an instance, rendered `->`
    Instance,
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallType::Static => write!(f, "::"),
            CallType::Instance => write!(f, "->"),
        }
    }
}

/// An argument captured with a stack frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameArgument {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Opaque object reference, rendered by type name only
    Object { type_name: String },
}

impl FrameArgument {
    /// Creates an opaque object argument
    pub fn object<S: Into<String>>(type_name: S) -> Self {
        FrameArgument::Object {
            type_name: type_name.into(),
        }
    }
}

impl fmt::Display for FrameArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameArgument::Null => write!(f, "null"),
            FrameArgument::Bool(b) => write!(f, "{}", b),
            FrameArgument::Int(i) => write!(f, "{}", i),
            FrameArgument::Float(x) => write!(f, "{}", x),
            FrameArgument::Str(s) => write!(f, "{}", s),
            FrameArgument::Object { type_name } => write!(f, "{}", type_name),
        }
    }
}

/// One frame of a captured call stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
    pub class: Option<String>,
    pub call_type: Option<CallType>,
    #[serde(default)]
    pub arguments: Vec<FrameArgument>,
}

impl StackFrame {
    /// Creates an empty frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source location
    pub fn at<S: Into<String>>(mut self, file: S, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// Sets the function name
    pub fn function<S: Into<String>>(mut self, function: S) -> Self {
        self.function = Some(function.into());
        self
    }

    /// Sets the owning type and call type
    pub fn method<S: Into<String>>(mut self, class: S, call_type: CallType) -> Self {
        self.class = Some(class.into());
        self.call_type = Some(call_type);
        self
    }

    /// Appends an argument
    pub fn argument(mut self, argument: FrameArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    /// `Class<call-type>function`, or just the function name
    pub fn callee(&self) -> String {
        let function = self.function.as_deref().unwrap_or_default();
        match &self.class {
            Some(class) => format!(
                "{}{}{}",
                class,
                self.call_type.unwrap_or(CallType::Instance),
                function
            ),
            None => function.to_string(),
        }
    }

    /// `Class<call-type>function(arg, arg)`
    pub fn signature(&self) -> String {
        let args: Vec<String> = self.arguments.iter().map(ToString::to_string).collect();
        format!("{}({})", self.callee(), args.join(", "))
    }

    /// Captures the current call stack, innermost frame first
    pub fn capture() -> Vec<StackFrame> {
        let backtrace = backtrace::Backtrace::new();
        let mut frames = Vec::new();

        for frame in backtrace.frames() {
            for symbol in frame.symbols() {
                let mut stack_frame = StackFrame {
                    file: symbol.filename().map(|p| p.display().to_string()),
                    line: symbol.lineno(),
                    ..StackFrame::default()
                };

                if let Some(name) = symbol.name() {
                    let name = format!("{:#}", name);
                    match name.rsplit_once("::") {
                        Some((class, function)) => {
                            stack_frame.class = Some(class.to_string());
                            stack_frame.call_type = Some(CallType::Static);
                            stack_frame.function = Some(function.to_string());
                        }
                        None => stack_frame.function = Some(name),
                    }
                }

                frames.push(stack_frame);
            }
        }

        frames
    }
}

/// An exception, optionally wrapping the previous cause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    class: String,
    message: String,
    code: i64,
    file: String,
    line: u32,
    #[serde(default)]
    trace: Vec<StackFrame>,
    previous: Option<Box<Exception>>,
}

impl Exception {
    /// Creates an exception of the given concrete class
    pub fn new<C: Into<String>, M: Into<String>>(class: C, message: M) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            code: 0,
            file: String::new(),
            line: 0,
            trace: Vec::new(),
            previous: None,
        }
    }

    /// Builds an exception from a panic
    pub fn from_panic(info: &PanicHookInfo<'_>) -> Self {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Box<dyn Any>".to_string());

        let mut exception = Exception::new("panic", message);
        if let Some(location) = info.location() {
            exception = exception.at(location.file(), location.line());
        }
        exception.trace(StackFrame::capture())
    }

    /// Sets the error code
    pub fn code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    /// Sets the throw site
    pub fn at<S: Into<String>>(mut self, file: S, line: u32) -> Self {
        self.file = file.into();
        self.line = line;
        self
    }

    /// Sets the captured call stack
    pub fn trace(mut self, trace: Vec<StackFrame>) -> Self {
        self.trace = trace;
        self
    }

    /// Wraps a previous cause
    pub fn previous(mut self, previous: Exception) -> Self {
        self.previous = Some(Box::new(previous));
        self
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error_code(&self) -> i64 {
        self.code
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.trace
    }

    pub fn cause(&self) -> Option<&Exception> {
        self.previous.as_deref()
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} in {}:{}", self.class, self.message, self.file, self.line)
    }
}

/// A failure normalized by a hook adapter, as handed to `write_error`
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub code: i64,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub environment: EnvironmentContext,
    pub exception: Option<Exception>,
}

impl Failure {
    /// Creates a failure with no location
    pub fn new<S: Into<String>>(code: i64, message: S) -> Self {
        Self {
            code,
            message: message.into(),
            file: String::new(),
            line: 0,
            environment: EnvironmentContext::new(),
            exception: None,
        }
    }

    /// Normalizes an uncaught exception
    pub fn from_exception(exception: Exception) -> Self {
        Self {
            code: exception.error_code(),
            message: exception.message().to_string(),
            file: exception.file().to_string(),
            line: exception.line(),
            environment: EnvironmentContext::new(),
            exception: Some(exception),
        }
    }

    /// Sets the reported location
    pub fn at<S: Into<String>>(mut self, file: S, line: u32) -> Self {
        self.file = file.into();
        self.line = line;
        self
    }

    /// Sets the ambient variables
    pub fn environment(mut self, environment: EnvironmentContext) -> Self {
        self.environment = environment;
        self
    }

    /// Attaches the exception that caused the failure
    pub fn exception(mut self, exception: Exception) -> Self {
        self.exception = Some(exception);
        self
    }
}

/// Snapshot of one failure; only start-up listeners may rewrite its fields
#[derive(Debug, Clone)]
pub struct ErrorContext {
    incident: Uuid,
    code: i64,
    message: String,
    file: String,
    line: u32,
    environment: EnvironmentContext,
    exception: Option<Exception>,
    options: HandlerOptions,
}

impl ErrorContext {
    /// Builds the snapshot, stripping tags from the message
    pub fn new(failure: Failure, options: HandlerOptions) -> Self {
        Self {
            incident: Uuid::new_v4(),
            code: failure.code,
            message: strip_tags(&failure.message),
            file: failure.file,
            line: failure.line,
            environment: failure.environment,
            exception: failure.exception,
            options,
        }
    }

    /// Refines file, line and exception with the trace resolver
    pub fn resolve_trace(&mut self) {
        let resolver = TraceResolver::new(&self.options.exception_trace_index);
        match resolver.resolve(self.exception.as_ref()) {
            Some(resolved) => {
                self.file = resolved.file;
                self.line = resolved.line;
                self.exception = Some(resolved.exception);
            }
            None => self.exception = None,
        }
    }

    /// Mutable views handed to start-up listeners
    pub fn start_up_args(&mut self) -> StartUpArgs<'_> {
        StartUpArgs {
            code: &mut self.code,
            message: &mut self.message,
            file: &mut self.file,
            line: &mut self.line,
            environment: &mut self.environment,
            options: &mut self.options,
        }
    }

    pub fn incident(&self) -> Uuid {
        self.incident
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn environment(&self) -> &EnvironmentContext {
        &self.environment
    }

    pub fn exception(&self) -> Option<&Exception> {
        self.exception.as_ref()
    }

    pub fn options(&self) -> &HandlerOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tags() {
        assert_eq!(
            strip_tags("<b>Could not</b> connect to <a href=\"#\">database</a>"),
            "Could not connect to database"
        );
        assert_eq!(strip_tags("1 < 2 and 3 > 2"), "1 < 2 and 3 > 2");
        assert_eq!(strip_tags("a<!-- hidden -->b"), "ab");
    }

    #[test]
    fn test_frame_signature() {
        let frame = StackFrame::new()
            .at("/srv/app/src/db.rs", 42)
            .function("connect")
            .method("Database", CallType::Instance)
            .argument(FrameArgument::Str("localhost".into()))
            .argument(FrameArgument::Int(5432))
            .argument(FrameArgument::object("Pool"));

        assert_eq!(frame.signature(), "Database->connect(localhost, 5432, Pool)");

        let plain = StackFrame::new().function("main");
        assert_eq!(plain.signature(), "main()");
    }

    #[test]
    fn test_context_strips_message_tags() {
        let failure = Failure::new(1, "<p>Disk <em>full</em></p>").at("/srv/app/src/io.rs", 7);
        let ctx = ErrorContext::new(failure, HandlerOptions::default());

        assert_eq!(ctx.message(), "Disk full");
        assert_eq!(ctx.file(), "/srv/app/src/io.rs");
        assert_eq!(ctx.line(), 7);
        assert!(ctx.exception().is_none());
    }

    #[test]
    fn test_resolve_trace_uses_cause() {
        let cause = Exception::new("IoError", "denied").at("/srv/app/src/fs.rs", 10);
        let outer = Exception::new("StorageError", "write failed")
            .at("/srv/app/src/store.rs", 99)
            .previous(cause);

        let mut ctx = ErrorContext::new(
            Failure::from_exception(outer),
            HandlerOptions::default(),
        );
        ctx.resolve_trace();

        assert_eq!(ctx.file(), "/srv/app/src/fs.rs");
        assert_eq!(ctx.line(), 10);
        assert_eq!(ctx.exception().map(Exception::class), Some("IoError"));
    }

    #[test]
    fn test_resolve_trace_folds_class_case() {
        let frames = (1..=4)
            .map(|n| StackFrame::new().at(format!("/srv/app/src/frame{}.rs", n), n))
            .collect();
        let exception = Exception::new("QueryError", "timeout")
            .at("/srv/app/src/db.rs", 12)
            .trace(frames);

        let mut options = HandlerOptions::default();
        options.exception_trace_index.insert("queryerror".into(), 2);
        let mut ctx = ErrorContext::new(Failure::from_exception(exception), options);
        ctx.resolve_trace();

        assert_eq!(ctx.file(), "/srv/app/src/frame3.rs");
        assert_eq!(ctx.line(), 3);
    }

    #[test]
    fn test_capture_returns_frames() {
        let frames = StackFrame::capture();
        assert!(!frames.is_empty());
    }
}
