//! Named callables referenced from configuration.
//!
//! Options name their write function, terminator, highlighter and stack
//! function; the names resolve here. An unknown name is a configuration error.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use crate::context::StackFrame;
use crate::highlight;
use crate::types::{Error, Result};

/// Writes the rendered page
pub type WriteFunction = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// Ends the process after the page is written
pub type Terminator = Arc<dyn Fn() + Send + Sync>;

/// Renders a source excerpt: file, line, lines before, lines after
pub type Highlighter = Arc<dyn Fn(&str, u32, usize, usize) -> String + Send + Sync>;

/// Captures the current call stack, innermost frame first
pub type StackFunction = Arc<dyn Fn() -> Vec<StackFrame> + Send + Sync>;

/// Exit status used by the `exit` terminator
pub const EXIT_STATUS: i32 = 255;

/// Registry of named callables
#[derive(Clone, Default)]
pub struct Callbacks {
    write_functions: HashMap<String, WriteFunction>,
    terminators: HashMap<String, Terminator>,
    highlighters: HashMap<String, Highlighter>,
    stack_functions: HashMap<String, StackFunction>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn names<V>(map: &HashMap<String, V>) -> Vec<&str> {
            let mut names: Vec<&str> = map.keys().map(String::as_str).collect();
            names.sort_unstable();
            names
        }

        f.debug_struct("Callbacks")
            .field("write_functions", &names(&self.write_functions))
            .field("terminators", &names(&self.terminators))
            .field("highlighters", &names(&self.highlighters))
            .field("stack_functions", &names(&self.stack_functions))
            .finish()
    }
}

impl Callbacks {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `stdout`/`stderr` writers, `exit`/`abort` terminators,
    /// `plain`/`rust` highlighters and the `backtrace` stack function
    pub fn with_builtins() -> Self {
        let mut callbacks = Self::new();
        callbacks
            .register_write_function("stdout", |html| {
                let mut out = io::stdout().lock();
                out.write_all(html.as_bytes())?;
                out.flush()?;
                Ok(())
            })
            .register_write_function("stderr", |html| {
                let mut out = io::stderr().lock();
                out.write_all(html.as_bytes())?;
                Ok(())
            })
            .register_terminator("exit", || std::process::exit(EXIT_STATUS))
            .register_terminator("abort", || std::process::abort())
            .register_highlighter("plain", highlight::plain)
            .register_highlighter("rust", highlight::rust)
            .register_stack_function("backtrace", StackFrame::capture);
        callbacks
    }

    pub fn register_write_function<S, F>(&mut self, name: S, f: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn(&str) -> Result<()> + Send + Sync + 'static,
    {
        self.write_functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn register_terminator<S, F>(&mut self, name: S, f: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn() + Send + Sync + 'static,
    {
        self.terminators.insert(name.into(), Arc::new(f));
        self
    }

    pub fn register_highlighter<S, F>(&mut self, name: S, f: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn(&str, u32, usize, usize) -> String + Send + Sync + 'static,
    {
        self.highlighters.insert(name.into(), Arc::new(f));
        self
    }

    pub fn register_stack_function<S, F>(&mut self, name: S, f: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn() -> Vec<StackFrame> + Send + Sync + 'static,
    {
        self.stack_functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn write_function(&self, name: &str) -> Result<WriteFunction> {
        self.write_functions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::configuration(format!("Write function {} is not callable", name)))
    }

    pub fn terminator(&self, name: &str) -> Result<Terminator> {
        self.terminators
            .get(name)
            .cloned()
            .ok_or_else(|| Error::configuration(format!("Terminator {} is not callable", name)))
    }

    pub fn highlighter(&self, name: &str) -> Result<Highlighter> {
        self.highlighters
            .get(name)
            .cloned()
            .ok_or_else(|| Error::configuration(format!("Highlighter {} is not callable", name)))
    }

    /// Stack functions are optional; `None` when the name is not registered
    pub fn stack_function(&self, name: &str) -> Option<StackFunction> {
        self.stack_functions.get(name).cloned()
    }
}
