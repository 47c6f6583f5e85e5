//! Cross-module tests for the error page pipeline

pub mod pipeline_tests;

use std::sync::{Arc, Mutex};

use crate::callbacks::Callbacks;

/// Records written pages and terminator calls
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    written: Arc<Mutex<Vec<String>>>,
    terminated: Arc<Mutex<u32>>,
}

impl Recorder {
    /// Built-in callbacks plus a `record` write function and terminator
    pub(crate) fn callbacks(&self) -> Arc<Callbacks> {
        let mut callbacks = Callbacks::with_builtins();
        let written = Arc::clone(&self.written);
        callbacks.register_write_function("record", move |html| {
            written.lock().unwrap().push(html.to_string());
            Ok(())
        });
        let terminated = Arc::clone(&self.terminated);
        callbacks.register_terminator("record", move || {
            *terminated.lock().unwrap() += 1;
        });
        Arc::new(callbacks)
    }

    pub(crate) fn written(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }

    pub(crate) fn last(&self) -> String {
        self.written().pop().unwrap_or_default()
    }

    pub(crate) fn terminations(&self) -> u32 {
        *self.terminated.lock().unwrap()
    }
}
