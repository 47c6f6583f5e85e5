//! # Trace Resolution
//!
//! Picks the representative source location of an exception. An operator may
//! configure a skip depth per exception class so that the page blames a caller
//! some frames up instead of the shared code that raised the exception.

use std::collections::HashMap;

use tracing::debug;

use crate::context::Exception;
use crate::options::lookup_ignore_case;

/// Resolved location plus the exception used to resolve it
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrace {
    pub file: String,
    pub line: u32,
    pub exception: Exception,
}

/// Resolves file and line from an exception chain
#[derive(Debug, Clone, Copy)]
pub struct TraceResolver<'a> {
    skip_depth: &'a HashMap<String, usize>,
}

impl<'a> TraceResolver<'a> {
    /// Creates a resolver over skip depths keyed by exception class.
    ///
    /// Class names match exactly first, then ignoring ASCII case.
    pub fn new(skip_depth: &'a HashMap<String, usize>) -> Self {
        Self { skip_depth }
    }

    /// Returns `None` when no exception is supplied.
    ///
    /// A previous cause, when present, replaces the exception (one level only).
    /// With a skip depth `d > 0` the frames carrying a file are walked, the
    /// first of them is skipped and the frame at which the running count
    /// reaches `d` is adopted.
    pub fn resolve(&self, exception: Option<&Exception>) -> Option<ResolvedTrace> {
        let exception = exception?;
        let exception = exception.cause().unwrap_or(exception);

        let mut file = exception.file().to_string();
        let mut line = exception.line();

        let depth = lookup_ignore_case(self.skip_depth, exception.class())
            .copied()
            .unwrap_or(0);

        if depth > 0 {
            let mut count = 0;
            for frame in exception
                .frames()
                .iter()
                .filter(|frame| frame.file.is_some())
                .skip(1)
            {
                count += 1;
                if count >= depth {
                    if let Some(frame_file) = &frame.file {
                        file = frame_file.clone();
                    }
                    line = frame.line.unwrap_or(0);
                    break;
                }
            }

            debug!(
                class = %exception.class(),
                depth = depth,
                file = %file,
                line = line,
                "Applied exception trace index"
            );
        }

        Some(ResolvedTrace {
            file,
            line,
            exception: exception.clone(),
        })
    }
}
