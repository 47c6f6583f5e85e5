//! Host runtime collaborators: request naming and server identification.

use chrono::{DateTime, Local};

/// Route naming supplied by the host framework
pub trait HostRequestInfo: Send + Sync {
    fn module(&self) -> &str;
    fn controller(&self) -> &str;
    fn action(&self) -> &str;
}

/// Plain route naming
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub module: String,
    pub controller: String,
    pub action: String,
}

impl RequestInfo {
    pub fn new<M, C, A>(module: M, controller: C, action: A) -> Self
    where
        M: Into<String>,
        C: Into<String>,
        A: Into<String>,
    {
        Self {
            module: module.into(),
            controller: controller.into(),
            action: action.into(),
        }
    }
}

impl HostRequestInfo for RequestInfo {
    fn module(&self) -> &str {
        &self.module
    }

    fn controller(&self) -> &str {
        &self.controller
    }

    fn action(&self) -> &str {
        &self.action
    }
}

/// Facts about the running process shown on the error page
#[derive(Debug, Clone, PartialEq)]
pub struct HostEnvironment {
    pub runtime_version: String,
    pub server_software: Option<String>,
    /// When the current request started, if known
    pub request_time: Option<DateTime<Local>>,
    pub product_version: String,
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self::detect()
    }
}

impl HostEnvironment {
    /// Reads what the process can tell about itself
    pub fn detect() -> Self {
        let runtime_version = option_env!("CARGO_PKG_RUST_VERSION")
            .filter(|v| !v.is_empty())
            .map(|v| format!("rustc {}+", v))
            .unwrap_or_else(|| "rustc".to_string());

        Self {
            runtime_version,
            server_software: std::env::var("SERVER_SOFTWARE").ok(),
            request_time: None,
            product_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn request_time(mut self, time: DateTime<Local>) -> Self {
        self.request_time = Some(time);
        self
    }
}
