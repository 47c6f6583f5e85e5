//! Developer bar: execution time, memory peak and the current route.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sysinfo::{ProcessesToUpdate, System};
use tracing::debug;

use crate::compositor::{TemplateCompositor, TemplateData};
use crate::host::HostRequestInfo;
use crate::markup::escape_html;
use crate::types::{Error, Result};
use crate::widget::{option_str, Dependency, Widget, WidgetOptions, WidgetSeed};

/// Fragment used when no `script` option is configured
pub const DEV_BAR_LAYOUT: &str = include_str!("../../layouts/dev-bar.html");

const BODY_CLOSE_TAG: &str = "</body>";
const MEGABYTE: f64 = 1_048_576.0;
const MILLISECONDS: f64 = 1000.0;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `75.26 ms` style metric
pub fn format_metric(value: f64, unit: &str) -> String {
    format!("{} {}", round2(value), unit)
}

/// Execution time between two Unix times given in seconds
pub fn execution_time(start: f64, stop: f64) -> String {
    format_metric((stop - start) * MILLISECONDS, "ms")
}

/// Memory in megabytes
pub fn memory(bytes: u64) -> String {
    format_metric(bytes as f64 / MEGABYTE, "MB")
}

/// Current Unix time in seconds
pub(crate) fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Highest resident memory any probe of this process has seen
static OBSERVED_PEAK: AtomicU64 = AtomicU64::new(0);

/// Approximates the memory peak in bytes.
///
/// `sysinfo` only reports current resident memory, so this is the highest
/// resident size observed by probes so far, 0 when unavailable.
pub(crate) fn probe_memory() -> u64 {
    let current = sysinfo::get_current_pid().ok().map_or(0, |pid| {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map_or(0, |process| process.memory())
    });
    OBSERVED_PEAK.fetch_max(current, Ordering::Relaxed).max(current)
}

/// Shows how long the application ran, its memory peak and the route.
///
/// Options: `appTimeConstant` names the constant holding the application
/// start time, `script` the fragment template.
pub struct DevBar {
    seed: WidgetSeed,
    script: String,
    application_time: f64,
    stop_time: Option<f64>,
    memory_peak: Option<u64>,
    request: Option<Arc<dyn HostRequestInfo>>,
}

impl DevBar {
    pub fn new(seed: WidgetSeed) -> Self {
        let stop_time = seed.options.application_stop_time;
        let memory_peak = seed.options.memory_peak;
        Self {
            seed,
            script: DEV_BAR_LAYOUT.to_string(),
            application_time: 0.0,
            stop_time,
            memory_peak,
            request: None,
        }
    }

    /// Sets the route source
    pub fn with_request(mut self, request: Arc<dyn HostRequestInfo>) -> Self {
        self.request = Some(request);
        self
    }

    pub fn execution_time(&mut self) -> String {
        let stop = *self.stop_time.get_or_insert_with(now_seconds);
        execution_time(self.application_time, stop)
    }

    pub fn memory_peak(&mut self) -> String {
        let bytes = *self.memory_peak.get_or_insert_with(probe_memory);
        memory(bytes)
    }

    /// `module : controller : action`, empty without a request
    pub fn module_controller_action(&self) -> String {
        match &self.request {
            Some(request) => format!(
                "{} : {} : {}",
                request.module(),
                request.controller(),
                request.action()
            ),
            None => String::new(),
        }
    }

    /// One-line summary with the spaces inside each part removed
    pub fn overall_performance(&mut self) -> String {
        format!(
            "{} {} | {}",
            self.execution_time().replace(' ', ""),
            self.memory_peak().replace(' ', ""),
            self.module_controller_action().replace(' ', "")
        )
    }
}

impl TemplateData for DevBar {
    fn field(&mut self, name: &str) -> Result<Option<String>> {
        let value = match name {
            "execution-time" => self.execution_time(),
            "memory-peak" => self.memory_peak(),
            "module-controller-action" => self.module_controller_action(),
            _ => return Ok(None),
        };
        Ok(Some(escape_html(&value)))
    }
}

impl Widget for DevBar {
    fn preprocess(&mut self, options: &WidgetOptions) -> Result<bool> {
        if let Some(script) = option_str(options, "script") {
            self.script = TemplateCompositor::new().load_source(script)?;
        }

        let constant = option_str(options, "appTimeConstant")
            .ok_or_else(|| Error::configuration("devBar requires the appTimeConstant option"))?;
        self.application_time = self
            .seed
            .options
            .constant(constant)
            .and_then(|value| value.as_f64())
            .ok_or_else(|| {
                Error::configuration(format!("Constant {} is not defined", constant))
                    .context("widget", "devBar")
            })?;

        Ok(false)
    }

    fn postprocess(&mut self, html: String) -> Result<String> {
        let script = self.script.clone();
        let Some(fragment) = TemplateCompositor::new().render_fragment(&script, self)? else {
            debug!("Developer bar fragment not rendered");
            return Ok(html);
        };
        Ok(html.replace(BODY_CLOSE_TAG, &format!("{}{}", fragment, BODY_CLOSE_TAG)))
    }

    fn inject(&mut self, setter: &str, dependency: Dependency) -> Result<()> {
        match (setter, dependency) {
            ("request" | "setRequest", Dependency::Request(request)) => {
                self.request = Some(request);
                Ok(())
            }
            (setter, dependency) => Err(Error::configuration(format!(
                "devBar cannot accept {:?} as {}",
                dependency, setter
            ))),
        }
    }
}
