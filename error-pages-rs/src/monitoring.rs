//! Metrics emitted by the error page pipeline.
//!
//! Only the `metrics` facade is used; installing an exporter is left to the
//! host process.

use metrics::counter;

/// Counts one failure handed to the error handler
pub fn record_failure() {
    counter!("error_pages.failures", 1);
}

/// Counts one template composition that produced no output
pub fn record_render_failure() {
    counter!("error_pages.render_failures", 1);
}

/// Counts one widget that suppressed itself
pub fn record_widget_suppressed() {
    counter!("error_pages.widgets_suppressed", 1);
}

/// Counts one rendered public error page
pub fn record_public_page() {
    counter!("error_pages.public_pages", 1);
}
