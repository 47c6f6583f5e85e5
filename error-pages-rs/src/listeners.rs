//! Built-in event listeners.
//!
//! Each function returns a listener ready for [`Events::listen`];
//! [`register_defaults`] wires them to the configured event names.

use std::sync::Arc;

use tracing::{error, warn};

use crate::context::Exception;
use crate::events::{EventArgs, Events, APPLICATION_ERROR};
use crate::options::HandlerOptions;
use crate::public_page::{PageOutcome, PublicErrorPage, Response};
use crate::types::Result;
use crate::widget::dev_bar::{now_seconds, probe_memory};

/// Class of the exception the public shutdown page is rendered for
pub const RUNTIME_EXCEPTION: &str = "RuntimeException";

/// Stamps the application stop time and memory peak unless already set
pub fn init_debug() -> impl Fn(&mut EventArgs<'_>) -> Result<()> + Send + Sync + 'static {
    |args: &mut EventArgs<'_>| {
        if let EventArgs::StartUp(fields) = args {
            fields.options.application_stop_time.get_or_insert_with(now_seconds);
            fields.options.memory_peak.get_or_insert_with(probe_memory);
        }
        Ok(())
    }
}

/// Logs the failure as start-up listeners left it
pub fn log_error() -> impl Fn(&mut EventArgs<'_>) -> Result<()> + Send + Sync + 'static {
    |args: &mut EventArgs<'_>| {
        if let EventArgs::StartUp(fields) = args {
            error!(
                code = *fields.code,
                message = %fields.message,
                file = %fields.file,
                line = *fields.line,
                "Application error reported"
            );
        }
        Ok(())
    }
}

/// Logs every exception of an application error
pub fn log_application_errors() -> impl Fn(&mut EventArgs<'_>) -> Result<()> + Send + Sync + 'static {
    |args: &mut EventArgs<'_>| {
        if let EventArgs::ApplicationError { exceptions } = args {
            for exception in exceptions.iter() {
                error!(class = %exception.class(), message = %exception.message(), "Application error");
            }
        }
        Ok(())
    }
}

/// Replaces the shutdown markup with the public error page.
///
/// The page is rendered for a synthetic runtime exception. When it cannot be
/// composed the markup is left as it was.
pub fn public_shut_down(
    page: Arc<PublicErrorPage>,
) -> impl Fn(&mut EventArgs<'_>) -> Result<()> + Send + Sync + 'static {
    move |args: &mut EventArgs<'_>| {
        if let EventArgs::ShutDown { html } = args {
            let mut response = Response::default().exception(Exception::new(RUNTIME_EXCEPTION, ""));
            match page.dispatch_loop_shutdown(&mut response)? {
                PageOutcome::Rendered => **html = response.body.unwrap_or_default(),
                outcome => warn!(?outcome, "Public error page not rendered"),
            }
        }
        Ok(())
    }
}

/// Registers the debug and logging listeners, and the public page when given
pub fn register_defaults(events: &Events, options: &HandlerOptions, page: Option<Arc<PublicErrorPage>>) {
    events.listen(options.error_start_up.clone(), init_debug());
    events.listen(options.error_start_up.clone(), log_error());
    events.listen(APPLICATION_ERROR, log_application_errors());
    if let Some(page) = page {
        events.listen(options.error_shut_down.clone(), public_shut_down(page));
    }
}
