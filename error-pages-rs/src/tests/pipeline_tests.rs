//! Full pipeline tests: handler, widgets, renderer and compositor together

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use chrono::{Local, TimeZone};
    use serde_json::json;

    use crate::context::{Exception, Failure, StackFrame};
    use crate::events::{EventArgs, Events};
    use crate::handler::{ErrorHandler, Handler, HandlerState};
    use crate::host::{HostEnvironment, RequestInfo};
    use crate::listeners;
    use crate::options::{ErrorFileCode, Favicon, HandlerOptions, RenderOptions, WidgetConfig};
    use crate::public_page::PublicErrorPage;
    use crate::tests::Recorder;
    use crate::compositor::TemplateData;
    use crate::types::{Error, ErrorKind, Result};
    use crate::widget::tests::{spy_registry, SpyLog};
    use crate::widget::{default_widgets, ResourceInjector, Widget, WidgetOptions, WidgetRegistry};

    fn options() -> HandlerOptions {
        HandlerOptions {
            write_function: Some("record".into()),
            ..HandlerOptions::default()
        }
    }

    fn host() -> HostEnvironment {
        HostEnvironment {
            runtime_version: "rustc 1.81+".into(),
            server_software: Some("phoenix-gateway".into()),
            request_time: None,
            product_version: "0.1.0".into(),
        }
    }

    fn query_failure() -> Failure {
        let exception = Exception::new("QueryError", "timeout")
            .at("/srv/app/src/db.rs", 12)
            .trace(vec![
                StackFrame::new().at("/srv/app/src/db.rs", 12).function("query"),
                StackFrame::new().at("/srv/app/src/main.rs", 3).function("main"),
            ]);
        Failure::new(500, "Could not connect to database server").exception(exception)
    }

    #[test]
    fn test_suppressed_widget_is_invisible_on_the_page() {
        let recorder = Recorder::default();
        let log = SpyLog::default();
        let handler = ErrorHandler::default()
            .registry(spy_registry(&log))
            .callbacks(recorder.callbacks())
            .host(host());
        let options = options()
            .widget("quiet", WidgetConfig::new("quiet").script("<i class=\"spy\"></i>"))
            .widget("spy", WidgetConfig::new("spy").script("<b class=\"spy\"></b>"));

        let state = handler.write_error(Failure::new(1, "boom"), &options).unwrap();
        assert_eq!(state, HandlerState::Written);

        let html = recorder.last();
        assert!(html.contains("<div class=\"widgets\"><b class=\"spy\">active</b></div>"));
        assert!(!html.contains("quiet"));
        assert!(html.ends_with("[active]"));
        assert_eq!(
            log.entries(),
            vec!["preprocess quiet", "preprocess active", "postprocess active"]
        );
    }

    #[test]
    fn test_default_widgets_decorate_the_page() {
        let recorder = Recorder::default();
        let injector = ResourceInjector::new().request(Arc::new(RequestInfo::new("default", "index", "index")));
        let handler = ErrorHandler::default()
            .callbacks(recorder.callbacks())
            .injector(Arc::new(injector))
            .host(host());

        let mut options = options();
        options.widgets = default_widgets("APPLICATION_TIME");
        let dev_bar = options.widgets["devBar"]
            .clone()
            .inject("setRequest", json!("request"));
        options.widgets.insert("devBar".into(), dev_bar);
        options.constants.insert("APPLICATION_TIME".into(), json!(1.0));
        options.application_stop_time = Some(1.075260);
        options.memory_peak = Some(6_815_744);

        handler.write_error(query_failure(), &options).unwrap();
        let html = recorder.last();

        assert!(html.contains("<span class=\"execution-time\">75.26 ms</span>"));
        assert!(html.contains("<span class=\"memory-peak\">6.5 MB</span>"));
        assert!(html.contains("<span class=\"module-controller-action\">default : index : index</span>"));
        assert!(html.contains("</div>\n</body>"));

        assert!(!html.contains("{CALLSTACK}"));
        assert!(html.contains(
            "<div class=\"call-stack\"><ul class=\"call-stack\"><li>1. <em>/srv/app/src/</em><strong>db.rs</strong>:12 "
        ));
        assert!(html.contains("<span class=\"side\">main()</span>"));
    }

    #[test]
    fn test_head_assets_in_fixed_order() {
        let recorder = Recorder::default();
        let handler = ErrorHandler::default().callbacks(recorder.callbacks()).host(host());
        let mut options = options();
        options.render.favicon = Some(Favicon::new("image/x-icon", "/favicon.ico"));
        options.render.stylesheets = ["/app.css", ""].into_iter().collect();
        options.render.javascripts = ["", "/app.js"].into_iter().collect();

        handler.write_error(Failure::new(1, "boom"), &options).unwrap();
        let html = recorder.last();

        assert!(html.contains(
            "<link rel=\"icon\" type=\"image/x-icon\" href=\"/favicon.ico\">\
             <link rel=\"stylesheet\" href=\"/app.css\">\
             <script src=\"/app.js\"></script></head>"
        ));
        assert_eq!(html.matches("rel=\"stylesheet\"").count(), 1);
        assert_eq!(html.matches("<script").count(), 1);
    }

    #[test]
    fn test_same_failure_renders_identically() {
        let recorder = Recorder::default();
        let handler = ErrorHandler::default().callbacks(recorder.callbacks()).host(host());
        let mut options = options();
        options.render.stylesheets = ["/app.css"].into_iter().collect();

        handler.write_error(query_failure(), &options).unwrap();
        handler.write_error(query_failure(), &options).unwrap();

        let written = recorder.written();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0], written[1]);
    }

    #[test]
    fn test_accessor_surface() {
        let mut source = tempfile::NamedTempFile::new().unwrap();
        for n in 1..=20 {
            writeln!(source, "let value_{} = {};", n, n).unwrap();
        }
        let path = source.path().display().to_string();

        let recorder = Recorder::default();
        let request_time = Local.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().unwrap();
        let handler = ErrorHandler::default()
            .callbacks(recorder.callbacks())
            .host(host().request_time(request_time));
        let mut options = options();
        options.error_title.insert("500".into(), "Fatal error".into());
        options.error_file_code = Some(ErrorFileCode {
            callback: "rust".into(),
            from: 2,
            to: 2,
        });

        let failure = Failure::new(500, "Could not connect to database server")
            .at(path.clone(), 10)
            .exception(Exception::new("QueryError", "timeout").at(path, 10));
        handler.write_error(failure, &options).unwrap();
        let html = recorder.last();

        assert!(html.contains("<title>Could not connect to database server... | FATAL ERROR | Phoenix ORCH | Error Handler</title>"));
        assert!(html.contains("<span class=\"error-title\">Fatal error</span>"));
        assert!(html.contains("<small class=\"error-code\">500</small>"));
        assert!(html.contains("<em class=\"error-note\">(QueryError)</em>"));
        assert!(html.contains("<span class=\"generated-time\">2026/01/02 03:04:05</span>"));
        assert!(html.contains("<span class=\"server-info\">phoenix-gateway</span>"));
        assert!(html.contains("<span class=\"runtime-version\">rustc 1.81+</span>"));
        assert!(html.contains("<ol start=\"8\" class=\"code\">"));
        assert!(html.contains("<li class=\"line error\"><span class=\"keyword\">let</span> value_10"));
    }

    #[test]
    fn test_start_up_listener_escalates_severity() {
        let recorder = Recorder::default();
        let events = Arc::new(Events::new());
        events.listen("errorStartUp", |args| {
            if let EventArgs::StartUp(fields) = args {
                *fields.code = 500;
                fields
                    .environment
                    .insert("escalated".into(), json!(true));
            }
            Ok(())
        });
        let handler = ErrorHandler::default()
            .callbacks(recorder.callbacks())
            .events(events)
            .host(host());
        let mut options = options();
        options.error_title.insert("500".into(), "Fatal error".into());

        handler.write_error(Failure::new(2, "Undefined index"), &options).unwrap();
        assert!(recorder.last().contains("| FATAL ERROR |"));
    }

    #[test]
    fn test_disabled_rendering_still_runs_shutdown_listeners_and_terminates() {
        let recorder = Recorder::default();
        let events = Arc::new(Events::new());
        events.listen("errorShutDown", |args| {
            if let EventArgs::ShutDown { html } = args {
                assert!(html.is_empty());
                html.push_str("fallback");
            }
            Ok(())
        });
        let handler = ErrorHandler::default()
            .callbacks(recorder.callbacks())
            .events(events);
        let options = HandlerOptions {
            disable: true,
            terminator: Some("record".into()),
            ..options()
        };

        let state = handler.write_error(query_failure(), &options).unwrap();
        assert_eq!(state, HandlerState::Terminated);
        assert_eq!(recorder.written(), vec!["fallback".to_string()]);
        assert_eq!(recorder.terminations(), 1);
    }

    #[test]
    fn test_broken_layout_skips_widgets_but_not_listeners() {
        let recorder = Recorder::default();
        let log = SpyLog::default();
        let events = Arc::new(Events::new());
        events.listen("errorShutDown", |args| {
            if let EventArgs::ShutDown { html } = args {
                html.push_str("fallback");
            }
            Ok(())
        });
        let handler = ErrorHandler::default()
            .registry(spy_registry(&log))
            .callbacks(recorder.callbacks())
            .events(events);
        let mut options = options().widget("spy", WidgetConfig::new("spy"));
        options.render.layout = Some("<html><body><p class=\"open".into());

        handler.write_error(Failure::new(1, "boom"), &options).unwrap();
        assert_eq!(recorder.written(), vec!["fallback".to_string()]);
        assert_eq!(log.entries(), vec!["preprocess active"]);
    }

    #[test]
    fn test_unknown_widget_stops_before_rendering() {
        let recorder = Recorder::default();
        let events = Arc::new(Events::new());
        let handler = ErrorHandler::default()
            .callbacks(recorder.callbacks())
            .events(events.clone());
        events.listen("errorShutDown", |_| panic!("shutdown must not run"));
        let options = options().widget("bar", WidgetConfig::new("DevBar"));

        let err = handler.write_error(Failure::new(1, "boom"), &options).unwrap_err();
        assert!(err.is_configuration());
        assert!(recorder.written().is_empty());
    }

    #[test]
    fn test_public_page_replaces_internal_page() {
        let recorder = Recorder::default();
        let events = Arc::new(Events::new());
        let mut public = RenderOptions::default();
        public.title = Some("Application Error | Phoenix ORCH".into());
        public.data = Some(json!({ "message": "Please try again later." }));
        let options = options();
        listeners::register_defaults(&events, &options, Some(Arc::new(PublicErrorPage::new(public))));

        let handler = ErrorHandler::default()
            .callbacks(recorder.callbacks())
            .events(events);
        handler.write_error(query_failure(), &options).unwrap();

        let html = recorder.last();
        assert!(html.contains("<title>Application Error | Phoenix ORCH</title>"));
        assert!(html.contains("<p class=\"message\">Please try again later.</p>"));
        assert!(!html.contains("error-message"));
    }

    /// Widget whose template field cannot be read
    struct Unreadable;

    impl TemplateData for Unreadable {
        fn field(&mut self, name: &str) -> Result<Option<String>> {
            match name {
                "stack" => Err(std::io::Error::new(std::io::ErrorKind::NotFound, "stack.log").into()),
                _ => Ok(None),
            }
        }
    }

    impl Widget for Unreadable {
        fn preprocess(&mut self, _options: &WidgetOptions) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_widget_field_fault_propagates_as_widget_error() {
        let recorder = Recorder::default();
        let mut registry = WidgetRegistry::new();
        registry.register("unreadable", |_| Box::new(Unreadable));
        let handler = ErrorHandler::default()
            .registry(registry)
            .callbacks(recorder.callbacks());
        let options = options().widget(
            "trace",
            WidgetConfig::new("unreadable").script("<pre class=\"stack\"></pre>"),
        );

        let err = handler.write_error(Failure::new(1, "boom"), &options).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Widget);
        assert_eq!(err.context.get("widget").unwrap(), "trace");
        assert_eq!(err.context.get("raised_as").unwrap(), "IO");
        assert!(recorder.written().is_empty());
    }

    #[test]
    fn test_listener_fault_propagates_as_event_error() {
        let recorder = Recorder::default();
        let events = Arc::new(Events::new());
        events.listen("errorShutDown", |_| Err(Error::new(ErrorKind::Internal, "mailer down")));
        let handler = ErrorHandler::default()
            .callbacks(recorder.callbacks())
            .events(events);

        let err = handler.write_error(Failure::new(1, "boom"), &options()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Event);
        assert_eq!(err.context.get("event").unwrap(), "errorShutDown");
        assert!(recorder.written().is_empty());
    }

    #[test]
    fn test_custom_widgets_and_callbacks_compose_in_any_order() {
        let log = SpyLog::default();
        let options = options()
            .widget("spy", WidgetConfig::new("spy"))
            .widget("stack", WidgetConfig::new("callStack"));

        let first = Recorder::default();
        let handler = ErrorHandler::default()
            .registry(spy_registry(&log))
            .callbacks(first.callbacks());
        assert!(handler.validate(&options).is_ok());
        handler.write_error(query_failure(), &options).unwrap();

        let second = Recorder::default();
        let handler = ErrorHandler::default()
            .callbacks(second.callbacks())
            .registry(spy_registry(&log));
        assert!(handler.validate(&options).is_ok());
        handler.write_error(query_failure(), &options).unwrap();

        assert_eq!(first.written(), second.written());
        assert_eq!(log.entries().iter().filter(|e| *e == "postprocess active").count(), 2);
    }
}
