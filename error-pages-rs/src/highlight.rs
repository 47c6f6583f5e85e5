//! Source excerpt highlighters.
//!
//! Both render an ordered list of the lines around the reported line, numbered
//! from the first excerpt line, with the reported line marked
//! `class="line error"`. An unreadable file gives an empty excerpt.

use std::fs;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::markup::escape_html;

static RUST_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?P<comment>//.*$)",
        r#"|(?P<string>"(?:[^"\\]|\\.)*")"#,
        r"|(?P<keyword>\b(?:as|async|await|break|const|continue|crate|dyn|else|enum|extern|false|fn|for|if|impl|in|let|loop|match|mod|move|mut|pub|ref|return|self|Self|static|struct|super|trait|true|type|unsafe|use|where|while)\b)",
        r"|(?P<number>\b\d[\d_]*(?:\.\d+)?\b)",
    ))
    .expect("static regex")
});

/// Escaped lines, reported line marked
pub fn plain(file: &str, line: u32, before: usize, after: usize) -> String {
    render(file, line, before, after, escape_html)
}

/// Rust token spans, reported line marked
pub fn rust(file: &str, line: u32, before: usize, after: usize) -> String {
    render(file, line, before, after, highlight_rust_line)
}

fn render(file: &str, line: u32, before: usize, after: usize, format_line: fn(&str) -> String) -> String {
    let source = match fs::read_to_string(file) {
        Ok(source) => source,
        Err(e) => {
            debug!(file = %file, error = %e, "Source excerpt unavailable");
            return String::new();
        }
    };

    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() {
        return String::new();
    }

    let target = (line.max(1) as usize).min(lines.len());
    let first = target.saturating_sub(before).max(1);
    let last = (target + after).min(lines.len());

    let mut html = format!("<ol start=\"{}\" class=\"code\">", first);
    for number in first..=last {
        let class = if number == line as usize { "line error" } else { "line" };
        html.push_str(&format!(
            "<li class=\"{}\">{}</li>",
            class,
            format_line(lines[number - 1])
        ));
    }
    html.push_str("</ol>");
    html
}

fn highlight_rust_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len() * 2);
    let mut last = 0;

    for caps in RUST_TOKENS.captures_iter(line) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let class = ["comment", "string", "keyword", "number"]
            .into_iter()
            .find(|name| caps.name(name).is_some())
            .unwrap_or("token");

        out.push_str(&escape_html(&line[last..whole.start()]));
        out.push_str(&format!(
            "<span class=\"{}\">{}</span>",
            class,
            escape_html(whole.as_str())
        ));
        last = whole.end();
    }
    out.push_str(&escape_html(&line[last..]));
    out
}
