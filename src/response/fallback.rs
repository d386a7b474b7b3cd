//! Fallback documents
//!
//! Rendered when the pipeline aborts or nothing committed a response. These
//! shells bypass rewrite, injection, formatting, and compression.

use crate::error::PluginExecutionError;

fn shell(title: &str, heading: &str, detail: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
</head>
<body>
    <main>
        <h1>{heading}</h1>
        <p>{detail}</p>
    </main>
</body>
</html>"#
    )
}

pub fn render_error_page(error: &PluginExecutionError) -> String {
    shell(
        "Internal Server Error",
        "Something went wrong",
        &format!(
            "The request could not be completed: plugin '{}' failed during the {} phase.",
            escape(&error.plugin),
            error.phase
        ),
    )
}

pub fn render_not_found(path: &str) -> String {
    shell(
        "Not Found",
        "404 — Not Found",
        &format!("No route produced a response for '{}'.", escape(path)),
    )
}

pub const GENERIC_FAILURE_BODY: &str = "Internal Server Error";

fn escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
