//! Turns raw backtrace lines and cause chains into the `trace` and `trace_chain` bodies.

use crate::{
    config::{Config, FrameContext},
    encoding::enforce_valid_utf8,
    exception::{identity, Reportable},
    models::{Body, ExceptionInfo, Frame, SourceContext, Trace},
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::{
    backtrace::Backtrace,
    path::{Path, PathBuf},
};

const CONTEXT_LINES: usize = 4;

static FRAME_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*):(\d+)(?::in [`']([^']+)')?$").expect("frame pattern is valid")
});

/// Symbols of the frames at the head of a captured stack that belong to the capture itself.
const INTERNAL_SYMBOL_PREFIXES: &[&str] = &[
    "faultline::",
    "<faultline::",
    "std::backtrace",
    "<std::backtrace",
    "backtrace::",
];

/// Build the body for an error and its causes.
///
/// The chain stops at the first cause that was already visited. `message` becomes the
/// description and `extra` the extra data of the first trace.
pub(crate) fn build(
    exception: &dyn Reportable,
    message: Option<&str>,
    extra: Option<Map<String, Value>>,
    config: &Config,
) -> Body {
    let mut traces = Vec::new();
    let mut visited = Vec::new();
    let mut current = Some(exception);
    while let Some(err) = current {
        let id = identity(err, &err.class_name());
        if visited.contains(&id) {
            break;
        }
        visited.push(id);
        traces.push(trace(err, config));
        current = err.cause();
    }

    if let Some(first) = traces.first_mut() {
        first.exception.description = message.map(Into::into);
        first.extra = extra;
    }

    if traces.len() == 1 {
        Body::Trace(traces.remove(0))
    } else {
        Body::TraceChain(traces)
    }
}

fn trace(err: &dyn Reportable, config: &Config) -> Trace {
    let lines = match err.backtrace() {
        Some(lines) if !lines.is_empty() => lines,
        _ if config.populate_empty_backtraces => current_stack(),
        _ => Vec::new(),
    };
    Trace {
        frames: lines
            .iter()
            .rev()
            .map(|line| parse_frame(line, config))
            .collect(),
        exception: ExceptionInfo {
            class: err.class_name(),
            message: err.message(),
            description: None,
        },
        extra: None,
    }
}

/// Parse a line in the format `<file>:<line>:in '<method>'`.
///
/// Lines that do not match become a frame with an unknown file and the whole line as method.
pub(crate) fn parse_frame(line: &str, config: &Config) -> Frame {
    let Some(captures) = FRAME_LINE.captures(line) else {
        return Frame::unknown(line);
    };
    let Ok(lineno) = captures[2].parse::<u32>() else {
        return Frame::unknown(line);
    };

    let mut frame = Frame {
        filename: captures[1].to_string(),
        lineno,
        method: captures.get(3).map(|m| m.as_str().to_string()),
        code: None,
        context: None,
    };
    add_source_context(&mut frame, config);
    frame
}

fn add_source_context(frame: &mut Frame, config: &Config) {
    let path = resolve_path(&frame.filename, config);
    let wanted = match config.frame_context {
        FrameContext::None => false,
        FrameContext::All => true,
        FrameContext::App => is_app_file(&path, config),
    };
    if !wanted || frame.lineno == 0 {
        return;
    }
    let Ok(bytes) = std::fs::read(&path) else {
        return;
    };
    let source = enforce_valid_utf8(&bytes);
    let lines: Vec<&str> = source.lines().collect();
    let index = frame.lineno as usize - 1;
    let Some(code) = lines.get(index) else {
        return;
    };

    let pre: Vec<String> = lines[index.saturating_sub(CONTEXT_LINES)..index]
        .iter()
        .skip_while(|line| line.trim().is_empty())
        .map(|line| line.to_string())
        .collect();
    let post_end = (index + 1 + CONTEXT_LINES).min(lines.len());
    let post = lines[index + 1..post_end]
        .iter()
        .map(|line| line.to_string())
        .collect();

    frame.code = Some(code.to_string());
    frame.context = Some(SourceContext { pre, post });
}

fn resolve_path(filename: &str, config: &Config) -> PathBuf {
    let path = Path::new(filename);
    match &config.root {
        Some(root) if path.is_relative() => Path::new(root).join(path),
        _ => path.to_path_buf(),
    }
}

/// A file belongs to the application when it lives in a project package path, or in the
/// project root but outside every library path.
fn is_app_file(path: &Path, config: &Config) -> bool {
    if config
        .project_package_paths
        .iter()
        .any(|package| path.starts_with(package))
    {
        return true;
    }
    let Some(root) = &config.root else {
        return false;
    };
    let is_library = || {
        config
            .library_paths
            .iter()
            .any(|library| path.starts_with(library))
    };
    path.starts_with(root) && !is_library()
}

/// The current call stack as raw lines, innermost call first, without the frames of the
/// capture itself.
pub(crate) fn current_stack() -> Vec<String> {
    render_backtrace(&Backtrace::force_capture().to_string())
}

/// Convert the `Display` output of [`Backtrace`] into `<file>:<line>:in '<symbol>'` lines.
///
/// ```text
///    0: app::handler
///              at ./src/handler.rs:12:5
/// ```
fn render_backtrace(rendered: &str) -> Vec<String> {
    let mut frames: Vec<(String, Option<String>)> = Vec::new();
    for line in rendered.lines() {
        let line = line.trim();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some((_, last_location)) = frames.last_mut() {
                last_location.get_or_insert_with(|| strip_column(location).to_string());
            }
        } else if let Some((index, symbol)) = line.split_once(": ") {
            if index.chars().all(|c| c.is_ascii_digit()) {
                frames.push((symbol.to_string(), None));
            }
        }
    }

    frames
        .into_iter()
        .skip_while(|(symbol, _)| {
            INTERNAL_SYMBOL_PREFIXES
                .iter()
                .any(|prefix| symbol.starts_with(prefix))
        })
        .map(|(symbol, location)| match location {
            Some(location) => format!("{}:in `{}'", location, symbol),
            None => symbol,
        })
        .collect()
}

/// `src/main.rs:10:5` -> `src/main.rs:10`
fn strip_column(location: &str) -> &str {
    match location.rsplit_once(':') {
        Some((rest, column)) if column.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => location,
    }
}
