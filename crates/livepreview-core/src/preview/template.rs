//! Scripts embedded in every preview document.

/// Classic script installed before anything else runs. Relays uncaught
/// errors and unhandled rejections to the host page.
const RELAY_SCRIPT: &str = r##"(function () {
  var VERSION = __LIVEPREVIEW_VERSION__;
  function locate(stack) {
    if (!stack) return null;
    var m = /((?:https?:\/\/[^\s()]+)?\/[^\s():]+):(\d+):(\d+)/.exec(String(stack));
    return m ? { file: m[1], line: Number(m[2]), column: Number(m[3]) } : null;
  }
  function report(error, location) {
    var message = error && error.message ? String(error.message) : String(error);
    var stack = error && error.stack ? String(error.stack) : null;
    try {
      parent.postMessage({
        source: "livepreview",
        type: "runtime-error",
        version: VERSION,
        message: message,
        stack: stack,
        location: location || locate(stack)
      }, "*");
    } catch (_) {}
  }
  window.__livepreviewReport = report;
  window.addEventListener("error", function (event) {
    var location = event.filename
      ? { file: event.filename, line: event.lineno, column: event.colno }
      : null;
    report(event.error || event.message, location);
  });
  window.addEventListener("unhandledrejection", function (event) {
    report(event.reason, null);
  });
})();"##;

/// Module script that imports the entry and mounts its default export
/// inside an error boundary.
const BOOTSTRAP_MODULE: &str = r##"import React from "react";
import { createRoot } from "react-dom/client";

const report = window.__livepreviewReport || ((error) => console.error(error));

class ErrorBoundary extends React.Component {
  constructor(props) {
    super(props);
    this.state = { error: null };
  }
  static getDerivedStateFromError(error) {
    return { error };
  }
  componentDidCatch(error) {
    report(error, null);
  }
  render() {
    if (this.state.error) {
      const error = this.state.error;
      return React.createElement(
        "pre",
        { style: { color: "#b91c1c", padding: "16px", whiteSpace: "pre-wrap" } },
        String((error && error.message) || error)
      );
    }
    return this.props.children;
  }
}

const entry = __LIVEPREVIEW_ENTRY__;
try {
  const mod = await import(entry);
  const App = mod.default;
  if (App === undefined || App === null) {
    throw new Error(entry + " has no default export to render");
  }
  createRoot(document.getElementById(__LIVEPREVIEW_ROOT__)).render(
    React.createElement(ErrorBoundary, null, React.createElement(App))
  );
} catch (error) {
  report(error, null);
}"##;

/// The relay script for a document of `version`.
pub(crate) fn relay_script(version: u64) -> String {
    RELAY_SCRIPT.replace("__LIVEPREVIEW_VERSION__", &version.to_string())
}

/// The bootstrap module for `entry`, mounting into `#root_id`.
pub(crate) fn bootstrap_module(entry: &str, root_id: &str) -> Result<String, serde_json::Error> {
    let entry = script_safe(&serde_json::to_string(entry)?);
    let root = script_safe(&serde_json::to_string(root_id)?);
    Ok(BOOTSTRAP_MODULE
        .replace("__LIVEPREVIEW_ENTRY__", &entry)
        .replace("__LIVEPREVIEW_ROOT__", &root))
}

/// Make JSON safe to embed in a `<script>` element.
pub(crate) fn script_safe(json: &str) -> String {
    json.replace('<', "\\u003c")
}

/// Make CSS safe to embed in a `<style>` element.
pub(crate) fn style_safe(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(idx) = find_ascii_case_insensitive(rest, "</style") {
        out.push_str(&rest[..idx]);
        out.push_str("<\\/");
        out.push_str(&rest[idx + 2..idx + 7]);
        rest = &rest[idx + 7..];
    }
    out.push_str(rest);
    out
}

/// Escape text for HTML content and attribute values.
pub(crate) fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}
