//! Page-geometry patch applied to the intermediate stylesheet.
//!
//! `hwp5html` lays the document out for the screen: it emits no `@page`
//! rule, so WeasyPrint falls back to A4 with 75px margins and every page
//! ends up shrunk inside a white frame. Appending a fixed rule (page size,
//! zero margin, zero padding) before stage 2 makes the PDF match the HWP
//! page box.
//!
//! The rule is wrapped in marker comments. Patching an already patched file
//! replaces the previous block instead of stacking a second one, so the
//! patch is idempotent.

use crate::config::PageSize;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

const BEGIN_MARKER: &str = "/* hwp2pdf:page-geometry:begin */";
const END_MARKER: &str = "/* hwp2pdf:page-geometry:end */";

static RE_INJECTED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?s)\n?{}.*?{}\n?",
        regex::escape(BEGIN_MARKER),
        regex::escape(END_MARKER)
    ))
    .unwrap()
});

/// Render the `@page` block for `size`.
pub fn page_rule(size: &PageSize) -> String {
    format!(
        "{BEGIN_MARKER}\n@page {{\n    size: {};\n    margin: 0;\n    padding: 0;\n}}\n{END_MARKER}\n",
        size.css_value()
    )
}

/// Return `css` with exactly one page-geometry block at the end.
pub fn apply_page_rule(css: &str, size: &PageSize) -> String {
    let stripped = RE_INJECTED_BLOCK.replace_all(css, "\n");
    let mut out = stripped.trim_end().to_string();
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(&page_rule(size));
    out
}

/// Patch the stylesheet at `path` in place, creating it when absent.
pub async fn patch_stylesheet(path: &Path, size: &PageSize) -> std::io::Result<()> {
    let existing = match tokio::fs::read_to_string(path).await {
        Ok(css) => css,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    tokio::fs::write(path, apply_page_rule(&existing, size)).await
}
