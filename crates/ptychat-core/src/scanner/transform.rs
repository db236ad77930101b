//! Pure text transforms applied to terminal output before display.
//!
//! The set is fixed and applied in order by [`format_output`].

use once_cell::sync::Lazy;
use regex::Regex;

/// Remove OSC and CSI escape sequences
pub fn strip_ansi(input: &str) -> String {
    static OSC_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)").expect("Invalid OSC pattern")
    });
    static CSI_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("Invalid CSI pattern"));
    static ESC_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\x1b[()][0-9A-Za-z]|\x1b[=>78]").expect("Invalid ESC pattern"));

    let without_osc = OSC_RE.replace_all(input, "");
    let without_csi = CSI_RE.replace_all(&without_osc, "");
    ESC_RE.replace_all(&without_csi, "").into_owned()
}

/// Convert `\r\n` and lone `\r` to `\n`
pub fn normalize_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

/// Drop trailing whitespace from every line and from the end of the text
pub fn trim_trailing_whitespace(input: &str) -> String {
    let lines: Vec<&str> = input.split('\n').map(str::trim_end).collect();
    lines.join("\n").trim_end().to_string()
}

/// Run every display transform in order
pub fn format_output(raw: &str) -> String {
    let text = strip_ansi(raw);
    let text = normalize_line_endings(&text);
    trim_trailing_whitespace(&text)
}
