//! Equivalent-curl rendering for dry-run actions.
//!
//! Dry-runs never dispatch a request; instead they print a curl command the
//! operator could run by hand to apply the same change.

use serde_json::Value;

/// Render a curl command for `method` against `base_url`/`endpoint`.
///
/// The auth header is rendered as a placeholder so the command is safe to
/// print and paste into a shell.
#[must_use]
pub fn render(method: &str, base_url: &str, endpoint: &str, body: Option<&Value>) -> String {
    let url = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    );

    let mut command = format!(
        "curl -X {} -H \"Accept: application/vnd.github+json\" -H \"Authorization: Bearer $TOKEN\" {}",
        method.to_uppercase(),
        shell_quote(&url)
    );

    if let Some(body) = body {
        let payload = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
        command.push_str(" -d ");
        command.push_str(&shell_quote(&payload));
    }

    command
}

/// Single-quote `s` for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
