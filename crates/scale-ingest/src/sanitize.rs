//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Logs are shared for debugging, so sender addresses are masked and
//! attachment names are reduced to their final path component.

/// Masks the local part of an email address, keeping its first character
/// and the domain.
///
/// - `scales@example.com` → `s***@example.com`
/// - `Depot Scales <ops@example.com>` → `o***@example.com`
/// - `not-an-address` → `***`
pub fn redact_email(address: &str) -> String {
    let bare = match (address.rfind('<'), address.rfind('>')) {
        (Some(open), Some(close)) if open < close => &address[open + 1..close],
        _ => address,
    };

    match bare.trim().split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        _ => "***".to_string(),
    }
}

/// Returns only the final component of an attachment name, so names such
/// as `../../etc/passwd` or `C:\exports\day.csv` never carry directories
/// into logs or storage.
pub fn file_name_only(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .unwrap_or_default();
    if last.is_empty() || last == "." || last == ".." {
        "attachment".to_string()
    } else {
        last.to_string()
    }
}
