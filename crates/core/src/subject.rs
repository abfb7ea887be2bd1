//! Subject (username) normalization.

/// Normalize a raw username into the subject identifier used for the
/// task record and the dataset directory.
///
/// Strips one leading `@`, splits on `/`, and takes the last non-empty
/// segment, so profile-URL-ish inputs like `@alice/` or
/// `https://example.com/@alice` reduce to `alice`. Falls back to the raw
/// input when nothing survives.
pub fn normalize_subject(raw: &str) -> String {
    let stripped = raw.strip_prefix('@').unwrap_or(raw);
    stripped
        .split('/')
        .filter(|s| !s.is_empty())
        .next_back()
        .map(str::to_string)
        .unwrap_or_else(|| raw.to_string())
}
