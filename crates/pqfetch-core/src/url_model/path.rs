//! Last path segment of a URL.

/// Extracts the last non-empty path segment of `url`, ignoring query and
/// fragment.
///
/// Returns `None` if the URL cannot be parsed or the path is empty/root.
pub fn last_path_segment(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path().split('/').filter(|s| !s.is_empty()).last()?;
    if segment == "." || segment == ".." {
        return None;
    }
    Some(segment.to_string())
}
