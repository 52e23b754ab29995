/// Truncation marker appended to shortened text.
pub const ELLIPSIS: char = '…';

/// Collapse text onto a single line and cap it at `max_points` code points.
///
/// Used for tool labels and result previews. The ellipsis counts toward
/// the budget so output never exceeds `max_points`.
pub fn truncate_line(text: &str, max_points: usize) -> String {
    let flat: String = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if flat.chars().count() <= max_points {
        return flat;
    }

    let keep = max_points.saturating_sub(1);
    let mut out: String = flat.chars().take(keep).collect();
    out.push(ELLIPSIS);
    out
}

/// Last path segment of `path`, or the whole string when it has none.
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Clip `text` to a platform message limit, appending `marker` when clipped.
///
/// The limit is measured in code points; the marker fits inside it.
pub fn clip_with_marker(text: &str, max_points: usize, marker: &str) -> String {
    if text.chars().count() <= max_points {
        return text.to_string();
    }

    let marker_len = marker.chars().count();
    let keep = max_points.saturating_sub(marker_len);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(marker);
    out
}
