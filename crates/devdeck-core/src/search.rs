//! Case-insensitive substring search over a log buffer.

pub fn line_matches(line: &str, query: &str) -> bool {
    if query.is_empty() {
        return true;
    }
    line.to_lowercase().contains(&query.to_lowercase())
}

/// Indices into `lines` of every matching line. Empty for an empty query.
pub fn match_positions(lines: &[String], query: &str) -> Vec<usize> {
    if query.is_empty() {
        return Vec::new();
    }
    let needle = query.to_lowercase();
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.to_lowercase().contains(&needle))
        .map(|(idx, _)| idx)
        .collect()
}

/// The lines to display for `query`: everything when it is empty, else only matches.
pub fn filter_lines(lines: &[String], query: &str) -> Vec<String> {
    if query.is_empty() {
        return lines.to_vec();
    }
    let needle = query.to_lowercase();
    lines
        .iter()
        .filter(|line| line.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Byte ranges of each occurrence of `query` in `line`, for highlighting.
///
/// Lowercasing can change byte lengths for some scripts; such lines get no highlight rather
/// than misplaced ones.
pub fn highlight_ranges(line: &str, query: &str) -> Vec<(usize, usize)> {
    if query.is_empty() {
        return Vec::new();
    }
    let haystack = line.to_lowercase();
    if haystack.len() != line.len() {
        return Vec::new();
    }
    let needle = query.to_lowercase();
    let mut ranges = Vec::new();
    let mut from = 0;
    while let Some(found) = haystack[from..].find(&needle) {
        let start = from + found;
        let end = start + needle.len();
        if !line.is_char_boundary(start) || !line.is_char_boundary(end) {
            break;
        }
        ranges.push((start, end));
        from = end;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> Vec<String> {
        ["GET /health 200", "error: connection refused", "POST /login 201", "ERROR again"]
            .iter()
            .map(|line| line.to_string())
            .collect()
    }

    #[test]
    fn matching_ignores_case() {
        assert!(line_matches("Connection REFUSED", "refused"));
        assert!(!line_matches("all good", "refused"));
        assert!(line_matches("anything", ""));
    }

    #[test]
    fn positions_index_the_unfiltered_buffer() {
        assert_eq!(match_positions(&buffer(), "error"), vec![1, 3]);
        assert!(match_positions(&buffer(), "").is_empty());
    }

    #[test]
    fn filtering_is_idempotent() {
        let once = filter_lines(&buffer(), "error");
        let twice = filter_lines(&once, "error");
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn clearing_the_query_restores_the_buffer() {
        let lines = buffer();
        let _filtered = filter_lines(&lines, "post");
        assert_eq!(filter_lines(&lines, ""), lines);
    }

    #[test]
    fn highlight_finds_every_occurrence() {
        assert_eq!(highlight_ranges("Error error", "ERROR"), vec![(0, 5), (6, 11)]);
        assert!(highlight_ranges("nothing", "x").is_empty());
    }
}
