//! Git output parsing helpers.

/// Counts changed files from `git merge` output.
pub fn count_changed_files(output: &str) -> u32 {
    for line in output.lines() {
        if line.contains("file") && line.contains("changed") {
            for word in line.split_whitespace() {
                if let Ok(n) = word.parse::<u32>() {
                    return n;
                }
            }
        }
    }
    0
}

/// Returns true when `git merge` reported nothing to do.
pub fn is_up_to_date(output: &str) -> bool {
    output.contains("Already up to date") || output.contains("Already up-to-date")
}

/// Parses the output of `git rev-parse --short=N HEAD`.
pub fn parse_revision(output: &str) -> Option<String> {
    let revision = output.lines().next()?.trim();
    if revision.is_empty() || !revision.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(revision.to_string())
}
