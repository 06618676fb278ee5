//! Terminal styling helpers.

use console::Style;

/// Green check mark followed by `msg`.
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Red cross followed by `msg`.
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Colored label for a file outcome as stored in the history database.
pub fn outcome(label: &str) -> String {
    let style = match label {
        "resolved" | "already_resolved" => Style::new().green(),
        "would_resolve" => Style::new().cyan(),
        "manual" => Style::new().yellow(),
        _ => Style::new().red(),
    };
    style.apply_to(label.replace('_', " ")).to_string()
}

/// `yes`/`no` in green or red.
pub fn flag(value: bool) -> String {
    if value {
        Style::new().green().apply_to("yes").to_string()
    } else {
        Style::new().red().apply_to("no").to_string()
    }
}

/// Abbreviated commit hash.
pub fn short_rev(rev: &str) -> &str {
    match rev.char_indices().nth(10) {
        Some((idx, _)) => &rev[..idx],
        None => rev,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_rev() {
        assert_eq!(short_rev("0123456789abcdef"), "0123456789");
        assert_eq!(short_rev("abc"), "abc");
        assert_eq!(short_rev(""), "");
    }

    #[test]
    fn test_outcome_labels_are_readable() {
        console::set_colors_enabled(false);
        assert_eq!(outcome("already_resolved"), "already resolved");
        assert_eq!(outcome("manual"), "manual");
    }
}
