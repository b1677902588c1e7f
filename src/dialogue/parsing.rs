//! Interpretation of the free text users type.

use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

static AMOUNT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)?$|^\.\d+$").expect("valid amount pattern"));

/// Commands accepted in any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Cancel,
}

/// `/start` or `/cancel`, with an optional `@botname` suffix. Anything after
/// the first word is ignored.
pub fn parse_command(text: &str) -> Option<Command> {
    let word = text.split_whitespace().next()?;
    let name = word.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    match name.to_ascii_lowercase().as_str() {
        "start" => Some(Command::Start),
        "cancel" => Some(Command::Cancel),
        _ => None,
    }
}

/// Trimmed and upper-cased, the form types and descriptions are stored in.
pub fn normalize(text: &str) -> String {
    text.trim().to_uppercase()
}

/// Whether `text` is the label of `button`, ignoring case and surrounding
/// blanks.
pub fn matches_button(text: &str, button: &str) -> bool {
    normalize(text) == normalize(button)
}

/// Non-negative decimal with `.` or `,` as separator.
pub fn try_parse_amount(text: &str) -> Option<f64> {
    let cleaned: String = text.trim().chars().filter(|c| !c.is_whitespace()).collect();
    let cleaned = cleaned.replace(',', ".");
    if !AMOUNT_PATTERN.is_match(&cleaned) {
        return None;
    }
    cleaned.parse().ok()
}

/// Like [`try_parse_amount`], but unparsable input counts as zero.
pub fn parse_amount(text: &str) -> f64 {
    match try_parse_amount(text) {
        Some(amount) => amount,
        None => {
            warn!("Unparsable amount {:?}, storing 0", text);
            0.0
        }
    }
}

/// Comma-separated ids. Tokens that are not positive integers are dropped,
/// as are repeats.
pub fn parse_ids(text: &str) -> Vec<i64> {
    let mut ids = Vec::new();
    for token in text.split(',') {
        if let Ok(id) = token.trim().parse::<i64>()
            && id > 0
            && !ids.contains(&id)
        {
            ids.push(id);
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands() {
        assert_eq!(parse_command("/start"), Some(Command::Start));
        assert_eq!(parse_command("/start@household_bot"), Some(Command::Start));
        assert_eq!(parse_command(" /CANCEL now"), Some(Command::Cancel));
        assert_eq!(parse_command("/cancel@household_bot"), Some(Command::Cancel));
        assert_eq!(parse_command("start"), None);
        assert_eq!(parse_command("/report"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn test_amounts() {
        assert_eq!(try_parse_amount("12,5"), Some(12.5));
        assert_eq!(try_parse_amount("12.50"), Some(12.5));
        assert_eq!(try_parse_amount(" 7 "), Some(7.0));
        assert_eq!(try_parse_amount("1 200,75"), Some(1200.75));
        assert_eq!(try_parse_amount(",5"), Some(0.5));
        assert_eq!(try_parse_amount("abc"), None);
        assert_eq!(try_parse_amount("-3"), None);
        assert_eq!(try_parse_amount("1,2,3"), None);
        assert_eq!(try_parse_amount(""), None);
    }

    #[test]
    fn test_unparsable_amount_is_zero() {
        assert_eq!(parse_amount("abc"), 0.0);
        assert_eq!(parse_amount("12,5"), 12.5);
    }

    #[test]
    fn test_ids() {
        assert_eq!(parse_ids("3, 7, x"), vec![3, 7]);
        assert_eq!(parse_ids("3,3, 0, -2,12"), vec![3, 12]);
        assert!(parse_ids("x, y").is_empty());
        assert!(parse_ids("").is_empty());
    }

    #[test]
    fn test_normalize_and_buttons() {
        assert_eq!(normalize("  carrefour express "), "CARREFOUR EXPRESS");
        assert!(matches_button(" yes", "YES"));
        assert!(!matches_button("yess", "YES"));
    }
}
