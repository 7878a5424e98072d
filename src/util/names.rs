//! Display-name cleanup shared by the HTTP and WebSocket entry points

/// Longest player name kept after sanitizing
pub const MAX_PLAYER_NAME_CHARS: usize = 20;

/// Longest room name accepted from `POST /rooms`
pub const MAX_ROOM_NAME_CHARS: usize = 24;

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, 'а'..='я' | 'А'..='Я' | '_' | '-')
        || c.is_whitespace()
}

/// Strip everything but latin/cyrillic letters, digits, `_`, `-` and whitespace,
/// then trim and cut to [`MAX_PLAYER_NAME_CHARS`].
pub fn sanitize_name(raw: &str) -> String {
    sanitize_name_to(raw, MAX_PLAYER_NAME_CHARS)
}

/// Same filter as [`sanitize_name`] with a caller-chosen length cap
pub fn sanitize_name_to(raw: &str, max_chars: usize) -> String {
    let cleaned: String = raw.chars().filter(|c| is_allowed(*c)).collect();
    cleaned
        .trim()
        .chars()
        .take(max_chars)
        .collect::<String>()
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_markup() {
        assert_eq!(sanitize_name("<b>Ace</b>"), "bAceb");
        assert_eq!(sanitize_name("  neo_1-x  "), "neo_1-x");
    }

    #[test]
    fn test_keeps_cyrillic() {
        assert_eq!(sanitize_name("Пилот 7"), "Пилот 7");
    }

    #[test]
    fn test_truncates() {
        let long = "a".repeat(50);
        assert_eq!(sanitize_name(&long).chars().count(), MAX_PLAYER_NAME_CHARS);
        assert_eq!(sanitize_name_to(&long, 24).chars().count(), 24);
    }

    #[test]
    fn test_empty_when_nothing_allowed() {
        assert_eq!(sanitize_name("!!!"), "");
    }
}
