//! Text cleanup before synthesis, so markdown and symbols are not read aloud

use regex::Regex;
use std::sync::OnceLock;

/// (pattern, replacement) pairs applied in order
const RULES: &[(&str, &str)] = &[
    // Code
    (r"```[\s\S]*?```", " code block "),
    (r"`[^`]+`", " "),
    // Headers
    (r"(?m)^#{1,6}\s+", ""),
    // Emphasis (keep the text)
    (r"\*\*([^*]+)\*\*", "${1}"),
    (r"\*([^*]+)\*", "${1}"),
    (r"__([^_]+)__", "${1}"),
    (r"_([^_]+)_", "${1}"),
    // List markers
    (r"(?m)^[ \t]*[-*+•][ \t]+", ""),
    (r"(?m)^[ \t]*\d+\.[ \t]+", ""),
    // Images, then links (keep link text), then bare URLs
    (r"!\[([^\]]*)\]\([^)]+\)", ""),
    (r"\[([^\]]+)\]\([^)]+\)", "${1}"),
    (r"https?://\S+", ""),
    // HTML tags
    (r"<[^>]+>", ""),
    // Symbols that get read literally
    (r"[#@&|\\/<>{}\[\]^~`]", ""),
    // Currency and percentages
    (r"\$(\d+)", "${1} dollars"),
    (r"(?i)AED\s*(\d+)", "${1} dirhams"),
    (r"(\d+)%", "${1} percent"),
    // Excess punctuation
    (r"\.{3,}", "... "),
    (r"!{2,}", "!"),
    (r"\?{2,}", "?"),
    // Whitespace
    (r"\s+", " "),
];

fn rules() -> &'static [(Regex, &'static str)] {
    static COMPILED: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .filter_map(|(pattern, replacement)| {
                Regex::new(pattern).ok().map(|re| (re, *replacement))
            })
            .collect()
    })
}

/// Clean `text` for speaking
pub fn sanitize_for_speech(text: &str) -> String {
    let mut cleaned = text.to_string();
    for (re, replacement) in rules() {
        cleaned = re.replace_all(&cleaned, *replacement).into_owned();
    }
    cleaned.trim().to_string()
}
