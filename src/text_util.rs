use std::fmt::Write as _;

use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;

/// Maximum number of characters in a preview before truncation.
pub const DEFAULT_PREVIEW_MAX_CHARS: usize = 240;

/// Number of whitespace-separated tokens in `text`.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Hex-encoded SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Split text into paragraph blocks on blank lines.
///
/// A blank line is a line holding nothing but whitespace. Blocks are
/// trimmed and empty blocks are dropped.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }

    blocks
        .into_iter()
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .collect()
}

/// Split a block into sentences using Unicode sentence boundaries.
///
/// Internal line breaks are folded to single spaces so a sentence wrapped
/// across lines stays one sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    flat.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Single-line preview of `text`, truncated on a char boundary.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_count_ignores_extra_whitespace() {
        assert_eq!(word_count("  one two\n\tthree  "), 3);
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("   \n "), 0);
    }

    #[test]
    fn content_hash_is_stable_sha256() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("ghee").len(), 64);
    }

    #[test]
    fn split_paragraphs_on_blank_lines() {
        let text = "Nidana\ncauses here\n\n   \nChikitsa\ntreatment\n\n\n";
        let blocks = split_paragraphs(text);
        assert_eq!(blocks, vec!["Nidana\ncauses here", "Chikitsa\ntreatment"]);
    }

    #[test]
    fn split_paragraphs_empty_input() {
        assert!(split_paragraphs("").is_empty());
        assert!(split_paragraphs("\n\n  \n").is_empty());
    }

    #[test]
    fn split_sentences_basic() {
        let s = split_sentences(
            "Ghee is cooling. It pacifies Pitta!\nDoes it help Vata? Yes.",
        );
        assert_eq!(
            s,
            vec![
                "Ghee is cooling.",
                "It pacifies Pitta!",
                "Does it help Vata?",
                "Yes."
            ]
        );
    }

    #[test]
    fn split_sentences_without_terminator() {
        assert_eq!(split_sentences("no full stop here"), vec![
            "no full stop here"
        ]);
    }

    #[test]
    fn preview_truncates_long_text() {
        let long = "word ".repeat(100);
        let p = preview(&long, 20);
        assert_eq!(p.chars().count(), 23);
        assert!(p.ends_with("..."));
        assert_eq!(preview("short\ntext", 20), "short text");
    }
}
