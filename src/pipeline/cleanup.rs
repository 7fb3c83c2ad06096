//! Post-recognition text cleanup.
//!
//! OCR output is noisy in predictable ways: stray glyphs, duplicated
//! whitespace, and digit/letter confusions at word boundaries. This pass
//! normalizes the text before field extraction. Newline structure is
//! preserved (capped at one blank line) because the extractors rely on
//! positional heuristics like "name = first line".

use std::sync::LazyLock;

use regex::Regex;

static RE_INLINE_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());

/// A digit at a word start followed by a letter is almost always a
/// misrecognized letter: 0→O, 5→S, 1→l, 6→G, 8→B.
static RE_WORD_CONFUSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([01568])([A-Za-z])").unwrap());

static RE_SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+([.,!?;:])").unwrap());

/// Clean raw recognized text.
pub fn cleanup_text(raw: &str) -> String {
    // 1. Collapse runs of spaces/tabs and trim line edges
    let mut lines: Vec<String> = raw
        .lines()
        .map(|l| RE_INLINE_WS.replace_all(l.trim(), " ").into_owned())
        .collect();

    for line in &mut lines {
        // 2. Glyph confusions, while the noisy characters are still present
        let fixed = line.replace('|', "I").replace('~', "-").replace('`', "'");
        let fixed = RE_WORD_CONFUSION
            .replace_all(&fixed, |caps: &regex::Captures| {
                let letter = &caps[2];
                let mapped = match &caps[1] {
                    "0" => "O",
                    "5" => "S",
                    "1" => "l",
                    "6" => "G",
                    "8" => "B",
                    other => other,
                };
                format!("{mapped}{letter}")
            })
            .into_owned();

        // 3. Strip anything outside the safe printable set
        let stripped: String = fixed.chars().filter(|c| is_safe_char(*c)).collect();

        // 4. Spacing around punctuation is normalized by removal only —
        //    inserting spaces would split decimals and times
        *line = RE_SPACE_BEFORE_PUNCT.replace_all(&stripped, "$1").into_owned();
    }

    // 5. Cap consecutive blank lines at one
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut prev_blank = false;
    for line in &lines {
        let blank = line.is_empty();
        if blank && prev_blank {
            continue;
        }
        out.push(line.as_str());
        prev_blank = blank;
    }

    out.join("\n").trim().to_string()
}

fn is_safe_char(c: char) -> bool {
    c.is_alphanumeric()
        || c.is_whitespace()
        || matches!(
            c,
            '.' | ','
                | ';'
                | ':'
                | '-'
                | '/'
                | '('
                | ')'
                | '['
                | ']'
                | '+'
                | '='
                | '%'
                | '#'
                | '@'
                | '&'
                | '\''
                | '"'
                | '!'
                | '?'
                | '*'
                | '_'
                | '$'
        )
}
