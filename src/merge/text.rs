//! Transcript text cleanup
//!
//! Recognizer output carries artifacts: stray glyphs, doubled punctuation,
//! uneven spacing. Cleanup keeps accented letters intact since transcripts
//! are frequently non-English.

/// Characters that survive the glyph filter besides letters and digits.
const KEPT_PUNCTUATION: &str = ".,!?-:;()[]{}\"'";

/// Normalize one segment's text.
///
/// Collapses whitespace, folds repeated sentence punctuation, strips
/// non-linguistic glyphs and capitalizes the first letter. Returns an
/// empty string when nothing linguistic remains.
pub fn clean_text(text: &str) -> String {
    let filtered: String = text
        .chars()
        .filter(|c| {
            c.is_alphabetic() || c.is_numeric() || c.is_whitespace() || KEPT_PUNCTUATION.contains(*c)
        })
        .collect();

    let collapsed = filtered.split_whitespace().collect::<Vec<_>>().join(" ");
    let folded = fold_repeated_punctuation(&collapsed);
    capitalize_first(&folded)
}

/// `..`+ becomes `...`; `!!`+ and `??`+ become a single mark.
fn fold_repeated_punctuation(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '.' || c == '!' || c == '?' {
            let mut run = 1;
            while chars.peek() == Some(&c) {
                chars.next();
                run += 1;
            }
            if c == '.' && run >= 2 {
                output.push_str("...");
            } else {
                output.push(c);
            }
        } else {
            output.push(c);
        }
    }
    output
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
