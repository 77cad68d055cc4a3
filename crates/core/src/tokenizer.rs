use once_cell::sync::Lazy;
use regex::Regex;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("non-word regex"));
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("word regex"));

/// Lower-cases `text`, blanks out punctuation and splits on whitespace.
///
/// No stemming and no stop-word filtering happen here.
pub fn tokenize(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let lowered = text.to_lowercase();
    NON_WORD
        .replace_all(&lowered, " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Every `\w+` run of the lower-cased text, in order of appearance.
pub fn words(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    WORD.find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}
