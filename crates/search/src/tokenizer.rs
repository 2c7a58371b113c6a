//! Shared tokenizer (§4.8): splits on non-alphanumeric boundaries,
//! lowercases, drops tokens shorter than 2 characters. Grounded in the
//! teacher's `crates/engine/src/search/tokenizer.rs` pipeline shape, but
//! without the teacher's stemming/stopword stages — §4.8 only asks for
//! the normalize-and-filter step; stopwording is §4.11's job, scoped to
//! keyword extraction rather than the general-purpose tokenizer that
//! both indexing and querying share.

/// Tokenize `text`, returning at most `max_tokens` tokens in order.
pub fn tokenize(text: &str, max_tokens: usize) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars().chain(std::iter::once(' ')) {
        if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            if current.len() >= 2 {
                tokens.push(std::mem::take(&mut current));
                if tokens.len() >= max_tokens {
                    return tokens;
                }
            } else {
                current.clear();
            }
        }
    }
    tokens
}

/// `tokenize` with no cap on the number of returned tokens.
pub fn tokenize_all(text: &str) -> Vec<String> {
    tokenize(text, usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_punctuation_and_lowercases() {
        assert_eq!(tokenize_all("Hello, World!"), vec!["hello", "world"]);
    }

    #[test]
    fn drops_single_char_tokens() {
        assert_eq!(tokenize_all("I am a test"), vec!["am", "test"]);
    }

    #[test]
    fn keeps_alphanumeric_runs_together() {
        assert_eq!(tokenize_all("test123 foo456bar"), vec!["test123", "foo456bar"]);
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(tokenize_all("").is_empty());
        assert!(tokenize_all("...---...").is_empty());
    }

    #[test]
    fn respects_max_tokens_cap() {
        assert_eq!(tokenize("alpha beta gamma delta", 2), vec!["alpha", "beta"]);
    }
}
