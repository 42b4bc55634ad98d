//! Text metrics derived from an article title.
//!
//! # Capital-word rule
//!
//! A token (maximal run of non-whitespace) is a capital word when its first
//! *alphabetic* character is uppercase. Leading non-alphabetic characters
//! (quotes, brackets, digits, punctuation) are skipped before the check, so
//! `"“Jackpot”"` and `"3M"` qualify while `"“jackpot”"` does not. Tokens with
//! no alphabetic character at all (`"2024"`, `"-"`) never qualify. Casing
//! follows Unicode, so `"Ñandú"` and `"Éire"` qualify.
//!
//! The token itself is kept verbatim, punctuation included.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleMetrics {
    pub word_count: usize,
    /// Unicode scalar values, internal whitespace included.
    pub char_count: usize,
    pub capital_words: Vec<String>,
}

impl TitleMetrics {
    /// Derive word count, character count and capital words from `title`.
    ///
    /// # Arguments
    ///
    /// * `title` - Headline text, normally already whitespace-collapsed
    ///
    /// # Returns
    ///
    /// Counts over whitespace-delimited tokens and Unicode scalar values, plus
    /// the capital words in title order with duplicates kept.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let m = TitleMetrics::derive("Breaking: Markets Rally as Rates Fall");
    /// assert_eq!(m.word_count, 6);
    /// assert_eq!(m.char_count, 37);
    /// assert_eq!(m.capital_words, ["Breaking:", "Markets", "Rally", "Rates", "Fall"]);
    /// ```
    pub fn derive(title: &str) -> Self {
        let capital_words = title
            .split_whitespace()
            .filter(|token| is_capital_word(token))
            .map(str::to_string)
            .collect();

        TitleMetrics {
            word_count: title.split_whitespace().count(),
            char_count: title.chars().count(),
            capital_words,
        }
    }
}

/// Whether `token` is a capital word under the rule in the module docs.
///
/// # Examples
///
/// ```ignore
/// assert!(is_capital_word("“Jackpot”"));
/// assert!(!is_capital_word("as"));
/// assert!(!is_capital_word("2024"));
/// ```
pub fn is_capital_word(token: &str) -> bool {
    token
        .chars()
        .find(|c| c.is_alphabetic())
        .is_some_and(char::is_uppercase)
}
