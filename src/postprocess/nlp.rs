//! Local text analysis: word tokenization and noun-phrase-like fragments.
//!
//! Nothing here touches the network, so these operators keep working when
//! the translation service is down.

use std::{collections::HashSet, sync::LazyLock};

use rake::{Rake, StopWords};
use unicode_segmentation::UnicodeSegmentation as _;

/// Common English function words. A fragment never contains one of these.
static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "about", "above", "after", "again", "against", "all", "also", "am", "an",
        "and", "any", "are", "aren't", "as", "at", "be", "because", "been", "before",
        "being", "below", "between", "both", "but", "by", "can", "can't", "cannot",
        "could", "couldn't", "did", "didn't", "do", "does", "doesn't", "doing", "don't",
        "down", "during", "each", "either", "else", "ever", "every", "few", "for", "from",
        "further", "had", "hadn't", "has", "hasn't", "have", "haven't", "having", "he",
        "he'd", "he'll", "he's", "her", "here", "here's", "hers", "herself", "him",
        "himself", "his", "how", "how's", "however", "i", "i'd", "i'll", "i'm", "i've",
        "if", "in", "into", "is", "isn't", "it", "it's", "its", "itself", "just", "let's",
        "may", "me", "might", "more", "most", "must", "mustn't", "my", "myself", "neither",
        "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other",
        "ought", "our", "ours", "ourselves", "out", "over", "own", "same", "shall",
        "shan't", "she", "she'd", "she'll", "she's", "should", "shouldn't", "so", "some",
        "such", "than", "that", "that's", "the", "their", "theirs", "them", "themselves",
        "then", "there", "there's", "these", "they", "they'd", "they'll", "they're",
        "they've", "this", "those", "though", "through", "to", "too", "under", "until",
        "up", "upon", "us", "very", "was", "wasn't", "we", "we'd", "we'll", "we're",
        "we've", "were", "weren't", "what", "what's", "when", "when's", "where",
        "where's", "whether", "which", "while", "who", "who's", "whom", "whose", "why",
        "why's", "will", "with", "within", "without", "won't", "would", "wouldn't", "yet",
        "you", "you'd", "you'll", "you're", "you've", "your", "yours", "yourself",
        "yourselves",
    ]
    .into_iter()
    .collect()
});

/// A RAKE extractor using [`STOPWORDS`].
static RAKE: LazyLock<Rake> = LazyLock::new(|| {
    Rake::new(StopWords::from(
        STOPWORDS
            .iter()
            .map(|word| (*word).to_owned())
            .collect::<HashSet<String>>(),
    ))
});

/// Split text into words, in order. Punctuation and whitespace are dropped.
pub fn words(text: &str) -> Vec<&str> {
    text.unicode_words().collect()
}

/// All words of `text` in original order, as a comma-separated list.
pub fn extract_keywords(text: &str) -> String {
    words(text).join(", ")
}

/// Noun-phrase-like fragments of `text`.
///
/// Fragments are the RAKE candidate phrases of two or more words, which are
/// delimited by stopwords and punctuation. Line breaks also end a fragment.
/// Fragments are lowercased and returned once each, in the order they first
/// appear.
pub fn summarize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase().replace(['\r', '\n'], ". ");
    let mut seen = HashSet::new();
    let mut phrases = RAKE
        .run(&lowered)
        .into_iter()
        .map(|keyword_score| keyword_score.keyword.to_lowercase())
        .filter(|phrase| phrase.split_whitespace().count() >= 2)
        .filter(|phrase| seen.insert(phrase.clone()))
        .map(|phrase| (lowered.find(&phrase).unwrap_or(usize::MAX), phrase))
        .collect::<Vec<_>>();
    phrases.sort();
    phrases.into_iter().map(|(_, phrase)| phrase).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_keep_every_word_in_order() {
        assert_eq!(
            extract_keywords("Hello, World! It's a fine day.\nSee you at ten."),
            "Hello, World, It's, a, fine, day, See, you, at, ten"
        );
        assert_eq!(extract_keywords("  ... !!! "), "");
    }

    #[test]
    fn summary_keeps_multi_word_phrases() {
        assert_eq!(
            summarize("The quick brown fox jumps over the lazy dog."),
            ["quick brown fox jumps", "lazy dog"]
        );
    }

    #[test]
    fn summary_breaks_at_punctuation_and_lines() {
        assert_eq!(
            summarize("Invoice Number\nDue Date, Total Amount"),
            ["invoice number", "due date", "total amount"]
        );
    }

    #[test]
    fn summary_deduplicates_case_insensitively() {
        assert_eq!(
            summarize("Machine learning is fun. MACHINE LEARNING is hard."),
            ["machine learning"]
        );
    }

    #[test]
    fn summary_of_degenerate_text_is_empty() {
        assert!(summarize("").is_empty());
        assert!(summarize("Hello").is_empty());
        assert!(summarize("to be or not to be").is_empty());
    }

    #[test]
    fn summary_is_deterministic() {
        let text = "Optical character recognition converts scanned paper documents.";
        assert_eq!(summarize(text), summarize(text));
    }
}
