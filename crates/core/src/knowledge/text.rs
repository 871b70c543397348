use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has",
    "have", "how", "i", "if", "in", "into", "is", "it", "its", "may", "me", "more", "must", "my",
    "no", "not", "of", "on", "or", "our", "please", "should", "so", "than", "that", "the",
    "their", "them", "then", "there", "these", "they", "this", "those", "to", "up", "us", "was",
    "we", "were", "what", "when", "where", "which", "while", "who", "why", "will", "with",
    "would", "you", "your",
    "في", "من", "على", "الى", "إلى", "عن", "مع", "هذا", "هذه", "ذلك", "التي", "الذي", "او", "أو",
    "ثم", "كل", "قد", "لا", "ما", "هل", "هو", "هي", "انا", "أنا", "نحن", "انت", "أنت", "كان",
];

/// Lowercased alphanumeric tokens. Apostrophes are dropped, so `don't`
/// becomes `dont`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '\''))
        .map(|token| token.replace('\'', ""))
        .filter(|token| !token.is_empty())
        .collect()
}

/// Folds common English inflections so `refunds`/`refunded` meet `refund`.
pub fn stem(token: &str) -> String {
    if !token.is_ascii() || token.len() <= 4 {
        return token.to_owned();
    }
    for suffix in ["ing", "ed", "es", "s"] {
        if let Some(stem) = token.strip_suffix(suffix) {
            if stem.len() >= 3 {
                return stem.to_owned();
            }
        }
    }
    token.to_owned()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Stemmed, stopword-free terms worth comparing between texts.
pub fn content_terms(text: &str) -> BTreeSet<String> {
    tokenize(text)
        .into_iter()
        .filter(|token| !is_stopword(token))
        .filter(|token| token.chars().count() >= 3 || token.chars().all(|ch| ch.is_ascii_digit()))
        .map(|token| stem(&token))
        .collect()
}

/// Every maximal digit run, e.g. `14` and `30` in "14 days, 30 JOD".
pub fn numbers(text: &str) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            current.push(ch);
        } else if !current.is_empty() {
            found.insert(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        found.insert(current);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::{content_terms, numbers, stem, tokenize};

    #[test]
    fn tokenize_lowercases_and_splits_on_punctuation() {
        assert_eq!(tokenize("Refunds: within 14-days!"), vec!["refunds", "within", "14", "days"]);
        assert_eq!(tokenize("Don't"), vec!["dont"]);
    }

    #[test]
    fn stemming_folds_plural_and_past_forms() {
        assert_eq!(stem("refunds"), "refund");
        assert_eq!(stem("refunded"), "refund");
        assert_eq!(stem("days"), "days");
        assert_eq!(stem("استرجاع"), "استرجاع");
    }

    #[test]
    fn content_terms_drop_stopwords_and_short_tokens() {
        let terms = content_terms("What is the refund window for returns? 14 days");
        assert!(terms.contains("refund"));
        assert!(terms.contains("return"));
        assert!(terms.contains("14"));
        assert!(!terms.contains("the"));
        assert!(!terms.contains("is"));
    }

    #[test]
    fn numbers_collects_digit_runs() {
        let found = numbers("Refunds within 14 days, fee 2.5 JOD");
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["14", "2", "5"]);
    }
}
