use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    En,
    Ar,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ar => "ar",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::En => "English",
            Self::Ar => "Arabic",
        }
    }

    /// Returns `None` for neutral input (digits, identifiers, punctuation)
    /// so the session lock waits for a message that actually has words.
    pub fn detect(text: &str) -> Option<Self> {
        let mut arabic = 0usize;
        let mut latin = 0usize;
        for ch in text.chars() {
            if ('\u{0600}'..='\u{06FF}').contains(&ch) && ch.is_alphabetic() {
                arabic += 1;
            } else if ch.is_ascii_alphabetic() {
                latin += 1;
            }
        }

        if arabic > 0 {
            return Some(Self::Ar);
        }
        if latin == 0 || looks_like_identifier(text) {
            return None;
        }
        Some(Self::En)
    }
}

fn looks_like_identifier(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.contains(char::is_whitespace)
        && trimmed.chars().filter(|ch| ch.is_ascii_digit()).count() >= 3
}

#[cfg(test)]
mod tests {
    use super::Language;

    #[test]
    fn detects_script_and_ignores_neutral_input() {
        assert_eq!(Language::detect("Where is my order?"), Some(Language::En));
        assert_eq!(Language::detect("وين طلبي؟"), Some(Language::Ar));
        assert_eq!(Language::detect("طلبي ORD-001"), Some(Language::Ar));
        assert_eq!(Language::detect("ORD-001"), None);
        assert_eq!(Language::detect("0791234567"), None);
        assert_eq!(Language::detect("?!"), None);
    }
}
