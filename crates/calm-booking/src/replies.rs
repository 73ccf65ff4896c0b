#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Affirmative,
    Negative,
    Unclear,
}

/// Yes/no/cancel classification by whole-word phrase match.
#[derive(Debug, Clone)]
pub struct ReplyClassifier {
    affirmative: Vec<Vec<String>>,
    negative: Vec<Vec<String>>,
    cancel: Vec<Vec<String>>,
}

impl ReplyClassifier {
    pub fn new(affirmative: &[String], negative: &[String], cancel: &[String]) -> Self {
        Self {
            affirmative: phrases(affirmative),
            negative: phrases(negative),
            cancel: phrases(cancel),
        }
    }

    /// Negative phrases are checked first, so "sure, but not now" declines.
    /// A one-word negative only counts when it opens the reply: "no, later"
    /// declines, "yes, no problem" does not.
    pub fn classify(&self, reply: &str) -> ReplyKind {
        let words = tokens(reply);
        if self
            .negative
            .iter()
            .any(|phrase| negative_match(&words, phrase))
        {
            return ReplyKind::Negative;
        }
        if self
            .affirmative
            .iter()
            .any(|phrase| contains_phrase(&words, phrase))
        {
            return ReplyKind::Affirmative;
        }
        ReplyKind::Unclear
    }

    pub fn is_cancel(&self, reply: &str) -> bool {
        let words = tokens(reply);
        self.cancel
            .iter()
            .any(|phrase| contains_phrase(&words, phrase))
    }
}

fn negative_match(words: &[String], phrase: &[String]) -> bool {
    match phrase {
        [word] => words.first() == Some(word),
        _ => contains_phrase(words, phrase),
    }
}

fn phrases(values: &[String]) -> Vec<Vec<String>> {
    values
        .iter()
        .map(|value| tokens(value))
        .filter(|phrase| !phrase.is_empty())
        .collect()
}

/// Lowercase words; anything but letters, digits and apostrophes separates.
pub(crate) fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '\''))
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn contains_phrase(words: &[String], phrase: &[String]) -> bool {
    !phrase.is_empty()
        && words.len() >= phrase.len()
        && words.windows(phrase.len()).any(|window| window == phrase)
}
