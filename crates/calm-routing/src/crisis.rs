/// Static crisis reply. Never produced by an external service.
pub const CRISIS_TEMPLATE: &str = "I'm really sorry you're feeling this way. You're not alone, and there are people who care about you and want to help.\n\n\
Please reach out to someone you trust or contact a mental health professional.\n\n\
If you're in immediate danger, please call your local emergency services or a suicide prevention hotline:\n\n\
India Helpline: 9152987821 (iCall)\n\
International: https://findahelpline.com\n\n\
You don't have to go through this alone.";

pub const DEFAULT_CRISIS_PHRASES: &[&str] = &[
    "suicidal",
    "suicide",
    "want to die",
    "end my life",
    "kill myself",
    "no point living",
    "self harm",
    "no will to live",
    "hurt myself",
    "better off dead",
];

/// Keyword scan for self-harm risk language. Pure and dependency-free.
#[derive(Debug, Clone)]
pub struct CrisisGate {
    phrases: Vec<String>,
}

impl Default for CrisisGate {
    fn default() -> Self {
        Self::new(DEFAULT_CRISIS_PHRASES.iter().copied())
    }
}

impl CrisisGate {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|phrase| normalize(phrase.as_ref()))
            .filter(|phrase| !phrase.is_empty())
            .collect();
        Self { phrases }
    }

    pub fn check(&self, raw_text: &str) -> bool {
        let text = normalize(raw_text);
        self.phrases.iter().any(|phrase| text.contains(phrase))
    }

    /// Phrases found in the text, in lexicon order.
    pub fn matches(&self, raw_text: &str) -> Vec<String> {
        let text = normalize(raw_text);
        self.phrases
            .iter()
            .filter(|phrase| text.contains(phrase.as_str()))
            .cloned()
            .collect()
    }
}

/// Lowercase, hyphens as spaces, whitespace runs collapsed.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .replace('-', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
