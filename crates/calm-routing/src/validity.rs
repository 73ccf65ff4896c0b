use calm_core::RouteReason;
use std::collections::BTreeSet;

/// Why a turn cannot be routed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnInsufficiency {
    TooShort,
    VagueInput,
    MissingEmotion,
}

impl TurnInsufficiency {
    pub fn reason(self) -> RouteReason {
        match self {
            Self::TooShort => RouteReason::TooShort,
            Self::VagueInput => RouteReason::VagueInput,
            Self::MissingEmotion => RouteReason::MissingEmotion,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnValidator {
    min_input_chars: usize,
    vague_inputs: BTreeSet<String>,
    vague_emotions: BTreeSet<String>,
}

impl TurnValidator {
    pub fn new<I, E>(min_input_chars: usize, vague_inputs: I, vague_emotions: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            min_input_chars,
            vague_inputs: vague_inputs
                .into_iter()
                .map(|value| canonical(value.as_ref()))
                .collect(),
            vague_emotions: vague_emotions
                .into_iter()
                .map(|value| value.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    /// `None` when the turn is good enough to route.
    ///
    /// An absent emotion is not a defect on its own; only an emotion the
    /// classifier reported as one of the vague labels is.
    pub fn assess(&self, input: &str, emotion: Option<&str>) -> Option<TurnInsufficiency> {
        let trimmed = input.trim();
        if trimmed.chars().count() < self.min_input_chars {
            return Some(TurnInsufficiency::TooShort);
        }
        if self.vague_inputs.contains(&canonical(trimmed)) {
            return Some(TurnInsufficiency::VagueInput);
        }
        if let Some(emotion) = emotion {
            if self.vague_emotions.contains(&emotion.trim().to_lowercase()) {
                return Some(TurnInsufficiency::MissingEmotion);
            }
        }
        None
    }
}

/// Lowercased, trimmed, with punctuation other than apostrophes dropped.
fn canonical(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|ch| ch.is_alphanumeric() || ch.is_whitespace() || *ch == '\'')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TurnValidator {
        TurnValidator::new(3, ["fine", "idk", "i don't know"], ["", "neutral"])
    }

    #[test]
    fn short_input_is_too_short() {
        assert_eq!(
            validator().assess(" ok ", Some("anxiety")),
            Some(TurnInsufficiency::TooShort)
        );
    }

    #[test]
    fn vague_inputs_match_after_normalization() {
        let validator = validator();
        assert_eq!(
            validator.assess("Fine.", None),
            Some(TurnInsufficiency::VagueInput)
        );
        assert_eq!(
            validator.assess("I don't know!!", None),
            Some(TurnInsufficiency::VagueInput)
        );
        assert_eq!(validator.assess("fine but tired", None), None);
    }

    #[test]
    fn vague_emotion_label_is_missing_emotion() {
        let validator = validator();
        assert_eq!(
            validator.assess("tell me something", Some("Neutral")),
            Some(TurnInsufficiency::MissingEmotion)
        );
        assert_eq!(validator.assess("tell me something", None), None);
        assert_eq!(
            TurnInsufficiency::MissingEmotion.reason(),
            RouteReason::MissingEmotion
        );
    }
}
