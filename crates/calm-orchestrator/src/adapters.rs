use crate::guidance;
use calm_core::{
    AcknowledgeRequest, AdapterError, ContentGenerator, EmotionClassifier, EmotionReading,
    RouteDecision, SelfCareArticle, SelfCareRequest, SelfCareSearch, TurnRecord,
};

const NEUTRAL_CONFIDENCE: f32 = 0.3;

const LEXICON: &[(&str, &[&str])] = &[
    (
        "anxiety",
        &[
            "anxious", "anxiety", "nervous", "worried", "worry", "panic", "panicking", "uneasy",
            "on edge",
        ],
    ),
    (
        "depression",
        &[
            "depressed", "depression", "hopeless", "empty", "numb", "worthless",
        ],
    ),
    (
        "grief",
        &["grief", "grieving", "mourning", "passed away", "lost my"],
    ),
    (
        "loneliness",
        &["lonely", "loneliness", "isolated", "alone", "no friends"],
    ),
    (
        "stress",
        &[
            "stress", "stressed", "overwhelmed", "pressure", "burnt out", "burned out",
            "exhausted",
        ],
    ),
    (
        "trauma",
        &["trauma", "traumatic", "traumatized", "flashback", "flashbacks", "abuse"],
    ),
    (
        "sadness",
        &["sad", "unhappy", "down", "crying", "upset", "heartbroken"],
    ),
    (
        "anger",
        &["angry", "furious", "mad", "annoyed", "frustrated", "rage"],
    ),
    (
        "fear",
        &["scared", "afraid", "fear", "terrified", "frightened"],
    ),
    (
        "shame",
        &["ashamed", "shame", "embarrassed", "guilty", "humiliated"],
    ),
    (
        "gratitude",
        &["grateful", "thankful", "gratitude", "appreciate"],
    ),
    (
        "joy",
        &["happy", "joy", "excited", "wonderful", "glad", "delighted", "lovely"],
    ),
    ("surprise", &["surprised", "shocked", "unexpected"]),
];

/// Lexicon classifier used when no model is wired in, and as the fallback
/// when one fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordEmotionClassifier;

impl KeywordEmotionClassifier {
    pub fn read(&self, text: &str, history: &[TurnRecord]) -> EmotionReading {
        let words = tokens(text);
        let mut best: Option<(&str, Vec<&str>)> = None;
        for (label, cues) in LEXICON {
            let hits = cues
                .iter()
                .copied()
                .filter(|cue| contains_phrase(&words, &tokens(cue)))
                .collect::<Vec<_>>();
            if hits.is_empty() {
                continue;
            }
            if best.as_ref().map_or(true, |(_, top)| hits.len() > top.len()) {
                best = Some((*label, hits));
            }
        }

        match best {
            Some((label, hits)) => EmotionReading {
                emotion: label.to_string(),
                confidence: (0.6 + 0.1 * (hits.len() as f32 - 1.0)).min(0.95),
                details: Some(format!("matched: {}", hits.join(", "))),
            },
            None => {
                let last_known = history
                    .iter()
                    .rev()
                    .find_map(|record| record.emotion.as_deref())
                    .filter(|emotion| !emotion.trim().is_empty());
                EmotionReading {
                    emotion: "neutral".to_string(),
                    confidence: NEUTRAL_CONFIDENCE,
                    details: Some(match last_known {
                        Some(emotion) => format!("no emotional cues; earlier turns showed {emotion}"),
                        None => "no emotional cues".to_string(),
                    }),
                }
            }
        }
    }
}

impl EmotionClassifier for KeywordEmotionClassifier {
    fn classify(&self, text: &str, history: &[TurnRecord]) -> Result<EmotionReading, AdapterError> {
        Ok(self.read(text, history))
    }
}

/// Template replies standing in for a generative model.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateContentGenerator;

impl TemplateContentGenerator {
    pub fn acknowledgement(&self, decision: RouteDecision, emotion: Option<&str>) -> String {
        let emotion = emotion
            .map(str::trim)
            .filter(|emotion| !emotion.is_empty() && *emotion != "neutral");
        match (decision, emotion) {
            (RouteDecision::Appointment, Some(emotion)) => format!(
                "It sounds like you're dealing with {emotion}. Talking it through with a professional can really help."
            ),
            (RouteDecision::Appointment, None) => {
                "Thank you for reaching out about getting support.".to_string()
            }
            (RouteDecision::SelfCare, Some(emotion)) => {
                format!("Thank you for sharing. It sounds like you're feeling {emotion}.")
            }
            (RouteDecision::SelfCare, None) => {
                "Thank you for sharing how you're feeling.".to_string()
            }
            _ => "I'm here with you.".to_string(),
        }
    }

    pub fn suggestion(&self, request: &SelfCareRequest) -> String {
        let base = guidance::baseline_suggestion(&request.emotion);
        match request.articles.first() {
            Some(article) => match &article.url {
                Some(url) => format!(
                    "{base} You might also find this helpful: {} ({url})",
                    article.title
                ),
                None => format!("{base} You might also find this helpful: {}", article.title),
            },
            None => base.to_string(),
        }
    }
}

impl ContentGenerator for TemplateContentGenerator {
    fn acknowledge(&self, request: &AcknowledgeRequest) -> Result<String, AdapterError> {
        Ok(self.acknowledgement(request.decision, request.emotion.as_deref()))
    }

    fn self_care(&self, request: &SelfCareRequest) -> Result<String, AdapterError> {
        Ok(self.suggestion(request))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSelfCareSearch;

impl SelfCareSearch for NoopSelfCareSearch {
    fn search(&self, _emotion: &str) -> Result<Vec<SelfCareArticle>, AdapterError> {
        Ok(Vec::new())
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '\''))
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_phrase(words: &[String], phrase: &[String]) -> bool {
    !phrase.is_empty() && words.windows(phrase.len()).any(|window| window == phrase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn keyword_reading_picks_strongest_label() {
        let reading = KeywordEmotionClassifier.read("I feel anxious about my exam", &[]);
        assert_eq!(reading.emotion, "anxiety");
        assert!(reading.confidence >= 0.5);

        let reading = KeywordEmotionClassifier.read(
            "so stressed and overwhelmed, a bit sad too",
            &[],
        );
        assert_eq!(reading.emotion, "stress");
        assert!((reading.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn no_cues_reads_as_low_confidence_neutral() {
        let history = vec![TurnRecord {
            timestamp: Utc
                .with_ymd_and_hms(2026, 1, 5, 8, 0, 0)
                .single()
                .expect("timestamp"),
            user_input: "earlier".to_string(),
            agent_output: "reply".to_string(),
            emotion: Some("grief".to_string()),
            details: None,
            suggestion: None,
        }];
        let reading = KeywordEmotionClassifier.read("tell me about meditation", &history);
        assert_eq!(reading.emotion, "neutral");
        assert!(reading.confidence < 0.5);
        assert!(reading
            .details
            .as_deref()
            .is_some_and(|details| details.contains("grief")));
    }

    #[test]
    fn template_suggestion_mentions_first_article() {
        let request = SelfCareRequest {
            emotion: "anxiety".to_string(),
            user_input: "exam tomorrow".to_string(),
            articles: vec![SelfCareArticle {
                title: "Box breathing".to_string(),
                url: Some("https://example.org/box".to_string()),
                content: String::new(),
            }],
        };
        let suggestion = TemplateContentGenerator.suggestion(&request);
        assert!(suggestion.starts_with("Try a 4-7-8 breathing exercise"));
        assert!(suggestion.contains("Box breathing (https://example.org/box)"));
    }

    #[test]
    fn acknowledgement_matches_decision() {
        let generator = TemplateContentGenerator;
        assert!(generator
            .acknowledgement(RouteDecision::Appointment, Some("grief"))
            .contains("grief"));
        assert_eq!(
            generator.acknowledgement(RouteDecision::SelfCare, Some("neutral")),
            "Thank you for sharing how you're feeling."
        );
    }
}
