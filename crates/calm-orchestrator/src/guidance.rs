//! Static per-emotion guidance. Unknown emotions fall back to the `other` entry.

const TAILORED_PROMPTS: &[(&str, &str)] = &[
    (
        "anxiety",
        "It's okay to feel anxious. Would you like to try a calming exercise?",
    ),
    (
        "joy",
        "That's wonderful! Would you like to reflect on what brought you joy?",
    ),
    (
        "shame",
        "Remember, everyone makes mistakes. Would you like to talk about it?",
    ),
    (
        "gratitude",
        "Gratitude is powerful. Want to express it to someone?",
    ),
    (
        "sadness",
        "It's okay to feel sad. Would you like some support or a self-care tip?",
    ),
    (
        "anger",
        "Anger is a valid emotion. Would you like to try a grounding technique?",
    ),
    (
        "fear",
        "Facing fears is brave. Would you like to explore this feeling?",
    ),
    (
        "surprise",
        "Surprises can be good or bad. Want to share more?",
    ),
    (
        "other",
        "How are you feeling right now? Would you like to talk more?",
    ),
];

const FORECASTS: &[(&str, &str)] = &[
    (
        "anxiety",
        "You may feel calmer if you practice relaxation techniques.",
    ),
    ("joy", "Your positive mood is likely to continue!"),
    (
        "gratitude",
        "Expressing gratitude can boost your well-being.",
    ),
    ("shame", "Self-compassion may help you feel better soon."),
    ("sadness", "Connecting with others may lift your mood."),
    (
        "anger",
        "Taking time to cool off can help you regain balance.",
    ),
    ("fear", "Facing your fears gradually can reduce anxiety."),
    ("surprise", "Processing surprises can help you adapt."),
    ("other", "Your mood may shift, so check in with yourself later."),
];

const BASELINE_SUGGESTIONS: &[(&str, &str)] = &[
    (
        "anxiety",
        "Try a 4-7-8 breathing exercise: breathe in for 4, hold for 7, exhale for 8.",
    ),
    (
        "depression",
        "Consider a gentle walk outside, even just for 5 minutes, or reach out to someone you trust.",
    ),
    (
        "joy",
        "Reflect on what brought you joy. Consider writing about it or sharing with someone.",
    ),
    (
        "gratitude",
        "Write a short thank-you message to someone who has made a difference in your life.",
    ),
    (
        "shame",
        "Practice self-compassion. Everyone makes mistakes, and they're part of growth.",
    ),
    (
        "sadness",
        "Allow yourself to feel sad, it's valid. Try gentle movement or connecting with a friend.",
    ),
    (
        "anger",
        "Take 5 deep breaths before reacting. Consider writing down your feelings first.",
    ),
    (
        "fear",
        "Try grounding: name 5 things you can see, 4 you can touch, 3 you can hear, 2 you can smell, 1 you can taste.",
    ),
    (
        "stress",
        "Try progressive muscle relaxation: tense and release each muscle group for 5 seconds.",
    ),
    (
        "loneliness",
        "Reach out to one person today, even with a simple 'thinking of you' message.",
    ),
    (
        "grief",
        "Honor your feelings. Consider creating a small ritual or memory to acknowledge your loss.",
    ),
    (
        "overwhelm",
        "Break down your tasks into smaller steps. Focus on just one thing at a time.",
    ),
    (
        "other",
        "Take a moment to check in with yourself and acknowledge how you're feeling.",
    ),
];

fn lookup(table: &'static [(&'static str, &'static str)], emotion: &str) -> &'static str {
    let emotion = emotion.trim().to_lowercase();
    table
        .iter()
        .find(|(label, _)| *label == emotion)
        .or_else(|| table.iter().find(|(label, _)| *label == "other"))
        .map_or("", |(_, text)| *text)
}

pub fn tailored_prompt(emotion: &str) -> &'static str {
    lookup(TAILORED_PROMPTS, emotion)
}

pub fn forecast(emotion: &str) -> &'static str {
    lookup(FORECASTS, emotion)
}

pub fn baseline_suggestion(emotion: &str) -> &'static str {
    lookup(BASELINE_SUGGESTIONS, emotion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_emotions_get_their_own_entry() {
        assert!(tailored_prompt("Anxiety").contains("calming exercise"));
        assert!(forecast("anxiety").contains("calmer"));
        assert!(baseline_suggestion("stress").contains("muscle relaxation"));
    }

    #[test]
    fn unknown_emotions_use_other() {
        assert_eq!(tailored_prompt("boredom"), tailored_prompt("other"));
        assert_eq!(forecast(""), forecast("other"));
        assert_eq!(
            baseline_suggestion("trauma"),
            "Take a moment to check in with yourself and acknowledge how you're feeling."
        );
    }
}
