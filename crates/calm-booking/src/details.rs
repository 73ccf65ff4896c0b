use crate::replies::tokens;
use calm_core::{SessionMode, Slot, Therapist, TimeOfDay};

const ANY_TIME: &[&str] = &["any time", "anytime", "whenever", "flexible"];
const MORNING: &[&str] = &["morning"];
const AFTERNOON: &[&str] = &["afternoon", "lunch", "midday"];
const EVENING: &[&str] = &["evening", "night", "tonight", "after work"];

const ONLINE: &[&str] = &["online", "video", "virtual", "remote", "zoom"];
const IN_PERSON: &[&str] = &["in person", "face to face", "office", "clinic"];

const FOCUS_SYNONYMS: &[(&str, &str)] = &[
    ("anxious", "anxiety"),
    ("depressed", "depression"),
    ("stressed", "stress"),
    ("lonely", "loneliness"),
    ("grieving", "grief"),
    ("traumatized", "trauma"),
];

const ORDINALS: &[&str] = &["first", "second", "third", "fourth", "fifth"];

const NEGATIONS: &[&str] = &[
    "not", "no", "don't", "dont", "can't", "cant", "cannot", "never", "without",
];
/// Skipped when looking back for a negation: "not in the morning".
const FILLER: &[&str] = &["a", "an", "the", "in", "at", "do", "be", "really", "want", "like"];

/// True when some phrase of the vocabulary appears without a negation in
/// front of it.
fn mentions(words: &[String], vocabulary: &[&str]) -> bool {
    vocabulary.iter().any(|phrase| {
        let phrase = tokens(phrase);
        !phrase.is_empty()
            && words.len() >= phrase.len()
            && words
                .windows(phrase.len())
                .enumerate()
                .any(|(start, window)| window == phrase.as_slice() && !negated(words, start))
    })
}

fn negated(words: &[String], start: usize) -> bool {
    words[..start]
        .iter()
        .rev()
        .find(|word| !FILLER.contains(&word.as_str()))
        .is_some_and(|word| NEGATIONS.contains(&word.as_str()))
}

pub fn extract_time(text: &str) -> Option<TimeOfDay> {
    let words = tokens(text);
    if mentions(&words, ANY_TIME) {
        Some(TimeOfDay::Any)
    } else if mentions(&words, MORNING) {
        Some(TimeOfDay::Morning)
    } else if mentions(&words, AFTERNOON) {
        Some(TimeOfDay::Afternoon)
    } else if mentions(&words, EVENING) {
        Some(TimeOfDay::Evening)
    } else {
        None
    }
}

/// "in-person" tokenizes to "in person", so both spellings match.
pub fn extract_mode(text: &str) -> Option<SessionMode> {
    let words = tokens(text);
    if mentions(&words, ONLINE) {
        Some(SessionMode::Online)
    } else if mentions(&words, IN_PERSON) {
        Some(SessionMode::InPerson)
    } else {
        None
    }
}

/// First known emotion label (or common adjective form) in the text.
pub fn extract_focus(text: &str, known: &[String]) -> Option<String> {
    for word in tokens(text) {
        if let Some((_, label)) = FOCUS_SYNONYMS.iter().find(|(form, _)| *form == word) {
            return Some(label.to_string());
        }
        if known.iter().any(|label| label.eq_ignore_ascii_case(&word)) {
            return Some(word);
        }
    }
    None
}

/// 1-based position from a bare number or ordinal word.
fn pick_index(words: &[String], len: usize) -> Option<usize> {
    words.iter().find_map(|word| {
        let position = word
            .parse::<usize>()
            .ok()
            .or_else(|| {
                ORDINALS
                    .iter()
                    .position(|ordinal| *ordinal == word.as_str())
                    .map(|i| i + 1)
            })?;
        (1..=len).contains(&position).then(|| position - 1)
    })
}

/// Resolves a therapist reply by number or by a whole name token.
pub fn resolve_therapist(reply: &str, candidates: &[Therapist]) -> Option<usize> {
    let words = tokens(reply);
    if let Some(index) = pick_index(&words, candidates.len()) {
        return Some(index);
    }

    candidates.iter().position(|therapist| {
        tokens(&therapist.name)
            .into_iter()
            .filter(|part| part.chars().count() >= 3 && part != "dr")
            .any(|part| words.contains(&part))
    })
}

/// Resolves a slot reply by full label, by a unique HH:MM, or by number.
pub fn resolve_slot(reply: &str, slots: &[Slot]) -> Option<usize> {
    let lowered = reply.trim().to_lowercase();
    if let Some(index) = slots.iter().position(|slot| lowered.contains(&slot.label())) {
        return Some(index);
    }

    if let Some(clock) = find_clock(&lowered) {
        let hits = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.starts_at.format("%H:%M").to_string() == clock)
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        return match hits.as_slice() {
            [index] => Some(*index),
            _ => None,
        };
    }

    pick_index(&tokens(&lowered), slots.len())
}

/// First `H:MM` or `HH:MM` in the text, zero-padded.
fn find_clock(text: &str) -> Option<String> {
    let chars = text.chars().collect::<Vec<_>>();
    for (colon, ch) in chars.iter().enumerate() {
        if *ch != ':' || colon == 0 {
            continue;
        }
        let start = chars[..colon]
            .iter()
            .rposition(|c| !c.is_ascii_digit())
            .map_or(0, |i| i + 1);
        let hour = chars[start..colon].iter().collect::<String>();
        let minute = chars
            .get(colon + 1..colon + 3)
            .map(|m| m.iter().collect::<String>())
            .unwrap_or_default();
        if hour.is_empty()
            || hour.len() > 2
            || minute.len() != 2
            || !minute.chars().all(|c| c.is_ascii_digit())
        {
            continue;
        }
        let hour = hour.parse::<u32>().ok()?;
        if hour < 24 {
            return Some(format!("{hour:02}:{minute}"));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use calm_core::SLOT_FORMAT;
    use chrono::NaiveDateTime;

    fn therapist(id: i64, name: &str) -> Therapist {
        Therapist {
            id,
            name: name.to_string(),
            specialties: vec!["anxiety".to_string()],
            rating: 4.5,
            city: "Pune".to_string(),
            online: true,
            in_person: true,
        }
    }

    fn slot(label: &str) -> Slot {
        Slot {
            therapist_id: 1,
            starts_at: NaiveDateTime::parse_from_str(label, SLOT_FORMAT).expect("slot"),
        }
    }

    #[test]
    fn time_of_day_phrases() {
        assert_eq!(extract_time("mornings work best"), None);
        assert_eq!(extract_time("Morning please"), Some(TimeOfDay::Morning));
        assert_eq!(extract_time("around lunch"), Some(TimeOfDay::Afternoon));
        assert_eq!(extract_time("after work is easier"), Some(TimeOfDay::Evening));
        assert_eq!(extract_time("any time, evening even"), Some(TimeOfDay::Any));
        assert_eq!(extract_time("no idea"), None);
    }

    #[test]
    fn negated_mentions_are_skipped() {
        assert_eq!(
            extract_time("not in the morning, evening works"),
            Some(TimeOfDay::Evening)
        );
        assert_eq!(extract_time("never at night"), None);
        assert_eq!(
            extract_mode("not online, in person please"),
            Some(SessionMode::InPerson)
        );
        assert_eq!(
            extract_mode("I'd rather not do video, the clinic is fine"),
            Some(SessionMode::InPerson)
        );
        assert_eq!(
            extract_mode("online, not in person"),
            Some(SessionMode::Online)
        );
        assert_eq!(extract_mode("no problem with zoom"), Some(SessionMode::Online));
    }

    #[test]
    fn session_mode_phrases() {
        assert_eq!(extract_mode("a Zoom call"), Some(SessionMode::Online));
        assert_eq!(extract_mode("in-person please"), Some(SessionMode::InPerson));
        assert_eq!(extract_mode("face to face"), Some(SessionMode::InPerson));
        assert_eq!(extract_mode("personally"), None);
    }

    #[test]
    fn focus_maps_adjectives_to_labels() {
        let known = vec!["anxiety".to_string(), "grief".to_string()];
        assert_eq!(
            extract_focus("I'm anxious all the time", &known).as_deref(),
            Some("anxiety")
        );
        assert_eq!(
            extract_focus("dealing with Grief", &known).as_deref(),
            Some("grief")
        );
        assert_eq!(extract_focus("just tired", &known), None);
    }

    #[test]
    fn therapist_by_number_ordinal_or_name() {
        let candidates = vec![
            therapist(1, "Dr. Meera Kapoor"),
            therapist(2, "Dr. Rohan Iyer"),
        ];
        assert_eq!(resolve_therapist("2", &candidates), Some(1));
        assert_eq!(resolve_therapist("the first one", &candidates), Some(0));
        assert_eq!(resolve_therapist("rohan", &candidates), Some(1));
        assert_eq!(resolve_therapist("Dr. Meera Kapoor", &candidates), Some(0));
        assert_eq!(resolve_therapist("dr", &candidates), None);
        assert_eq!(resolve_therapist("dr.", &candidates), None);
        assert_eq!(resolve_therapist("mee", &candidates), None);
        assert_eq!(resolve_therapist("hmm", &candidates), None);
        assert_eq!(resolve_therapist("7", &candidates), None);
    }

    #[test]
    fn slot_by_label_clock_or_number() {
        let slots = vec![
            slot("2025-06-27 19:00"),
            slot("2025-06-29 17:30"),
            slot("2025-07-01 19:00"),
        ];
        assert_eq!(resolve_slot("2025-06-29 17:30 please", &slots), Some(1));
        assert_eq!(resolve_slot("17:30", &slots), Some(1));
        assert_eq!(resolve_slot("19:00", &slots), None);
        assert_eq!(resolve_slot("3", &slots), Some(2));
        assert_eq!(resolve_slot("tomorrow", &slots), None);
    }
}
