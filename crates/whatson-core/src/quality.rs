use whatson_schema::{present, EventRecord};

/// A name is worth scoring when it is longer than three characters or is an
/// acronym (2-4 uppercase letters). Anything shorter is OCR noise like a
/// stray "THE" picked off a poster.
pub fn is_meaningful_name(name: &str) -> bool {
    let name = name.trim();
    name.chars().count() > 3 || is_acronym(name)
}

pub fn is_acronym(name: &str) -> bool {
    let len = name.chars().count();
    (2..=4).contains(&len) && name.chars().all(|c| c.is_ascii_uppercase())
}

/// Completeness score before flooring. Short non-acronym names drag the raw
/// score negative so that populated-but-noisy records still rank below the
/// listing threshold.
pub fn raw_score(record: &EventRecord) -> i32 {
    let mut score = 0;

    if let Some(name) = present(&record.name) {
        if name.chars().count() <= 3 && !is_acronym(name) {
            score -= 20;
        }
        if is_meaningful_name(name) {
            score += 30;
        }
    }

    if present(&record.date_raw).is_some() {
        score += 25;
    }
    if present(&record.location).is_some() {
        score += 20;
    }
    if present(&record.time).is_some() {
        score += 10;
    }
    if present(&record.organizer).is_some() {
        score += 10;
    }
    if present(&record.website).is_some() {
        score += 5;
    }

    score
}

/// External score, floored at zero.
pub fn score(record: &EventRecord) -> i32 {
    raw_score(record).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_record() -> EventRecord {
        let mut record = EventRecord::new("1", "Sunburn Arena");
        record.date_raw = "7th February".into();
        record.location = "Gachibowli Stadium".into();
        record.time = "6 PM".into();
        record.organizer = "Percept Live".into();
        record.website = "https://sunburn.in".into();
        record
    }

    #[test]
    fn complete_record_scores_full_marks() {
        assert_eq!(score(&full_record()), 100);
    }

    #[test]
    fn short_noisy_name_goes_negative_internally() {
        let mut record = full_record();
        record.name = "Th".into();
        assert_eq!(raw_score(&record), 50); // -20 name, +70 other fields
        record = EventRecord::new("1", "Th");
        assert_eq!(raw_score(&record), -20);
        assert_eq!(score(&record), 0);
    }

    #[test]
    fn acronym_names_count_as_meaningful() {
        let mut record = EventRecord::new("1", "TEDX");
        assert_eq!(score(&record), 30);
        record.name = "IPL".into();
        assert_eq!(score(&record), 30);
        record.name = "ipl".into();
        assert_eq!(raw_score(&record), -20);
    }

    #[test]
    fn na_fields_count_as_absent() {
        let mut record = full_record();
        record.location = "N/A".into();
        record.website = "".into();
        assert_eq!(score(&record), 75);
    }

    #[test]
    fn score_never_negative_externally() {
        let record = EventRecord::new("1", "ab");
        assert!(raw_score(&record) < 0);
        assert_eq!(score(&record), 0);
    }
}
