//! Heuristic extraction of booking fields from caller utterances.
//!
//! Transcripts are short, informal and often mis-punctuated, so each
//! extractor looks for one narrow pattern and gives up quickly. Anything
//! the extractors miss is still available to the model, which collects the
//! same fields conversationally and passes them in its function calls.

use crate::fields::Field;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};

/// Values found in one utterance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub service_type: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

impl Extracted {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

const NAME_PREFIXES: &[&str] = &["my name is ", "my name's ", "name is ", "this is ", "i'm ", "i am "];

/// Words that follow "i'm" / "this is" without being a name.
const NOT_NAMES: &[&str] = &[
    "a", "about", "afraid", "an", "and", "at", "available", "away", "because", "busy", "calling",
    "cold", "concerned", "fine", "free", "from", "glad", "going", "gonna", "good", "happy",
    "having", "here", "home", "hot", "i", "in", "interested", "just", "looking", "my", "need",
    "needing", "not", "ok", "okay", "on", "out", "really", "so", "sorry", "still", "sure", "the",
    "trying", "urgent", "very", "with", "wondering", "worried", "emergency", "it",
];

const STREET_WORDS: &[&str] = &[
    "street", "st", "avenue", "ave", "road", "rd", "drive", "dr", "lane", "ln", "way", "court",
    "ct", "boulevard", "blvd", "place", "pl", "circle", "cir", "terrace", "parkway", "pkwy",
    "highway", "hwy", "trail", "square", "loop",
];

const SERVICE_PHRASES: &[&str] = &[
    "air condition", "heat pump", "heater", "heating", "furnace", "boiler", "thermostat", "leak",
    "pipe", "drain", "clog", "toilet", "sink", "faucet", "plumb", "electric", "outlet",
    "breaker", "wiring", "roof", "repair", "install", "maintenance", "tune-up", "tune up",
    "inspection", "broken", "not working", "stopped working", "won't turn on", "isn't working",
];

const SERVICE_WORDS: &[&str] = &["ac", "a/c", "hvac"];

/// Extracts whatever fields `text` contains.
///
/// `expected` is the field the agent most recently asked for; an utterance
/// with no recognisable pattern is taken as the answer to it.
pub fn extract(text: &str, expected: Option<Field>, today: NaiveDate) -> Extracted {
    let mut out = Extracted {
        phone: find_phone(text),
        address: find_address(text),
        service_type: find_service(text),
        ..Extracted::default()
    };
    out.name = find_name(text);
    if let Some((date, time)) = resolve_when(text, today) {
        out.date = date;
        out.time = time;
    }

    if out.is_empty() {
        let answer = clean(text);
        let words = answer.split_whitespace().count();
        match expected {
            Some(Field::Name) if (1..=3).contains(&words) && is_alphabetic_words(&answer) => {
                out.name = Some(title_case(&answer));
            }
            Some(Field::Address) if words >= 2 && answer.chars().any(|c| c.is_ascii_digit()) => {
                out.address = Some(answer);
            }
            Some(Field::ServiceType) if words >= 3 => {
                out.service_type = Some(answer);
            }
            _ => {}
        }
    }
    out
}

fn clean(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', '!', '?', ','])
        .trim()
        .to_string()
}

fn trim_word(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-' && c != '/')
}

fn is_alphabetic_words(text: &str) -> bool {
    text.split_whitespace()
        .all(|w| w.chars().all(|c| c.is_alphabetic() || c == '\'' || c == '-' || c == '.'))
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A run of at least ten digits, separators allowed in between.
pub fn find_phone(text: &str) -> Option<String> {
    let mut best: Option<String> = None;
    let mut run = String::new();
    let mut flush = |run: &mut String| {
        if run.len() >= 10 && best.as_ref().map_or(true, |b| run.len() > b.len()) {
            best = Some(run.clone());
        }
        run.clear();
    };
    let mut in_run = false;
    for c in text.chars() {
        if c.is_ascii_digit() {
            run.push(c);
            in_run = true;
        } else if in_run && matches!(c, ' ' | '-' | '.' | '(' | ')' | '+') {
            continue;
        } else {
            flush(&mut run);
            in_run = false;
        }
    }
    flush(&mut run);
    best
}

fn find_name(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    for prefix in NAME_PREFIXES {
        let mut search_from = 0;
        while let Some(found) = lower[search_from..].find(prefix) {
            let start = search_from + found;
            search_from = start + prefix.len();
            let at_boundary = start == 0
                || !lower[..start]
                    .chars()
                    .next_back()
                    .is_some_and(|c| c.is_alphanumeric());
            if !at_boundary {
                continue;
            }

            let mut words = Vec::new();
            for raw in text[start + prefix.len()..].split_whitespace().take(3) {
                let word = trim_word(raw);
                let lowered = word.to_ascii_lowercase();
                if word.is_empty()
                    || NOT_NAMES.contains(&lowered.as_str())
                    || !word.chars().all(|c| c.is_alphabetic() || c == '\'' || c == '-')
                {
                    break;
                }
                words.push(word);
                if raw.ends_with([',', '.', '!', '?']) {
                    break;
                }
            }
            if !words.is_empty() {
                return Some(title_case(&words.join(" ")));
            }
        }
    }
    None
}

/// A house number followed within a few words by a street suffix.
pub fn find_address(text: &str) -> Option<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    for (i, raw) in tokens.iter().enumerate() {
        let number = trim_word(raw);
        if number.is_empty() || number.len() > 6 || !number.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let end = (i + 6).min(tokens.len().saturating_sub(1));
        for j in i + 1..=end {
            let word = trim_word(tokens[j]).to_ascii_lowercase();
            if STREET_WORDS.contains(&word.as_str()) {
                let mut address = tokens[i..=j].join(" ");
                address = address
                    .trim_start_matches(|c: char| !c.is_ascii_digit())
                    .trim_end_matches([',', '.', '!', '?'])
                    .to_string();
                return Some(address);
            }
            if tokens[j].ends_with([',', '.', '!', '?']) && j > i + 1 {
                break;
            }
        }
    }
    None
}

fn find_service(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let phrase = SERVICE_PHRASES.iter().any(|p| lower.contains(p));
    let word = lower
        .split_whitespace()
        .any(|w| SERVICE_WORDS.contains(&trim_word(w)));
    if !(phrase || word) {
        return None;
    }
    let mut description = clean(text);
    if description.len() > 160 {
        let mut cut = 160;
        while !description.is_char_boundary(cut) {
            cut -= 1;
        }
        description.truncate(cut);
    }
    Some(description)
}

fn weekday_from(word: &str) -> Option<Weekday> {
    Some(match word {
        "monday" => Weekday::Mon,
        "tuesday" => Weekday::Tue,
        "wednesday" => Weekday::Wed,
        "thursday" => Weekday::Thu,
        "friday" => Weekday::Fri,
        "saturday" => Weekday::Sat,
        "sunday" => Weekday::Sun,
        _ => return None,
    })
}

/// Resolves relative day and time phrases against `today`.
///
/// Returns `None` when neither a day nor a time is mentioned.
pub fn resolve_when(text: &str, today: NaiveDate) -> Option<(Option<NaiveDate>, Option<NaiveTime>)> {
    let lower = text.to_ascii_lowercase();
    let words: Vec<&str> = lower.split_whitespace().map(trim_word).collect();

    let mut date = None;
    if lower.contains("day after tomorrow") {
        date = Some(today + Duration::days(2));
    } else if words.contains(&"tomorrow") {
        date = Some(today + Duration::days(1));
    } else if words.contains(&"today") || words.contains(&"tonight") {
        date = Some(today);
    } else if let Some(day) = words.iter().find_map(|w| weekday_from(w)) {
        let ahead = (day.num_days_from_monday() as i64 - today.weekday().num_days_from_monday() as i64)
            .rem_euclid(7);
        date = Some(today + Duration::days(if ahead == 0 { 7 } else { ahead }));
    } else if let Some(d) = words
        .iter()
        .find_map(|w| NaiveDate::parse_from_str(w, "%Y-%m-%d").ok())
    {
        date = Some(d);
    }

    let time = find_clock_time(&words).or_else(|| {
        if words.contains(&"morning") {
            NaiveTime::from_hms_opt(9, 0, 0)
        } else if words.contains(&"noon") || words.contains(&"lunchtime") {
            NaiveTime::from_hms_opt(12, 0, 0)
        } else if words.contains(&"afternoon") {
            NaiveTime::from_hms_opt(14, 0, 0)
        } else if words.contains(&"evening") || words.contains(&"tonight") {
            NaiveTime::from_hms_opt(17, 0, 0)
        } else {
            None
        }
    });

    if date.is_none() && time.is_none() {
        return None;
    }
    Some((date, time))
}

/// `3pm`, `3:30pm`, `3 pm`, `10:15 a.m.`
fn find_clock_time(words: &[&str]) -> Option<NaiveTime> {
    for (i, word) in words.iter().enumerate() {
        let (clock, suffix) = match split_meridiem(word) {
            Some((clock, suffix)) if !clock.is_empty() => (clock, suffix),
            _ => match words.get(i + 1).and_then(|next| split_meridiem(next)) {
                Some(("", suffix)) => (*word, suffix),
                _ => continue,
            },
        };
        let parsed = match clock.split_once(':') {
            Some((h, m)) => h.parse::<u32>().ok().zip(m.parse::<u32>().ok()),
            None => clock.parse::<u32>().ok().map(|h| (h, 0)),
        };
        let Some((hour, minute)) = parsed else {
            continue;
        };
        if !(1..=12).contains(&hour) || minute > 59 {
            continue;
        }
        let hour = match (suffix, hour) {
            (Meridiem::Am, 12) => 0,
            (Meridiem::Am, h) => h,
            (Meridiem::Pm, 12) => 12,
            (Meridiem::Pm, h) => h + 12,
        };
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }
    None
}

#[derive(Debug, Clone, Copy)]
enum Meridiem {
    Am,
    Pm,
}

fn split_meridiem(word: &str) -> Option<(&str, Meridiem)> {
    for (suffix, m) in [
        ("a.m", Meridiem::Am),
        ("p.m", Meridiem::Pm),
        ("am", Meridiem::Am),
        ("pm", Meridiem::Pm),
    ] {
        if let Some(clock) = word.strip_suffix(suffix) {
            if clock.chars().all(|c| c.is_ascii_digit() || c == ':') {
                return Some((clock, m));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        // A Saturday.
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    #[test]
    fn phone_needs_ten_digits() {
        assert_eq!(find_phone("It's 555 867 5309."), Some("5558675309".to_string()));
        assert_eq!(find_phone("call (555) 867-5309 please"), Some("5558675309".to_string()));
        assert_eq!(find_phone("it's 95 degrees"), None);
        assert_eq!(find_phone("42 Maple Street"), None);
    }

    #[test]
    fn name_after_introduction() {
        assert_eq!(find_name("My name is Dana Reyes."), Some("Dana Reyes".to_string()));
        assert_eq!(find_name("hi this is jordan"), Some("Jordan".to_string()));
        assert_eq!(find_name("I'm Sam, and my heater broke"), Some("Sam".to_string()));
    }

    #[test]
    fn introductions_that_are_not_names() {
        assert_eq!(find_name("I'm at 42 Maple Street"), None);
        assert_eq!(find_name("this is an emergency"), None);
        assert_eq!(find_name("I'm calling because my AC broke"), None);
        assert_eq!(find_name("Jim's here"), None);
    }

    #[test]
    fn address_needs_number_and_street_word() {
        assert_eq!(
            find_address("I'm at 42 Maple Street in Springfield."),
            Some("42 Maple Street".to_string())
        );
        assert_eq!(
            find_address("1600 Pennsylvania Ave."),
            Some("1600 Pennsylvania Ave".to_string())
        );
        assert_eq!(find_address("it's 95 degrees and I smell something burning"), None);
    }

    #[test]
    fn service_description_from_problem_statement() {
        assert!(find_service("my AC stopped working today").is_some());
        assert!(find_service("the water heater is leaking").is_some());
        assert!(find_service("I'd like to come back later").is_none());
    }

    #[test]
    fn relative_days_and_parts_of_day() {
        let tomorrow = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        assert_eq!(
            resolve_when("Tomorrow afternoon works.", today()),
            Some((Some(tomorrow), NaiveTime::from_hms_opt(14, 0, 0)))
        );
        assert_eq!(
            resolve_when("how about monday at 10am", today()),
            Some((
                NaiveDate::from_ymd_opt(2026, 10, 19),
                NaiveTime::from_hms_opt(10, 0, 0)
            ))
        );
        assert_eq!(
            resolve_when("saturday", today()),
            Some((NaiveDate::from_ymd_opt(2026, 10, 24), None))
        );
        assert_eq!(
            resolve_when("3:30 p.m. is fine", today()),
            Some((None, NaiveTime::from_hms_opt(15, 30, 0)))
        );
        assert_eq!(resolve_when("it's 95 degrees", today()), None);
    }

    #[test]
    fn bare_answer_fills_the_expected_field() {
        let out = extract("Dana Reyes.", Some(Field::Name), today());
        assert_eq!(out.name.as_deref(), Some("Dana Reyes"));

        let out = extract("Dana Reyes.", Some(Field::Phone), today());
        assert!(out.is_empty());
    }
}
