//! The time-string parser backing the swap state machine's structural conflict check.
//! Pure, restartable, and never panics: unparseable input yields an empty slot set,
//! which callers treat as "no conflict asserted" rather than an error.

use std::collections::HashSet;

use regex::Regex;

use crate::types::TimeSlot;

const FULL_WEEK_RANGE: std::ops::RangeInclusive<u8> = 1..=18;

/// Splits a multi-segment time string on its recognized separators.
fn split_segments(input: &str) -> Vec<&str> {
    input
        .split([',', ';', '，', '；', '/'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn week_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:第)?(\d+)(?:-(\d+))?周(单|双)?").expect("static regex is valid")
    })
}

fn period_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:第)?(\d+)(?:-(\d+))?节").expect("static regex is valid"))
}

fn weekday_from_str(segment: &str) -> Option<u8> {
    const CHINESE_DAYS: [(&str, u8); 7] = [
        ("星期一", 1),
        ("星期二", 2),
        ("星期三", 3),
        ("星期四", 4),
        ("星期五", 5),
        ("星期六", 6),
        ("星期日", 7),
    ];
    const CHINESE_WEEK_DAYS: [(&str, u8); 7] = [
        ("周一", 1),
        ("周二", 2),
        ("周三", 3),
        ("周四", 4),
        ("周五", 5),
        ("周六", 6),
        ("周日", 7),
    ];

    for (needle, day) in CHINESE_DAYS.iter().chain(CHINESE_WEEK_DAYS.iter()) {
        if segment.contains(needle) {
            return Some(*day);
        }
    }

    // A bare digit 1-7, e.g. from a segment like "周 3 5-6节".
    let digit_re = {
        static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
        RE.get_or_init(|| Regex::new(r"(?:星期|周)\s*([1-7])").expect("static regex is valid"))
    };
    digit_re
        .captures(segment)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
}

fn parse_week_set(segment: &str) -> HashSet<u8> {
    let Some(caps) = week_regex().captures(segment) else {
        return FULL_WEEK_RANGE.collect();
    };

    let start: u8 = match caps.get(1).and_then(|m| m.as_str().parse().ok()) {
        Some(n) => n,
        None => return HashSet::new(),
    };
    let end: u8 = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(start);

    if start > end {
        return HashSet::new();
    }

    let mut weeks: HashSet<u8> = (start..=end).collect();
    match caps.get(3).map(|m| m.as_str()) {
        Some("单") => weeks.retain(|w| w % 2 == 1),
        Some("双") => weeks.retain(|w| w % 2 == 0),
        _ => {}
    }

    weeks
}

fn parse_period_set(segment: &str) -> HashSet<u8> {
    let Some(caps) = period_regex().captures(segment) else {
        return HashSet::new();
    };

    let start: u8 = match caps.get(1).and_then(|m| m.as_str().parse().ok()) {
        Some(n) => n,
        None => return HashSet::new(),
    };
    let end: u8 = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(start);

    if start > end {
        return HashSet::new();
    }

    (start..=end).collect()
}

/// Parses a (possibly multi-segment) time-and-place string into its component time slots.
/// Never panics; a segment that can't be matched is skipped rather than aborting the whole
/// parse.
pub fn parse_time_slots(input: &str) -> Vec<TimeSlot> {
    let mut slots = Vec::new();
    for segment in split_segments(input) {
        let Some(day) = weekday_from_str(segment) else {
            continue;
        };
        let periods = parse_period_set(segment);
        if periods.is_empty() {
            continue;
        }
        let weeks = parse_week_set(segment);
        slots.push(TimeSlot {
            weeks,
            day,
            periods,
        });
    }

    slots
}

/// Two parsed slots conflict iff they share a weekday, an intersecting week set, and an
/// intersecting period set.
fn slots_conflict(a: &TimeSlot, b: &TimeSlot) -> bool {
    a.day == b.day
        && !a.weeks.is_disjoint(&b.weeks)
        && !a.periods.is_disjoint(&b.periods)
}

/// Whether any slot parsed from `a` conflicts with any slot parsed from `b`. Commutative by
/// construction. Missing/unparseable data on either side yields an
/// empty slot list, which can never conflict with anything — "no data" is treated as "no
/// conflict asserted" rather than an error.
pub fn time_strings_conflict(a: &str, b: &str) -> bool {
    let slots_a = parse_time_slots(a);
    let slots_b = parse_time_slots(b);
    slots_a
        .iter()
        .any(|sa| slots_b.iter().any(|sb| slots_conflict(sa, sb)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_single_segment() {
        let slots = parse_time_slots("1-18周 星期二 5-6节");
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].day, 2);
        assert_eq!(slots[0].weeks, (1..=18).collect::<HashSet<_>>());
        assert_eq!(slots[0].periods, HashSet::from([5, 6]));
    }

    #[test]
    fn odd_week_parity_and_alt_weekday_spelling() {
        let slots = parse_time_slots("1-17周(单) 周一 第3节");
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].day, 1);
        assert_eq!(slots[0].periods, HashSet::from([3]));
        let expected: HashSet<u8> = (1..=17).filter(|w| w % 2 == 1).collect();
        assert_eq!(slots[0].weeks, expected);
    }

    #[test]
    fn multi_segment_same_day() {
        let slots = parse_time_slots("1-9周 星期一 1-2节, 11-18周 星期一 1-2节");
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|s| s.day == 1));
        assert_eq!(slots[0].weeks, (1..=9).collect::<HashSet<_>>());
        assert_eq!(slots[1].weeks, (11..=18).collect::<HashSet<_>>());
    }

    #[test]
    fn conflict_detection_basic() {
        assert!(time_strings_conflict(
            "1-18周 星期二 5-6节",
            "1-9周 星期二 6-7节"
        ));
        assert!(!time_strings_conflict(
            "1-18周 星期二 5-6节",
            "1-18周 星期三 5-6节"
        ));
        assert!(!time_strings_conflict(
            "1-9周 星期二 5-6节",
            "11-18周 星期二 5-6节"
        ));
    }

    #[test]
    fn conflict_is_commutative() {
        let pairs = [
            ("1-18周 星期二 5-6节", "1-9周 星期二 6-7节"),
            ("1-18周 星期二 5-6节", "1-18周 星期三 5-6节"),
            ("1-9周 星期一 1-2节, 11-18周 星期一 1-2节", "1-18周 星期一 2节"),
        ];
        for (a, b) in pairs {
            assert_eq!(time_strings_conflict(a, b), time_strings_conflict(b, a));
        }
    }

    #[test]
    fn unparseable_input_yields_no_conflict() {
        assert!(!time_strings_conflict("garbage", "1-18周 星期二 5-6节"));
        assert!(parse_time_slots("garbage").is_empty());
    }
}
