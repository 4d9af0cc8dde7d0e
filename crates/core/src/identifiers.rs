//! Case numbering schemes: judicial (check-digited), administrative and the
//! internal dash-dot form, plus the matching rules used to decide whether a
//! document belongs to an archive.

use crate::models::{DocumentIdentifiers, JudicialTally};
use crate::text::{digits_only, window};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub static JUDICIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{7}-\d{2}\.\d{4}\.\d\.\d{2}\.\d{4}").expect("valid regex"));
static JUDICIAL_FULL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{7}-\d{2}\.\d{4}\.\d\.\d{2}\.\d{4}$").expect("valid regex"));
static ADMIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"20\d{8}").expect("valid regex"));
static ADMIN_LEGACY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"20\d{2}[\.\-/ ]?\d{3,6}").expect("valid regex"));
static INTERNAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{5,7}-\d{2}\.\d{4}\.\d\.\d{2}").expect("valid regex"));
static INTERNAL_FULL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{5,7}-\d{2}\.\d{4}\.\d\.\d{2}$").expect("valid regex"));
static INTERNAL_LOOSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{5,7})\s*-\s*(\d{2})[.\-\s]*(\d{4})[.\-\s]*(\d)[.\-\s]*(\d{2})")
        .expect("valid regex")
});
static JUDICIAL_TAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\.\d{4}").expect("valid regex"));
static LOOSE_TAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[.\-]\d{3}").expect("valid regex"));

/// Keywords that make a judicial number look like the case under discussion.
pub const CNJ_CONTEXT_KEYWORDS: [&str; 8] = [
    "nos autos",
    "processo",
    "perito",
    "honor",
    "autor",
    "promovente",
    "promovido",
    "requisição",
];
pub const CNJ_CONTEXT_RADIUS: usize = 120;

/// Shortest digit string for which a prefix relation counts as a match.
pub const MIN_PREFIX_DIGITS: usize = 6;

/// ISO 7064 mod 97-10 check digits for the 18 digits of a judicial number
/// without its check digits (sequence, year, segment, tribunal, origin).
pub fn judicial_check_digits(base: &str) -> Option<u32> {
    if base.len() != 18 || !base.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let remainder = base
        .bytes()
        .fold(0u32, |acc, digit| (acc * 10 + u32::from(digit - b'0')) % 97);
    Some(98 - (remainder * 100) % 97)
}

/// Whether a formatted judicial number carries the check digits its other
/// digits produce.
pub fn is_valid_judicial(value: &str) -> bool {
    let value = value.trim();
    if !JUDICIAL_FULL_RE.is_match(value) {
        return false;
    }
    let digits = digits_only(value);
    if digits.len() != 20 {
        return false;
    }
    let stored = &digits[7..9];
    let base = format!("{}{}", &digits[..7], &digits[9..]);
    judicial_check_digits(&base).is_some_and(|expected| format!("{expected:02}") == stored)
}

/// Judicial-format numbers in text order, valid or not.
pub fn judicial_matches(text: &str) -> impl Iterator<Item = &str> {
    JUDICIAL_RE.find_iter(text).map(|found| found.as_str())
}

fn has_judicial_tail(text: &str, end: usize) -> bool {
    JUDICIAL_TAIL_RE.is_match(&text[end..])
}

fn format_loose_groups(captures: &regex::Captures<'_>) -> String {
    format!(
        "{}-{}.{}.{}.{}",
        &captures[1], &captures[2], &captures[3], &captures[4], &captures[5]
    )
}

/// Loose internal numbers, skipping matches that continue into a judicial
/// origin block.
fn loose_internal_matches(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut position = 0;
    while position <= text.len() {
        let Some(captures) = INTERNAL_LOOSE_RE.captures_at(text, position) else {
            break;
        };
        let Some(whole) = captures.get(0) else {
            break;
        };
        if LOOSE_TAIL_RE.is_match(&text[whole.end()..]) {
            position = next_char_start(text, whole.start());
            continue;
        }
        found.push(format_loose_groups(&captures));
        position = whole.end();
    }
    found
}

fn next_char_start(text: &str, index: usize) -> usize {
    text[index..]
        .chars()
        .next()
        .map(|c| index + c.len_utf8())
        .unwrap_or(text.len() + 1)
}

/// Internal-scheme numbers found in the text, as digit strings.
pub fn internal_numbers(text: &str) -> BTreeSet<String> {
    let mut numbers = BTreeSet::new();
    for found in INTERNAL_RE.find_iter(text) {
        if has_judicial_tail(text, found.end()) {
            continue;
        }
        numbers.insert(digits_only(found.as_str()));
    }
    for formatted in loose_internal_matches(text) {
        numbers.insert(digits_only(&formatted));
    }
    numbers
}

pub fn judicial_numbers(text: &str) -> BTreeSet<String> {
    JUDICIAL_RE
        .find_iter(text)
        .map(|found| digits_only(found.as_str()))
        .collect()
}

pub fn admin_numbers(text: &str) -> BTreeSet<String> {
    let mut numbers: BTreeSet<String> = ADMIN_RE
        .find_iter(text)
        .map(|found| found.as_str().to_string())
        .collect();
    for found in ADMIN_LEGACY_RE.find_iter(text) {
        let digits = digits_only(found.as_str());
        if digits.len() >= 7 {
            numbers.insert(digits);
        }
    }
    numbers
}

/// First administrative number, in display form.
pub fn first_admin_number(text: &str) -> Option<String> {
    if let Some(found) = ADMIN_RE.find(text) {
        return Some(found.as_str().to_string());
    }
    ADMIN_LEGACY_RE
        .find(text)
        .map(|found| format_admin_number(&digits_only(found.as_str())))
}

/// `2021123456` stays as is; a legacy `2021012` becomes `2021.012`.
pub fn format_admin_number(digits: &str) -> String {
    if digits.len() <= 4 || digits.len() == 10 {
        return digits.to_string();
    }
    format!("{}.{}", &digits[..4], &digits[4..])
}

/// Occurrence counts and context bonus of every judicial number in the text.
pub fn judicial_tally(text: &str) -> BTreeMap<String, JudicialTally> {
    let lowered = text.to_lowercase();
    let comparable = lowered.len() == text.len();
    let mut tally: BTreeMap<String, JudicialTally> = BTreeMap::new();

    for found in JUDICIAL_RE.find_iter(text) {
        let digits = digits_only(found.as_str());
        let around = if comparable {
            window(
                &lowered,
                found.start().saturating_sub(CNJ_CONTEXT_RADIUS),
                found.end() + CNJ_CONTEXT_RADIUS,
            )
            .to_string()
        } else {
            window(
                text,
                found.start().saturating_sub(CNJ_CONTEXT_RADIUS),
                found.end() + CNJ_CONTEXT_RADIUS,
            )
            .to_lowercase()
        };
        let bonus = CNJ_CONTEXT_KEYWORDS
            .iter()
            .filter(|keyword| around.contains(*keyword))
            .count() as u32;

        let entry = tally.entry(digits).or_insert_with(|| JudicialTally {
            display: found.as_str().to_string(),
            count: 0,
            context: 0,
        });
        entry.count += 1;
        entry.context += bonus;
    }
    tally
}

pub fn scan_identifiers(text: &str) -> DocumentIdentifiers {
    DocumentIdentifiers {
        internal: internal_numbers(text),
        judicial: judicial_numbers(text),
        admin: admin_numbers(text),
        judicial_tally: judicial_tally(text),
    }
}

/// Recovers an internal number in display form from a filename fragment such
/// as `000219_17.2025.8.15` or `000219_17_2025_8_15`.
pub fn format_internal_candidate(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(found) = INTERNAL_RE.find(raw) {
        return Some(found.as_str().to_string());
    }

    let tokens: Vec<&str> = raw.split('_').filter(|token| !token.is_empty()).collect();
    if tokens.len() >= 5 && tokens[..5].iter().all(|token| token.chars().all(|c| c.is_ascii_digit())) {
        let candidate = format!(
            "{}-{}.{}.{}.{}",
            tokens[0], tokens[1], tokens[2], tokens[3], tokens[4]
        );
        if INTERNAL_FULL_RE.is_match(&candidate) {
            return Some(candidate);
        }
    }

    if let Some((first, rest)) = raw.split_once('_') {
        let candidate = format!("{first}-{}", rest.replace('_', "."));
        if INTERNAL_FULL_RE.is_match(&candidate) {
            return Some(candidate);
        }
    }

    INTERNAL_LOOSE_RE
        .captures(raw)
        .map(|captures| format_loose_groups(&captures))
}

/// Identifiers an archive is expected to contain, derived from its filename.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedIdentifiers {
    pub normalized: BTreeSet<String>,
    /// Display forms in filename order, keyed by digits.
    pub display: Vec<(String, String)>,
}

impl ExpectedIdentifiers {
    /// Splits the stem on `_SEI_` and recovers an internal number from each
    /// piece.
    pub fn from_archive_name(name: &str) -> Self {
        let stem = Path::new(name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(name);

        let pieces: Vec<&str> = stem.split("_SEI_").collect();
        let candidates = if pieces.len() == 2 { pieces } else { vec![stem] };

        let mut expected = Self::default();
        for raw in candidates {
            if let Some(formatted) = format_internal_candidate(raw) {
                let digits = digits_only(&formatted);
                if expected.normalized.insert(digits.clone()) {
                    expected.display.push((digits, formatted));
                }
            }
        }
        expected
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    pub fn primary_display(&self) -> Option<&str> {
        self.display.first().map(|(_, display)| display.as_str())
    }
}

/// Splits a number into (sequence, 9-digit year/segment/tribunal tail), using
/// the first 16 digits of a full judicial number.
fn structural_parts(digits: &str) -> Option<(&str, &str)> {
    let core = if digits.len() == 20 { &digits[..16] } else { digits };
    if !(14..=16).contains(&core.len()) {
        return None;
    }
    let split = core.len() - 9;
    Some((&core[..split], &core[split..]))
}

/// Two digit strings identify the same case when they are equal, when the
/// shorter (of at least [`MIN_PREFIX_DIGITS`] digits) prefixes the longer, or
/// when they share year, segment and tribunal and one sequence number (leading
/// zeros stripped) ends with the other.
pub fn numbers_match(left: &str, right: &str) -> bool {
    if left.is_empty() || right.is_empty() {
        return false;
    }
    if left == right {
        return true;
    }

    let (shorter, longer) = if left.len() <= right.len() {
        (left, right)
    } else {
        (right, left)
    };
    if shorter.len() >= MIN_PREFIX_DIGITS && longer.starts_with(shorter) {
        return true;
    }

    match (structural_parts(left), structural_parts(right)) {
        (Some((left_seq, left_tail)), Some((right_seq, right_tail))) if left_tail == right_tail => {
            let left_seq = left_seq.trim_start_matches('0');
            let right_seq = right_seq.trim_start_matches('0');
            !left_seq.is_empty()
                && !right_seq.is_empty()
                && (left_seq.ends_with(right_seq) || right_seq.ends_with(left_seq))
        }
        _ => false,
    }
}

pub fn matches_any<'a>(
    values: impl IntoIterator<Item = &'a String>,
    reference: &BTreeSet<String>,
) -> bool {
    values
        .into_iter()
        .any(|value| reference.iter().any(|known| numbers_match(value, known)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_digits_follow_mod_97() {
        assert!(is_valid_judicial("0800219-12.2025.8.15.0001"));
        assert!(is_valid_judicial("0801234-50.2024.8.15.0001"));
        assert!(!is_valid_judicial("0800219-17.2025.8.15.0001"));
        assert!(!is_valid_judicial("0800219-12.2025.8.15"));
    }

    #[test]
    fn internal_numbers_skip_judicial_tails() {
        let text = "Processo nº 0800219-17.2025.8.15.0001 e SEI 000219-17.2025.8.15";
        let numbers = internal_numbers(text);
        assert_eq!(numbers.len(), 1);
        assert!(numbers.contains("000219172025815"));
    }

    #[test]
    fn loose_variant_recovers_malformed_separators() {
        let numbers = internal_numbers("SEI nº 000219 - 17 2025.8 15 em tramitação");
        assert!(numbers.contains("000219172025815"));
    }

    #[test]
    fn legacy_admin_numbers_need_seven_digits() {
        let numbers = admin_numbers("Proc. 2021/0123 e 2019-12 e 2023456789");
        assert!(numbers.contains("20210123"));
        assert!(numbers.contains("2023456789"));
        assert!(!numbers.contains("201912"));
        assert_eq!(format_admin_number("20210123"), "2021.0123");
        assert_eq!(format_admin_number("2023456789"), "2023456789");
    }

    #[test]
    fn expected_identifiers_come_from_both_filename_halves() {
        let expected =
            ExpectedIdentifiers::from_archive_name("000219-17.2025.8.15.0001_SEI_000219_17.2025.8.15.zip");
        assert_eq!(expected.normalized.len(), 1);
        assert_eq!(expected.primary_display(), Some("000219-17.2025.8.15"));

        let underscored = ExpectedIdentifiers::from_archive_name("000219_17_2025_8_15.zip");
        assert_eq!(underscored.primary_display(), Some("000219-17.2025.8.15"));

        assert!(ExpectedIdentifiers::from_archive_name("sem_numero.zip").is_empty());
    }

    #[test]
    fn judicial_number_matches_internal_number_of_same_case() {
        assert!(numbers_match("08002191720258150001", "000219172025815"));
        assert!(!numbers_match("08002191720248150001", "000219172025815"));
        assert!(!numbers_match("08002201720258150001", "000219172025815"));
    }

    #[test]
    fn prefix_match_needs_six_digits() {
        assert!(numbers_match("202112", "2021123456"));
        assert!(!numbers_match("20211", "2021123456"));
    }

    #[test]
    fn tally_counts_occurrences_and_context() {
        let text = "Nos autos do processo 0801234-50.2024.8.15.0001.\n\n\
                    Ver 0801234-50.2024.8.15.0001 e 0800001-18.2024.8.15.0001";
        let tally = judicial_tally(text);
        let main = &tally["08012345020248150001"];
        assert_eq!(main.count, 2);
        assert!(main.context >= 2);
        assert_eq!(main.display, "0801234-50.2024.8.15.0001");
        assert_eq!(tally.len(), 2);
    }
}
