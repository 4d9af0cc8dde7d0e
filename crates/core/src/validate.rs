//! Plausibility checks run once per archive after merging. Failing values are
//! cleared and reported as observations; validation never aborts an archive.

use crate::config::ExtractionConfig;
use crate::fees::format_currency;
use crate::fields::invalid_check_digit_note;
use crate::heuristics::{extract_percentage, format_date, format_percentage, parse_date};
use crate::identifiers::{is_valid_judicial, matches_any, ExpectedIdentifiers};
use crate::models::{ExtractionResult, Field, FieldCandidate};
use crate::text::digits_only;
use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;

const DATE_FIELDS: [Field; 3] = [
    Field::RequisitionDate,
    Field::AdvanceDate,
    Field::AuthorizationDate,
];
const CURRENCY_FIELDS: [Field; 3] = [Field::ArbitratedValue, Field::AmountPaid, Field::BalanceDue];

pub const MISSING_DEFENDANT_NOTE: &str = "Promovido ausente; revisar manualmente";

static CURRENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"R\$\s*([0-9\.\s]{1,15},\d{2})").expect("valid regex"));
static PERCENT_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([0-9]{1,3}(?:[.,][0-9]{1,2})?)\s*%?\s*$").expect("valid regex")
});

fn all_same(digits: &str) -> bool {
    let mut chars = digits.chars();
    match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => true,
    }
}

fn digit_values(digits: &str) -> Vec<u32> {
    digits.chars().filter_map(|c| c.to_digit(10)).collect()
}

pub fn is_valid_cpf(value: &str) -> bool {
    let digits = digits_only(value);
    if digits.len() != 11 || all_same(&digits) {
        return false;
    }
    let numbers = digit_values(&digits);
    let check = |count: usize| {
        let sum: u32 = numbers[..count]
            .iter()
            .zip((2..=count as u32 + 1).rev())
            .map(|(digit, weight)| digit * weight)
            .sum();
        let rest = 11 - sum % 11;
        if rest >= 10 {
            0
        } else {
            rest
        }
    };
    check(9) == numbers[9] && check(10) == numbers[10]
}

pub fn is_valid_cnpj(value: &str) -> bool {
    let digits = digits_only(value);
    if digits.len() != 14 || all_same(&digits) {
        return false;
    }
    let numbers = digit_values(&digits);
    let check = |count: usize| {
        let weights = (2..=count as u32 - 7).rev().chain((2..=9).rev());
        let sum: u32 = numbers[..count]
            .iter()
            .zip(weights)
            .map(|(digit, weight)| digit * weight)
            .sum();
        let rest = sum % 11;
        if rest < 2 {
            0
        } else {
            11 - rest
        }
    };
    check(12) == numbers[12] && check(13) == numbers[13]
}

/// CPF (11 digits) or CNPJ (14 digits) with matching check digits.
pub fn is_valid_tax_id(value: &str) -> bool {
    match digits_only(value).len() {
        11 => is_valid_cpf(value),
        14 => is_valid_cnpj(value),
        _ => false,
    }
}

pub fn validate_date(value: &str, config: &ExtractionConfig) -> Option<String> {
    let date = parse_date(value)?;
    (config.min_year..=config.max_year)
        .contains(&date.year())
        .then(|| format_date(date))
}

pub fn validate_currency(value: &str, config: &ExtractionConfig) -> Option<String> {
    let captures = CURRENCY_RE.captures(value)?;
    let raw: String = captures[1]
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .collect();
    let amount: f64 = raw.replace(',', ".").parse().ok()?;
    (config.currency_min..=config.currency_max)
        .contains(&amount)
        .then(|| format_currency(amount))
}

pub fn validate_percentage(value: &str) -> Option<String> {
    let captures = PERCENT_VALUE_RE.captures(value)?;
    let amount: f64 = captures[1].replace(',', ".").parse().ok()?;
    (0.0..=100.0)
        .contains(&amount)
        .then(|| format_percentage(amount))
}

/// Clears or normalises each checked field in place.
pub fn validate_result(
    result: &mut ExtractionResult,
    expected: &ExpectedIdentifiers,
    full_text: &str,
    config: &ExtractionConfig,
) {
    if let Some(number) = result.get(Field::CaseNumber).map(str::to_string) {
        if !is_valid_judicial(&number) {
            result.clear(Field::CaseNumber);
            result.observe(invalid_check_digit_note(&number));
        } else if !expected.is_empty() && !matches_any([&digits_only(&number)], &expected.normalized) {
            result.observe(format!("Processo divergente do ZIP: {number}"));
        }
    }

    if let Some(tax_id) = result.get(Field::ExpertTaxId).map(str::to_string) {
        if !is_valid_tax_id(&tax_id) {
            result.observe(format!("Documento suspeito: {tax_id}"));
            result.clear(Field::ExpertTaxId);
        }
    }

    for field in DATE_FIELDS {
        revise(result, field, |value| validate_date(value, config), |value| {
            format!("Data suspeita em {}: {value}", field.column())
        });
    }

    for field in CURRENCY_FIELDS {
        revise(result, field, |value| validate_currency(value, config), |value| {
            format!("Valor suspeito em {}: {value}", field.column())
        });
    }

    revise(result, Field::Percentage, validate_percentage, |value| {
        format!("Percentual suspeito: {value}")
    });
    if !result.has(Field::Percentage) {
        if let Some(percentage) = extract_percentage(full_text) {
            result.set(
                FieldCandidate::new(Field::Percentage, percentage, "combined")
                    .with_pattern("percentual_texto")
                    .with_weight(0.5)
                    .located_in(Some(full_text)),
            );
        }
    }

    if !result.has(Field::Defendant) {
        result.observe(MISSING_DEFENDANT_NOTE);
    }
}

/// Rewrites a stored value to its normalised form, or clears it with an
/// observation when the check fails.
fn revise(
    result: &mut ExtractionResult,
    field: Field,
    check: impl Fn(&str) -> Option<String>,
    note: impl Fn(&str) -> String,
) {
    let Some(value) = result.get(field).map(str::to_string) else {
        return;
    };
    match check(&value) {
        Some(fixed) => result.rewrite(field, fixed),
        None => {
            result.observe(note(&value));
            result.clear(field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn put(result: &mut ExtractionResult, field: Field, value: &str) {
        result.set(FieldCandidate::new(field, value, "doc.txt"));
    }

    #[test]
    fn tax_id_checksums() {
        assert!(is_valid_cpf("111.444.777-35"));
        assert!(!is_valid_cpf("111.444.777-36"));
        assert!(!is_valid_cpf("111.111.111-11"));
        assert!(is_valid_cnpj("11.222.333/0001-81"));
        assert!(!is_valid_cnpj("11.222.333/0001-82"));
        assert!(is_valid_tax_id("11222333000181"));
        assert!(!is_valid_tax_id("123"));
    }

    #[test]
    fn values_are_normalised_or_cleared() {
        let config = ExtractionConfig {
            max_year: 2030,
            ..ExtractionConfig::default()
        };
        let mut result = ExtractionResult::new();
        put(&mut result, Field::ExpertTaxId, "123.456.789-00");
        put(&mut result, Field::AdvanceDate, "5-mar-25");
        put(&mut result, Field::AuthorizationDate, "01/01/1999");
        put(&mut result, Field::ArbitratedValue, "R$ 1200,5");
        put(&mut result, Field::AmountPaid, "R$ 1.200,00 (mil e duzentos)");
        put(&mut result, Field::BalanceDue, "R$ 5,00");
        put(&mut result, Field::Percentage, "120%");
        put(&mut result, Field::Defendant, "Banco Sul");

        validate_result(&mut result, &ExpectedIdentifiers::default(), "Percentual: 30%", &config);

        assert_eq!(result.get(Field::ExpertTaxId), None);
        assert_eq!(result.get(Field::AdvanceDate), Some("05/03/2025"));
        assert_eq!(result.get(Field::AuthorizationDate), None);
        assert_eq!(result.get(Field::ArbitratedValue), None);
        assert_eq!(result.get(Field::AmountPaid), Some("R$ 1.200,00"));
        assert_eq!(result.get(Field::BalanceDue), None);
        assert_eq!(result.get(Field::Percentage), Some("30%"));
        assert_eq!(
            result.observations(),
            [
                "Documento suspeito: 123.456.789-00",
                "Data suspeita em Data da Autorização da Despesa: 01/01/1999",
                "Valor suspeito em VALOR ARBITRADO: R$ 1200,5",
                "Valor suspeito em SALDO A RECEBER: R$ 5,00",
                "Percentual suspeito: 120%",
            ]
            .map(String::from)
        );
    }

    #[test]
    fn case_number_is_checked_against_the_archive() {
        let config = ExtractionConfig::default();
        let expected = ExpectedIdentifiers::from_archive_name(
            "0801234-50.2024.8.15.0001_SEI_001234_50.2024.8.15.zip",
        );

        let mut result = ExtractionResult::new();
        put(&mut result, Field::CaseNumber, "0812345-35.2023.8.15.0011");
        validate_result(&mut result, &expected, "", &config);
        assert_eq!(result.get(Field::CaseNumber), Some("0812345-35.2023.8.15.0011"));
        assert_eq!(
            result.observations(),
            [
                "Processo divergente do ZIP: 0812345-35.2023.8.15.0011".to_string(),
                MISSING_DEFENDANT_NOTE.to_string(),
            ]
        );

        let mut result = ExtractionResult::new();
        put(&mut result, Field::CaseNumber, "0801234-50.2024.8.15.0001");
        validate_result(&mut result, &expected, "", &config);
        assert_eq!(result.observations(), [MISSING_DEFENDANT_NOTE.to_string()]);
    }
}
