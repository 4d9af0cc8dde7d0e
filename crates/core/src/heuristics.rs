//! Text heuristics shared by the field extractor and the post-merge passes:
//! labeled-line scanning, party and expert recognition, dates, currency and
//! percentages.

use crate::text::{locate, prepare_lines, trim_set, window};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

pub const PLAINTIFF_LABELS: &[&str] = &["promovente", "parte autora", "autor", "requerente"];
pub const DEFENDANT_LABELS: &[&str] = &[
    "promovido",
    "requerido",
    "requerida",
    "parte ré",
    "réu",
    "ré",
    "demandado",
    "demandada",
    "parte contrária",
    "executado",
    "executada",
];
pub const SPECIALTY_LABELS: &[&str] = &["especialidade", "área de atuação"];
pub const EXAMINATION_LABELS: &[&str] = &["espécie de perícia", "espécie", "tipo de perícia"];
pub const NATURE_LABELS: &[&str] = &[
    "natureza dos honorários",
    "natureza dos honorarios",
    "natureza do serviço",
    "natureza da perícia",
];
pub const FACTOR_LABELS: &[&str] = &["fator"];
pub const TABULATED_LABELS: &[&str] = &["valor tabelado", "valor tabela"];
pub const ARBITRATED_LABELS: &[&str] = &["valor arbitrado", "valor da perícia", "honorários"];
pub const CHECK_LABELS: &[&str] = &["checagem"];
pub const ADVANCE_DATE_LABELS: &[&str] = &["data adiantamento", "data do adiantamento"];
pub const ADVANCE_CHECK_LABELS: &[&str] = &["checagem adiantamento"];
pub const AUTHORIZATION_LABELS: &[&str] = &["data da autorização", "autorização da despesa"];
pub const BALANCE_LABELS: &[&str] = &["saldo a receber"];
pub const REQUISITION_LABELS: &[&str] = &[
    "data da requisição",
    "data do requerimento",
    "campina grande",
    "joão pessoa",
    "patos",
    "sousa",
];
pub const ARBITRATION_KEYWORDS: &[&str] = &["honor", "perícia", "perito"];

pub const REQUISITION_KEYWORDS: [&str; 3] = ["requisição", "requerimento", "solicitação"];
pub const CITY_KEYWORDS: [&str; 7] = [
    "campina grande",
    "joão pessoa",
    "patos",
    "sousa",
    "cabedelo",
    "guarabira",
    "areia",
];
/// Bytes scanned after a city name for the requisition date.
pub const CITY_DATE_SPAN: usize = 160;
/// Bytes around a date searched for a request keyword.
pub const REQUISITION_KEYWORD_RADIUS: usize = 80;

macro_rules! lazy_regex {
    ($name:ident, $pattern:expr) => {
        pub static $name: Lazy<Regex> = Lazy::new(|| Regex::new($pattern).expect("valid regex"));
    };
}

lazy_regex!(CPF_RE, r"\d{3}\.\d{3}\.\d{3}-\d{2}");
lazy_regex!(CNPJ_RE, r"\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}");
lazy_regex!(
    EXPERT_PARAGRAPH_RE,
    r"(?i)Perit[oa]\s+(?P<esp>[^,]+),\s*(?P<nome>[A-Za-zÀ-ÿ' ]+),\s*CPF\s*(?P<cpf>\d{3}\.\d{3}\.\d{3}-\d{2})"
);
lazy_regex!(PROFESSION_RE, r"(?i)profiss[aã]o\s*[:\-]?\s*([A-Za-zÀ-ÿ ]+)");
lazy_regex!(
    DATE_RE,
    r"(?i)\b(\d{1,2})[-/ ]?(jan|fev|mar|abr|mai|jun|jul|ago|set|out|nov|dez)\.?-?\.?(\d{2,4})\b"
);
lazy_regex!(DATE_NUMERIC_RE, r"\b(\d{1,2})[./-](\d{1,2})[./-](\d{2,4})\b");
lazy_regex!(
    DATE_LONG_RE,
    r"(?i)\b(\d{1,2})º?\s+de\s+(janeiro|fevereiro|março|marco|abril|maio|junho|julho|agosto|setembro|outubro|novembro|dezembro)\s+de\s+(\d{4})\b"
);
lazy_regex!(COURT_RE, r"(?i)\b\d+ª\s+Vara[^\n]+");
lazy_regex!(DISTRICT_RE, r"(?i)Comarca\s+de\s+[A-Za-zÀ-ÿ ]+");
lazy_regex!(DISTRICT_ANY_RE, r"(?i)(Comarca\s+(?:de|da|do|dos|das)\s+[A-Za-zÀ-ÿ ]+)");
lazy_regex!(
    PARTIES_RE,
    r"(?is)(?:movid[oa]|propost[oa]|promov[ei]d[oa])\s+por\s+(?P<promovente>[^,\n]+?)(?:,|\s+CPF|\s+CNPJ|\se[mn]\s+face).*?em\s+face\s+(?:de|da|do|dos|das)\s+(?P<promovido>[^,\n]+)"
);
lazy_regex!(
    EXAMINATION_INLINE_RE,
    r"(?i)(?:esp[eé]cie|tipo)\s+de\s+per[ií]cia\s*[:\-]?\s*([^\n;]+)"
);
lazy_regex!(
    FEE_NATURE_RE,
    r"(?i)natureza\s+dos\s+honor[aá]rios\s*[:\-]?\s*([^\n;]+)"
);
lazy_regex!(
    SERVICE_NATURE_RE,
    r"(?i)natureza\s+do\s+servi[cç]o\s*[:\-]?\s*([^\n;]+)"
);
lazy_regex!(
    DEFENDANT_FACING_RE,
    r"(?i)em\s+(?:face|desfavor)\s+(?:do|da|de|dos|das|d[oa]s?)\s+([^\n;,]+)"
);
lazy_regex!(DEFENDANT_AGAINST_RE, r"(?i)contra\s+(?:o|a|os|as)\s+([^\n;,]+)");
lazy_regex!(
    DEFENDANT_LABEL_RE,
    r"(?i)(?:réu|ré|requerid[ao]s?|demandad[ao]s?|parte\s+contr[áa]ria)\s*[:\-]\s*([^\n;,]+)"
);
lazy_regex!(COURT_TOKENS_RE, r"(?i)(Ju[ií]zo|Vara|Comarca).*$");
lazy_regex!(FIRST_CURRENCY_RE, r"R\$\s*[\d\.]+,\d{2}");
lazy_regex!(
    PERCENT_LABELED_RE,
    r"(?i)percentual\s*[:\-]?\s*(\d{1,3}(?:,\d{1,2})?)\s*%"
);
lazy_regex!(PERCENT_LABEL_RE, r"(?i)percentual\s*[:\-]?\s*(\d{1,3}(?:,\d{1,2})?)");
lazy_regex!(PERCENT_SIGN_RE, r"\b(\d{1,3}(?:,\d{1,2})?)\s*%");

static CITY_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    CITY_KEYWORDS
        .iter()
        .map(|city| Regex::new(&format!("(?i){}", regex::escape(city))).expect("valid regex"))
        .collect()
});

/// Value after the colon, cut at the first ` – ` or ` - ` separator.
pub fn clean_after_colon(line: &str) -> String {
    let after = line.split_once(':').map(|(_, after)| after).unwrap_or_default().trim();
    let after = after.split(" – ").next().unwrap_or_default();
    let after = after.split(" - ").next().unwrap_or_default();
    after.trim().to_string()
}

/// Value of the first `label: value` line, where the label either starts the
/// line or appears before its first colon.
pub fn line_value(lines: &[&str], labels: &[&str]) -> Option<String> {
    for line in lines {
        let lower = line.to_lowercase();
        for label in labels {
            let label = label.to_lowercase();
            let labeled = lower.starts_with(&format!("{label}:"))
                || lower
                    .split_once(':')
                    .is_some_and(|(before, _)| before.contains(&label));
            if labeled {
                let value = clean_after_colon(line);
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Rest of the line after the first occurrence of a label, leading punctuation
/// stripped, truncated to `max_chars`.
pub fn find_after_labels(text: &str, labels: &[&str], max_chars: usize) -> Option<String> {
    for label in labels {
        let Some((_, end)) = locate(text, label) else {
            continue;
        };
        let first_line = text[end..].lines().next().unwrap_or_default();
        let part = first_line
            .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | '–' | '—'))
            .trim();
        if !part.is_empty() {
            return Some(part.chars().take(max_chars).collect());
        }
    }
    None
}

pub fn line_or_after(text: &str, lines: &[&str], labels: &[&str], max_chars: usize) -> Option<String> {
    line_value(lines, labels).or_else(|| find_after_labels(text, labels, max_chars))
}

pub fn first_match(pattern: &Regex, text: &str) -> Option<String> {
    pattern.find(text).map(|found| found.as_str().to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpertInfo {
    pub name: String,
    pub tax_id: String,
    pub specialty: String,
    pub profession: String,
}

fn first_tax_id(text: &str) -> Option<String> {
    CPF_RE
        .find(text)
        .or_else(|| CNPJ_RE.find(text))
        .map(|found| found.as_str().to_string())
}

/// Lines whose lowercased form satisfies `predicate`.
fn lines_where<'a>(lines: &[&'a str], predicate: impl Fn(&str) -> bool) -> Vec<&'a str> {
    lines
        .iter()
        .copied()
        .filter(|line| predicate(&line.to_lowercase()))
        .collect()
}

/// Expert identity from interested-party lines, expert lines or the
/// "Perito <specialty>, <name>, CPF <n>" paragraph form.
pub fn extract_expert_info(lines: &[&str]) -> ExpertInfo {
    let mut info = ExpertInfo::default();
    let document = lines.join("\n");

    let mut preferred = lines_where(lines, |line| line.contains("interessad"));
    if preferred.is_empty() {
        preferred = lines_where(lines, |line| line.starts_with("perito") || line.starts_with("perita"));
    }
    if preferred.is_empty() {
        preferred = lines_where(lines, |line| line.contains("perito"));
    }

    for line in preferred {
        let lower = line.to_lowercase();
        if !lower.contains("cpf") && !line.contains(':') {
            continue;
        }

        if lower.contains("interessad") && line.contains(':') {
            info.name = clean_after_colon(line);
            let tail = match line.split_once('–') {
                Some((_, tail)) => tail,
                None => line.split_once('-').map(|(_, tail)| tail).unwrap_or(line),
            };
            info.specialty = tail.split('-').next().unwrap_or_default().trim().to_string();
            if lower.contains("profiss") {
                info.profession = info.specialty.clone();
            }
        } else if lower.contains("cpf") && line.contains(',') {
            if let Some(captures) = EXPERT_PARAGRAPH_RE.captures(line) {
                info.name = captures["nome"].trim().to_string();
                info.tax_id = captures["cpf"].to_string();
                info.specialty = captures["esp"].trim().to_string();
            }
        } else if lower.starts_with("perit") && line.contains(':') {
            info.name = clean_after_colon(line);
        } else {
            let head = line.split(" – ").next().unwrap_or_default();
            info.name = head.split(" - ").next().unwrap_or_default().trim().to_string();
        }

        if let Some(tax_id) = first_tax_id(line) {
            info.tax_id = tax_id;
        }

        if info.specialty.is_empty() {
            if let Some((_, tail)) = line.split_once('–') {
                info.specialty = tail.split('-').next().unwrap_or_default().trim().to_string();
            } else if let Some((_, tail)) = line.split_once('-') {
                info.specialty = tail.trim().to_string();
            }
        }

        if !info.name.is_empty() {
            break;
        }
    }

    if info.name.is_empty() {
        if let Some(captures) = EXPERT_PARAGRAPH_RE.captures(&document) {
            info.name = captures["nome"].trim().to_string();
            info.tax_id = captures["cpf"].to_string();
            info.specialty = captures["esp"].trim().to_string();
        }
    }

    if info.tax_id.is_empty() {
        if let Some(tax_id) = first_tax_id(&document) {
            info.tax_id = tax_id;
        }
    }

    if info.profession.is_empty() {
        if let Some(captures) = PROFESSION_RE.captures(&document) {
            info.profession = captures[1].trim().to_string();
        }
    }

    info
}

/// Drops tax ids and hyphens from a party name.
pub fn clean_entity(value: &str) -> String {
    let value = value.split("CPF").next().unwrap_or_default();
    let value = value.split("CNPJ").next().unwrap_or_default();
    value.replace('-', " ").trim().to_string()
}

/// Cuts a party name where court references start.
pub fn strip_court_tokens(value: &str) -> String {
    match COURT_TOKENS_RE.find(value) {
        Some(found) => trim_set(&value[..found.start()], " -–:;/").to_string(),
        None => value.to_string(),
    }
}

/// Where a party value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartySource {
    Paragraph,
    Labels,
    Phrases,
}

impl PartySource {
    pub fn pattern(self) -> &'static str {
        match self {
            PartySource::Paragraph => "partes_regex",
            PartySource::Labels => "partes_labels",
            PartySource::Phrases => "promovido_phrases",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parties {
    pub plaintiff: Option<(String, PartySource)>,
    pub defendant: Option<(String, PartySource)>,
}

fn first_entity(lines: &[&str], labels: &[&str], fallback: &[&str]) -> Option<String> {
    [labels, fallback].into_iter().find_map(|labels| {
        line_value(lines, labels)
            .map(|value| strip_court_tokens(&value))
            .filter(|value| !value.is_empty())
    })
}

/// Parties from the "movido por X ... em face de Y" paragraph, falling back to
/// labeled lines and defendant phrases.
pub fn extract_parties(lines: &[&str], text: &str) -> Parties {
    if let Some(captures) = PARTIES_RE.captures(text) {
        let plaintiff = strip_court_tokens(&clean_entity(&captures["promovente"]));
        let defendant = strip_court_tokens(&clean_entity(&captures["promovido"]));
        return Parties {
            plaintiff: Some(plaintiff)
                .filter(|value| !value.is_empty())
                .map(|value| (value, PartySource::Paragraph)),
            defendant: Some(defendant)
                .filter(|value| !value.is_empty())
                .map(|value| (value, PartySource::Paragraph)),
        };
    }

    let plaintiff_labels: Vec<&str> = PLAINTIFF_LABELS
        .iter()
        .copied()
        .chain(["autor", "parte autora", "exequente"])
        .collect();
    let defendant_labels: Vec<&str> = DEFENDANT_LABELS
        .iter()
        .copied()
        .chain(["réu", "executado", "parte ré"])
        .collect();

    let plaintiff = first_entity(lines, &plaintiff_labels, &["requerente"])
        .map(|value| (value, PartySource::Labels));
    let defendant = first_entity(lines, &defendant_labels, &["requerido", "parte ré"])
        .map(|value| (value, PartySource::Labels))
        .or_else(|| defendant_from_phrases(text).map(|value| (value, PartySource::Phrases)));

    Parties {
        plaintiff,
        defendant,
    }
}

pub fn defendant_from_phrases(text: &str) -> Option<String> {
    [&*DEFENDANT_LABEL_RE, &*DEFENDANT_FACING_RE, &*DEFENDANT_AGAINST_RE]
        .into_iter()
        .find_map(|pattern| {
            let captured = pattern.captures(text)?.get(1)?.as_str().trim();
            let candidate = captured
                .split([',', ';', '\n'])
                .next()
                .unwrap_or_default();
            Some(strip_court_tokens(&clean_entity(candidate))).filter(|value| !value.is_empty())
        })
}

/// Court from a requester line mentioning a court or a "vara".
pub fn court_from_requester(lines: &[&str]) -> Option<String> {
    lines.iter().find_map(|line| {
        let lower = line.to_lowercase();
        if lower.contains("requerent") && (lower.contains("juízo") || lower.contains("vara")) {
            if line.contains(':') {
                Some(clean_after_colon(line)).filter(|value| !value.is_empty())
            } else {
                Some(line.trim().to_string())
            }
        } else {
            None
        }
    })
}

pub fn district_from(text: &str) -> Option<String> {
    DISTRICT_ANY_RE
        .captures(text)
        .map(|captures| captures[1].trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Examination type from labels, after-label scans and inline patterns.
pub fn examination_type_from_text(lines: &[&str], text: &str) -> Option<String> {
    line_value(lines, EXAMINATION_LABELS)
        .or_else(|| line_value(lines, NATURE_LABELS))
        .or_else(|| find_after_labels(text, EXAMINATION_LABELS, 200))
        .or_else(|| find_after_labels(text, NATURE_LABELS, 200))
        .or_else(|| {
            [&*EXAMINATION_INLINE_RE, &*FEE_NATURE_RE, &*SERVICE_NATURE_RE]
                .into_iter()
                .find_map(|pattern| {
                    pattern
                        .captures(text)
                        .map(|captures| captures[1].trim().to_string())
                        .filter(|value| !value.is_empty())
                })
        })
}

/// First `R$` amount on a line that also carries one of `keywords`.
pub fn first_currency(lines: &[&str], keywords: &[&str]) -> Option<String> {
    lines.iter().find_map(|line| {
        let lower = line.to_lowercase();
        if !lower.contains("r$") {
            return None;
        }
        if !keywords.is_empty() && !keywords.iter().any(|keyword| lower.contains(keyword)) {
            return None;
        }
        first_match(&FIRST_CURRENCY_RE, line)
    })
}

/// Issuing body of an arbitration decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Council of the magistracy.
    Council,
    /// Special directorate.
    Directorate,
}

impl Origin {
    pub fn code(self) -> &'static str {
        match self {
            Origin::Council => "cm",
            Origin::Directorate => "de",
        }
    }
}

pub fn arbitration_origin(source: &str, text: &str) -> Option<Origin> {
    let name = source.to_lowercase();
    let text = text.to_lowercase();

    if text.contains("conselho da magistratura") || name.contains("conselho da magistratura") {
        return Some(Origin::Council);
    }
    if name.contains("certida") && (name.contains("magistratura") || name.contains("cm")) {
        return Some(Origin::Council);
    }
    if text.contains("diretoria especial") || text.contains("diesp") || name.contains("despacho") {
        return Some(Origin::Directorate);
    }
    None
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "fev", "mar", "abr", "mai", "jun", "jul", "ago", "set", "out", "nov", "dez",
    ];
    let lowered = name.to_lowercase();
    let prefix: String = lowered.chars().take(3).collect();
    MONTHS
        .iter()
        .position(|month| *month == prefix)
        .map(|index| index as u32 + 1)
}

fn build_date(day: &str, month: u32, year: &str) -> Option<NaiveDate> {
    let day: u32 = day.parse().ok()?;
    let year: i32 = match year.len() {
        2 => 2000 + year.parse::<i32>().ok()?,
        4 => year.parse().ok()?,
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Day-first date anywhere in `raw`: numeric, abbreviated month or long
/// Portuguese form.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    DATE_NUMERIC_RE
        .captures_iter(raw)
        .find_map(|captures| build_date(&captures[1], captures[2].parse().ok()?, &captures[3]))
        .or_else(|| {
            DATE_LONG_RE.captures_iter(raw).find_map(|captures| {
                build_date(&captures[1], month_number(&captures[2])?, &captures[3])
            })
        })
        .or_else(|| {
            DATE_RE.captures_iter(raw).find_map(|captures| {
                build_date(&captures[1], month_number(&captures[2])?, &captures[3])
            })
        })
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// Labeled date, else the first month-name date in the text.
pub fn find_label_date(text: &str, labels: &[&str]) -> Option<String> {
    let lines = prepare_lines(text);
    if let Some(candidate) = line_value(&lines, labels) {
        return parse_date(&candidate).map(format_date);
    }
    let found = DATE_RE.find(text).or_else(|| DATE_LONG_RE.find(text))?;
    Some(
        parse_date(found.as_str())
            .map(format_date)
            .unwrap_or_else(|| found.as_str().to_string()),
    )
}

fn date_matches(text: &str) -> impl Iterator<Item = regex::Match<'_>> {
    DATE_NUMERIC_RE
        .find_iter(text)
        .chain(DATE_RE.find_iter(text))
        .chain(DATE_LONG_RE.find_iter(text))
}

pub fn first_date_in_text(text: &str) -> Option<String> {
    date_matches(text).find_map(|found| parse_date(found.as_str()).map(format_date))
}

/// Date written within [`CITY_DATE_SPAN`] bytes after a city name, as in
/// "Campina Grande, 12 de março de 2025".
pub fn date_near_cities(text: &str) -> Option<String> {
    CITY_RES.iter().find_map(|city| {
        city.find_iter(text).find_map(|found| {
            first_date_in_text(window(text, found.start(), found.start() + CITY_DATE_SPAN))
        })
    })
}

/// Date with a request keyword within [`REQUISITION_KEYWORD_RADIUS`] bytes.
pub fn date_near_requisition(text: &str) -> Option<String> {
    date_matches(text).find_map(|found| {
        let around = window(
            text,
            found.start().saturating_sub(REQUISITION_KEYWORD_RADIUS),
            found.end() + REQUISITION_KEYWORD_RADIUS,
        )
        .to_lowercase();
        if REQUISITION_KEYWORDS.iter().any(|keyword| around.contains(keyword)) {
            parse_date(found.as_str()).map(format_date)
        } else {
            None
        }
    })
}

pub fn requisition_date(text: &str) -> Option<String> {
    date_near_cities(text).or_else(|| date_near_requisition(text))
}

fn percent_value(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok()
}

pub fn format_percentage(value: f64) -> String {
    format!("{value}%")
}

/// First plausible percentage (0 to 100), labeled forms first.
pub fn extract_percentage(text: &str) -> Option<String> {
    [&*PERCENT_LABELED_RE, &*PERCENT_LABEL_RE, &*PERCENT_SIGN_RE]
        .into_iter()
        .find_map(|pattern| {
            let value = percent_value(&pattern.captures(text)?[1])?;
            (0.0..=100.0)
                .contains(&value)
                .then(|| format_percentage(value))
        })
}
