//! Fee schedule lookups: the official examination table and the keyword
//! aliases that route free-text specialties to a table row.

use crate::error::LookupError;
use crate::heuristics::ExpertInfo;
use crate::text::fold_key;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use strsim::normalized_levenshtein;

/// Similarity a closest-match lookup must reach by default.
pub const DEFAULT_MATCH_CUTOFF: f64 = 0.75;

/// One row of the fee table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FeeEntry {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "DESCRICAO", default)]
    pub description: String,
    #[serde(rename = "VALOR", default)]
    pub value: String,
}

/// Fee table indexed by folded description and by id. Rows without a
/// description are dropped; a later row with the same folded description
/// replaces the earlier one.
#[derive(Debug, Clone, Default)]
pub struct FeeTable {
    entries: Vec<FeeEntry>,
    index: Vec<(String, usize)>,
}

impl FeeTable {
    pub fn from_entries(rows: impl IntoIterator<Item = FeeEntry>) -> Self {
        let mut table = Self::default();
        for mut row in rows {
            row.id = row.id.trim().to_string();
            row.description = row.description.trim().to_string();
            row.value = row.value.trim().to_string();
            if row.description.is_empty() {
                continue;
            }

            let key = fold_key(&row.description);
            let position = table.entries.len();
            table.entries.push(row);
            match table.index.iter_mut().find(|(existing, _)| *existing == key) {
                Some(slot) => slot.1 = position,
                None => table.index.push((key, position)),
            }
        }
        table
    }

    /// Reads a CSV with `ID`, `DESCRICAO` and `VALOR` headers.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, LookupError> {
        let mut csv = csv::Reader::from_reader(reader);
        let rows = csv
            .deserialize::<FeeEntry>()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_entries(rows))
    }

    pub fn load(path: &Path) -> Result<Self, LookupError> {
        Self::from_reader(File::open(path)?)
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn by_id(&self, id: &str) -> Option<&FeeEntry> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        self.entries.iter().rev().find(|entry| entry.id == id)
    }

    fn entry(&self, position: usize) -> Option<&FeeEntry> {
        self.entries.get(position)
    }

    /// Exact folded key, then the most similar key at or above `cutoff`, then
    /// containment either way.
    pub fn lookup(&self, label: &str, cutoff: f64) -> Option<&FeeEntry> {
        let key = fold_key(label);
        if key.is_empty() || self.is_empty() {
            return None;
        }

        if let Some((_, position)) = self.index.iter().find(|(existing, _)| *existing == key) {
            return self.entry(*position);
        }

        let closest = self
            .index
            .iter()
            .map(|(existing, position)| (normalized_levenshtein(&key, existing), *position))
            .filter(|(score, _)| *score >= cutoff)
            .fold(None::<(f64, usize)>, |best, current| match best {
                Some(best) if best.0 >= current.0 => Some(best),
                _ => Some(current),
            });
        if let Some((_, position)) = closest {
            return self.entry(position);
        }

        self.index
            .iter()
            .find(|(existing, _)| existing.contains(&key) || key.contains(existing.as_str()))
            .and_then(|(_, position)| self.entry(*position))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(text) => text.trim().to_string(),
            RawId::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawAlias {
    target_id: RawId,
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeAlias {
    pub keywords: Vec<String>,
    pub entry: FeeEntry,
}

/// Keyword aliases resolved against a [`FeeTable`]. Aliases pointing at an
/// unknown id, or left without keywords after folding, are dropped.
#[derive(Debug, Clone, Default)]
pub struct FeeAliases {
    aliases: Vec<FeeAlias>,
}

impl FeeAliases {
    /// Reads `[{"target_id": .., "keywords": [..]}]`.
    pub fn from_reader<R: Read>(reader: R, table: &FeeTable) -> Result<Self, LookupError> {
        let raw: Vec<RawAlias> = serde_json::from_reader(reader)?;
        let aliases = raw
            .into_iter()
            .filter_map(|alias| {
                let entry = table.by_id(&alias.target_id.into_string())?.clone();
                let keywords: Vec<String> = alias
                    .keywords
                    .iter()
                    .map(|keyword| fold_key(keyword))
                    .filter(|keyword| !keyword.is_empty())
                    .collect();
                (!keywords.is_empty()).then_some(FeeAlias { keywords, entry })
            })
            .collect();
        Ok(Self { aliases })
    }

    pub fn load(path: &Path, table: &FeeTable) -> Result<Self, LookupError> {
        Self::from_reader(File::open(path)?, table)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// First alias with a keyword contained in the folded text.
    pub fn matches(&self, text: &str) -> Option<&FeeEntry> {
        let key = fold_key(text);
        if key.is_empty() {
            return None;
        }
        self.aliases
            .iter()
            .find(|alias| alias.keywords.iter().any(|keyword| key.contains(keyword.as_str())))
            .map(|alias| &alias.entry)
    }
}

/// Read-only fee lookups shared by every archive of a batch.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    pub table: FeeTable,
    pub aliases: FeeAliases,
    pub match_cutoff: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            table: FeeTable::default(),
            aliases: FeeAliases::default(),
            match_cutoff: DEFAULT_MATCH_CUTOFF,
        }
    }
}

impl FeeSchedule {
    pub fn new(table: FeeTable, aliases: FeeAliases) -> Self {
        Self {
            table,
            aliases,
            ..Self::default()
        }
    }

    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.match_cutoff = cutoff;
        self
    }

    /// Table row for a free-text examination type: table lookup first, then
    /// keyword aliases.
    pub fn canonicalize(&self, label: &str) -> Option<&FeeEntry> {
        self.table
            .lookup(label, self.match_cutoff)
            .or_else(|| self.aliases.matches(label))
    }

    /// Alias row guessed from the expert's specialty or profession.
    pub fn from_specialty(&self, info: &ExpertInfo) -> Option<&FeeEntry> {
        [info.specialty.as_str(), info.profession.as_str()]
            .into_iter()
            .filter(|text| !text.trim().is_empty())
            .find_map(|text| self.aliases.matches(text))
    }
}

/// Parses `1.234,56`, `1234,56` or `1234.56`.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let normalized = if cleaned.contains(',') {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned
    };
    normalized.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// `R$ 1.234,56`.
pub fn format_currency(value: f64) -> String {
    let cents = (value * 100.0).round() as i64;
    let negative = cents < 0;
    let cents = cents.abs();
    let whole = (cents / 100).to_string();

    let mut grouped = String::new();
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }

    let sign = if negative { "-" } else { "" };
    format!("R$ {sign}{grouped},{:02}", cents % 100)
}
