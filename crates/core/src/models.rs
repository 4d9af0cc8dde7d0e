use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Coarse document category. Buckets are visited in [`Bucket::ORDER`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Principal,
    Apoio,
    Laudo,
    Outro,
}

impl Bucket {
    pub const ORDER: [Bucket; 4] = [Bucket::Principal, Bucket::Apoio, Bucket::Laudo, Bucket::Outro];

    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Principal => "principal",
            Bucket::Apoio => "apoio",
            Bucket::Laudo => "laudo",
            Bucket::Outro => "outro",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Bucket::ORDER
            .into_iter()
            .find(|bucket| bucket.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extracted data fields. The serialized name is the column header of the
/// consolidated table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    #[serde(rename = "DATA DA REQUISIÇÃO")]
    RequisitionDate,
    #[serde(rename = "PROCESSO ADMIN. Nº")]
    AdminCaseNumber,
    #[serde(rename = "JUÍZO")]
    Court,
    #[serde(rename = "COMARCA")]
    District,
    #[serde(rename = "PROCESSO Nº")]
    CaseNumber,
    #[serde(rename = "PROMOVENTE")]
    Plaintiff,
    #[serde(rename = "PROMOVIDO")]
    Defendant,
    #[serde(rename = "PERITO")]
    Expert,
    #[serde(rename = "CPF/CNPJ")]
    ExpertTaxId,
    #[serde(rename = "ESPECIALIDADE")]
    Specialty,
    #[serde(rename = "ESPÉCIE DE PERÍCIA")]
    ExaminationType,
    #[serde(rename = "Fator")]
    FeeFactor,
    #[serde(rename = "Valor Tabelado Anexo I - Tabela I")]
    TabulatedValue,
    #[serde(rename = "VALOR ARBITRADO - DE")]
    ArbitratedValueDe,
    #[serde(rename = "VALOR ARBITRADO - CM")]
    ArbitratedValueCm,
    #[serde(rename = "VALOR ARBITRADO")]
    ArbitratedValue,
    #[serde(rename = "CHECAGEM")]
    Check,
    #[serde(rename = "DATA ADIANTAMENTO")]
    AdvanceDate,
    #[serde(rename = "R$")]
    AmountPaid,
    #[serde(rename = "%")]
    Percentage,
    #[serde(rename = "CHECAGEM ADIANTAMENTO")]
    AdvanceCheck,
    #[serde(rename = "Data da Autorização da Despesa")]
    AuthorizationDate,
    #[serde(rename = "SALDO A RECEBER")]
    BalanceDue,
}

impl Field {
    pub const ALL: [Field; 23] = [
        Field::RequisitionDate,
        Field::AdminCaseNumber,
        Field::Court,
        Field::District,
        Field::CaseNumber,
        Field::Plaintiff,
        Field::Defendant,
        Field::Expert,
        Field::ExpertTaxId,
        Field::Specialty,
        Field::ExaminationType,
        Field::FeeFactor,
        Field::TabulatedValue,
        Field::ArbitratedValueDe,
        Field::ArbitratedValueCm,
        Field::ArbitratedValue,
        Field::Check,
        Field::AdvanceDate,
        Field::AmountPaid,
        Field::Percentage,
        Field::AdvanceCheck,
        Field::AuthorizationDate,
        Field::BalanceDue,
    ];

    /// Fields whose absence is reported after all documents were merged.
    pub const CRITICAL: [Field; 3] = [Field::CaseNumber, Field::Expert, Field::ArbitratedValue];

    /// Fee-table family completed by the examination type lookup.
    pub const EXAMINATION_FAMILY: [Field; 3] =
        [Field::ExaminationType, Field::FeeFactor, Field::TabulatedValue];

    pub fn column(self) -> &'static str {
        match self {
            Field::RequisitionDate => "DATA DA REQUISIÇÃO",
            Field::AdminCaseNumber => "PROCESSO ADMIN. Nº",
            Field::Court => "JUÍZO",
            Field::District => "COMARCA",
            Field::CaseNumber => "PROCESSO Nº",
            Field::Plaintiff => "PROMOVENTE",
            Field::Defendant => "PROMOVIDO",
            Field::Expert => "PERITO",
            Field::ExpertTaxId => "CPF/CNPJ",
            Field::Specialty => "ESPECIALIDADE",
            Field::ExaminationType => "ESPÉCIE DE PERÍCIA",
            Field::FeeFactor => "Fator",
            Field::TabulatedValue => "Valor Tabelado Anexo I - Tabela I",
            Field::ArbitratedValueDe => "VALOR ARBITRADO - DE",
            Field::ArbitratedValueCm => "VALOR ARBITRADO - CM",
            Field::ArbitratedValue => "VALOR ARBITRADO",
            Field::Check => "CHECAGEM",
            Field::AdvanceDate => "DATA ADIANTAMENTO",
            Field::AmountPaid => "R$",
            Field::Percentage => "%",
            Field::AdvanceCheck => "CHECAGEM ADIANTAMENTO",
            Field::AuthorizationDate => "Data da Autorização da Despesa",
            Field::BalanceDue => "SALDO A RECEBER",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// A proposed field value with its weight and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCandidate {
    pub field: Field,
    pub value: String,
    pub source: String,
    pub weight: f64,
    pub pattern: String,
    pub snippet: String,
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl FieldCandidate {
    pub fn new(field: Field, value: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            source: source.into(),
            weight: 1.0,
            pattern: String::new(),
            snippet: String::new(),
            start: None,
            end: None,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Locates the value in `context` (case-insensitive) and records offsets and
    /// a snippet around it. Falls back to the value itself as snippet.
    pub fn located_in(mut self, context: Option<&str>) -> Self {
        if let Some(text) = context {
            if let Some((start, end)) = crate::text::locate(text, &self.value) {
                self.start = Some(start);
                self.end = Some(end);
                self.snippet = crate::text::snippet_around(text, start, end, crate::text::SNIPPET_RADIUS);
            }
        }
        if self.snippet.is_empty() {
            self.snippet = self.value.clone();
        }
        self
    }
}

/// `challenger` replaces `incumbent` when its weight is greater or equal, so the
/// latest candidate wins ties.
pub fn outranks(challenger: &FieldCandidate, incumbent: &FieldCandidate) -> bool {
    challenger.weight >= incumbent.weight
}

/// Stable max-by-weight over candidates in arrival order: the highest weight
/// wins, and among equal weights the latest arrival wins.
pub fn best_candidate(candidates: &[FieldCandidate]) -> Option<&FieldCandidate> {
    candidates.iter().fold(None, |best, candidate| match best {
        Some(current) if !outranks(candidate, current) => Some(current),
        _ => Some(candidate),
    })
}

/// Per-archive extraction state: best value per field, the full candidate
/// history for audit and the data-quality observations.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    values: BTreeMap<Field, FieldCandidate>,
    candidates: BTreeMap<Field, Vec<FieldCandidate>>,
    observations: Vec<String>,
}

impl ExtractionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// The only way a candidate enters the result. The candidate is always
    /// recorded in the field's history; it becomes the stored value when the
    /// field is empty or the candidate [`outranks`] the stored one. Returns
    /// whether the stored value changed. Blank values are ignored.
    pub fn set(&mut self, candidate: FieldCandidate) -> bool {
        if candidate.value.trim().is_empty() {
            return false;
        }

        let field = candidate.field;
        self.candidates
            .entry(field)
            .or_default()
            .push(candidate.clone());

        let replace = match self.values.get(&field) {
            Some(current) => outranks(&candidate, current),
            None => true,
        };
        if replace {
            self.values.insert(field, candidate);
        }
        replace
    }

    /// Replays every candidate of `other` through [`ExtractionResult::set`] in
    /// arrival order and merges its observations.
    pub fn absorb(&mut self, other: ExtractionResult) {
        for (_, list) in other.candidates {
            for candidate in list {
                self.set(candidate);
            }
        }
        for note in other.observations {
            self.observe(note);
        }
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.values.get(&field).map(|candidate| candidate.value.as_str())
    }

    pub fn value(&self, field: Field) -> &str {
        self.get(field).unwrap_or_default()
    }

    pub fn has(&self, field: Field) -> bool {
        self.get(field).is_some_and(|value| !value.trim().is_empty())
    }

    pub fn provenance(&self, field: Field) -> Option<&FieldCandidate> {
        self.values.get(&field)
    }

    /// Blanks the stored value; the candidate history is kept.
    pub fn clear(&mut self, field: Field) -> Option<FieldCandidate> {
        self.values.remove(&field)
    }

    /// Rewrites the stored value in place (normalisation), keeping provenance.
    pub fn rewrite(&mut self, field: Field, value: impl Into<String>) {
        if let Some(candidate) = self.values.get_mut(&field) {
            candidate.value = value.into();
        }
    }

    pub fn candidates(&self, field: Field) -> &[FieldCandidate] {
        self.candidates
            .get(&field)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn filled(&self) -> impl Iterator<Item = &FieldCandidate> {
        self.values.values()
    }

    pub fn missing_any(&self, fields: &[Field]) -> bool {
        fields.iter().any(|field| !self.has(*field))
    }

    /// Adds an observation unless an identical one is already present.
    pub fn observe(&mut self, note: impl Into<String>) {
        let note = note.into();
        if !note.is_empty() && !self.observations.contains(&note) {
            self.observations.push(note);
        }
    }

    pub fn observations(&self) -> &[String] {
        &self.observations
    }
}

/// Judicial number occurrences inside one document, used by the primary
/// case-number vote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudicialTally {
    pub display: String,
    pub count: u32,
    pub context: u32,
}

/// Identifier sets found in a document, normalised to digits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentIdentifiers {
    pub internal: BTreeSet<String>,
    pub judicial: BTreeSet<String>,
    pub admin: BTreeSet<String>,
    pub judicial_tally: BTreeMap<String, JudicialTally>,
}

impl DocumentIdentifiers {
    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.judicial.is_empty() && self.admin.is_empty()
    }
}

/// A unit of text extracted from an archive: one embedded file, or one
/// sub-document of a combined PDF.
#[derive(Debug, Clone)]
pub struct LogicalDocument {
    pub name: String,
    pub text: String,
    pub bucket: Bucket,
    pub importance: u32,
    pub identifiers: DocumentIdentifiers,
}

impl LogicalDocument {
    pub fn new(name: impl Into<String>, text: impl Into<String>, bucket: Bucket) -> Self {
        let text = text.into();
        let identifiers = crate::identifiers::scan_identifiers(&text);
        Self {
            name: name.into(),
            text,
            bucket,
            importance: 1,
            identifiers,
        }
    }

    pub fn with_importance(mut self, importance: u32) -> Self {
        self.importance = importance.max(1);
        self
    }
}
