//! Per-archive merge: bucket expansion, relevance decisions against the
//! archive's expected identifiers, and the post-merge passes.

use crate::catalog::ExpertCatalog;
use crate::classifier::tag_kind;
use crate::config::{ExtractionConfig, RelevanceRules};
use crate::error::IngestError;
use crate::fees::FeeSchedule;
use crate::fields::{apply_species, FieldExtractor, FEE_TABLE_SOURCE};
use crate::heuristics::{examination_type_from_text, requisition_date};
use crate::identifiers::{
    format_admin_number, format_internal_candidate, is_valid_judicial, matches_any,
    ExpectedIdentifiers,
};
use crate::ingest::{archive_name, digest_file, DocumentLoader, LoadedArchive};
use crate::models::{Bucket, ExtractionResult, Field, FieldCandidate, LogicalDocument};
use crate::pdf::{LopdfExtractor, PdfExtractor};
use crate::text::{digits_only, prepare_lines};
use crate::validate::validate_result;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const NO_READABLE_DOCUMENT_NOTE: &str = "Nenhum documento legível no ZIP";
pub const NO_MATCHING_DOCUMENT_NOTE: &str = "Sem documento compatível com o processo SEI no ZIP";
const COMBINED_SOURCE: &str = "combined";
const SKIPPED_LISTED: usize = 3;

/// Fields a PRINCIPAL document is expected to provide.
pub const PRINCIPAL_FIELDS: [Field; 9] = [
    Field::CaseNumber,
    Field::AdminCaseNumber,
    Field::Court,
    Field::District,
    Field::ArbitratedValue,
    Field::Plaintiff,
    Field::Defendant,
    Field::Expert,
    Field::ExpertTaxId,
];

/// What the merged result still lacks after a bucket was processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Completeness {
    pub accepted_any: bool,
    pub principal_missing: bool,
    pub examination_missing: bool,
}

impl Completeness {
    pub fn of(result: &ExtractionResult, accepted: usize) -> Self {
        Self {
            accepted_any: accepted > 0,
            principal_missing: result.missing_any(&PRINCIPAL_FIELDS),
            examination_missing: result.missing_any(&Field::EXAMINATION_FAMILY),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expansion {
    Continue,
    Stop,
}

/// Whether to move on to the bucket after `bucket`. Expansion only ever moves
/// forward through [`Bucket::ORDER`].
pub fn next_step(bucket: Bucket, completeness: &Completeness) -> Expansion {
    let proceed = match bucket {
        Bucket::Outro => false,
        _ if !completeness.accepted_any => true,
        Bucket::Principal => completeness.principal_missing,
        Bucket::Apoio => completeness.examination_missing,
        Bucket::Laudo => false,
    };
    if proceed {
        Expansion::Continue
    } else {
        Expansion::Stop
    }
}

/// Relevance state of one archive: what it should contain and what accepted
/// documents have shown so far.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    expected: ExpectedIdentifiers,
    rules: RelevanceRules,
    accepted: Vec<LogicalDocument>,
    skipped: Vec<String>,
    internal: BTreeSet<String>,
    judicial: BTreeSet<String>,
    admin: BTreeSet<String>,
}

impl ProcessContext {
    pub fn new(expected: ExpectedIdentifiers, rules: RelevanceRules) -> Self {
        Self {
            expected,
            rules,
            accepted: Vec::new(),
            skipped: Vec::new(),
            internal: BTreeSet::new(),
            judicial: BTreeSet::new(),
            admin: BTreeSet::new(),
        }
    }

    pub fn expected(&self) -> &ExpectedIdentifiers {
        &self.expected
    }

    pub fn accepted(&self) -> &[LogicalDocument] {
        &self.accepted
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn has_anchor(&self) -> bool {
        !self.internal.is_empty()
            || !self.judicial.is_empty()
            || !self.admin.is_empty()
            || !self.expected.is_empty()
    }

    pub fn is_relevant(&self, document: &LogicalDocument) -> bool {
        let ids = &document.identifiers;

        if !self.expected.is_empty() && self.accepted.is_empty() {
            return matches_any(ids.internal.iter().chain(&ids.judicial), &self.expected.normalized);
        }

        if !ids.internal.is_empty() {
            return matches_any(&ids.internal, &self.expected.normalized)
                || matches_any(&ids.internal, &self.internal);
        }

        let anchored = self.has_anchor();
        let bootstrap = !anchored && self.rules.bootstrap_without_anchor;

        if !ids.admin.is_empty() && (!self.admin.is_disjoint(&ids.admin) || bootstrap) {
            return true;
        }
        if !ids.judicial.is_empty() && (matches_any(&ids.judicial, &self.judicial) || bootstrap) {
            return true;
        }

        ids.is_empty() && anchored
    }

    /// Accepts a document and folds its identifiers into the seen sets.
    pub fn register(&mut self, document: LogicalDocument) {
        self.internal.extend(document.identifiers.internal.iter().cloned());
        self.judicial.extend(document.identifiers.judicial.iter().cloned());
        self.admin.extend(document.identifiers.admin.iter().cloned());
        self.accepted.push(document);
    }

    pub fn skip(&mut self, name: impl Into<String>) {
        self.skipped.push(name.into());
    }

    /// `<n> documento(s) ignorado(s) por divergência: a, b, c (+k)`.
    pub fn skipped_note(&self) -> Option<String> {
        if self.skipped.is_empty() {
            return None;
        }
        let listed = self
            .skipped
            .iter()
            .take(SKIPPED_LISTED)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let mut note = format!(
            "{} documento(s) ignorado(s) por divergência: {listed}",
            self.skipped.len()
        );
        let extra = self.skipped.len().saturating_sub(SKIPPED_LISTED);
        if extra > 0 {
            note.push_str(&format!(" (+{extra})"));
        }
        Some(note)
    }
}

/// One stored value with its provenance, as written to the audit log.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAttribution {
    pub field: Field,
    pub value: String,
    pub source: Option<String>,
    pub bucket: Option<Bucket>,
    pub pattern: String,
    pub snippet: String,
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl FieldAttribution {
    fn from_candidate(candidate: &FieldCandidate) -> Self {
        Self {
            field: candidate.field,
            value: candidate.value.clone(),
            source: None,
            bucket: None,
            pattern: candidate.pattern.clone(),
            snippet: candidate.snippet.clone(),
            start: candidate.start,
            end: candidate.end,
        }
    }
}

/// Accepted document with the stored values it supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub name: String,
    pub bucket: Bucket,
    #[serde(default)]
    pub tag: Option<String>,
    pub fields: Vec<FieldAttribution>,
}

/// Everything produced for one archive.
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub name: String,
    pub path: PathBuf,
    pub checksum: String,
    pub size_bytes: u64,
    pub result: ExtractionResult,
    pub bucket_counts: BTreeMap<Bucket, usize>,
    pub documents: Vec<DocumentSummary>,
}

impl ArchiveOutcome {
    /// Every stored value with its source document and that document's bucket.
    pub fn attributions(&self) -> Vec<FieldAttribution> {
        let buckets: BTreeMap<&str, Bucket> = self
            .documents
            .iter()
            .map(|document| (document.name.as_str(), document.bucket))
            .collect();

        self.result
            .filled()
            .map(|candidate| FieldAttribution {
                source: Some(candidate.source.clone()),
                bucket: buckets.get(candidate.source.as_str()).copied(),
                ..FieldAttribution::from_candidate(candidate)
            })
            .collect()
    }
}

fn empty_bucket_counts() -> BTreeMap<Bucket, usize> {
    Bucket::ORDER.into_iter().map(|bucket| (bucket, 0)).collect()
}

/// Read-only extraction setup shared by every worker of a batch.
pub struct ExtractionPipeline {
    config: ExtractionConfig,
    fees: FeeSchedule,
    catalog: ExpertCatalog,
    extractor: Box<dyn PdfExtractor>,
}

impl ExtractionPipeline {
    pub fn new(config: ExtractionConfig) -> Self {
        let fees = FeeSchedule::default().with_cutoff(config.fee_match_cutoff);
        Self {
            config,
            fees,
            catalog: ExpertCatalog::default(),
            extractor: Box::new(LopdfExtractor),
        }
    }

    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees.with_cutoff(self.config.fee_match_cutoff);
        self
    }

    pub fn with_catalog(mut self, catalog: ExpertCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_extractor(mut self, extractor: Box<dyn PdfExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Loads and processes one archive. Only an unreadable file is an error;
    /// a corrupt archive yields an outcome carrying
    /// [`NO_READABLE_DOCUMENT_NOTE`].
    pub fn process_archive(&self, path: &Path) -> Result<ArchiveOutcome, IngestError> {
        let loader = DocumentLoader::new(self.extractor.as_ref(), &self.config);
        match loader.load(path) {
            Ok(archive) => Ok(self.process_loaded(archive)),
            Err(IngestError::Io(error)) => Err(IngestError::Io(error)),
            Err(error) => {
                warn!(archive = %path.display(), error = %error, "archive is unreadable");
                let archive = LoadedArchive {
                    name: archive_name(path)?,
                    path: path.to_path_buf(),
                    checksum: digest_file(path)?,
                    size_bytes: std::fs::metadata(path)?.len(),
                    documents: Vec::new(),
                    skipped_entries: Vec::new(),
                };
                Ok(self.process_loaded(archive))
            }
        }
    }

    pub fn process_loaded(&self, archive: LoadedArchive) -> ArchiveOutcome {
        let LoadedArchive {
            name,
            path,
            checksum,
            size_bytes,
            documents,
            ..
        } = archive;

        let expected = ExpectedIdentifiers::from_archive_name(&name);
        let mut context = ProcessContext::new(expected, self.config.relevance);
        let mut result = ExtractionResult::new();
        let mut bucket_counts = empty_bucket_counts();

        if documents.is_empty() {
            result.observe(NO_READABLE_DOCUMENT_NOTE);
            return ArchiveOutcome {
                name,
                path,
                checksum,
                size_bytes,
                result,
                bucket_counts,
                documents: Vec::new(),
            };
        }

        let extractor = FieldExtractor::new(&self.fees);
        let all_text = documents
            .iter()
            .map(|document| document.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let mut by_bucket: BTreeMap<Bucket, Vec<LogicalDocument>> = BTreeMap::new();
        for document in documents {
            by_bucket.entry(document.bucket).or_default().push(document);
        }

        for bucket in Bucket::ORDER {
            for document in by_bucket.remove(&bucket).unwrap_or_default() {
                if context.is_relevant(&document) {
                    debug!(archive = %name, document = %document.name, bucket = %bucket, "document accepted");
                    result.absorb(extractor.extract(&document.name, &document.text));
                    *bucket_counts.entry(bucket).or_default() += 1;
                    context.register(document);
                } else {
                    debug!(archive = %name, document = %document.name, bucket = %bucket, "document skipped");
                    context.skip(document.name);
                }
            }

            let completeness = Completeness::of(&result, context.accepted().len());
            if next_step(bucket, &completeness) == Expansion::Stop {
                break;
            }
        }

        if context.accepted().is_empty() && !context.expected().is_empty() {
            result.observe(NO_MATCHING_DOCUMENT_NOTE);
        }

        let accepted_text = context
            .accepted()
            .iter()
            .map(|document| document.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if !result.has(Field::CaseNumber) {
            if !accepted_text.is_empty() {
                result.absorb(extractor.extract(COMBINED_SOURCE, &accepted_text));
            } else if context.expected().is_empty() {
                result.absorb(extractor.extract(COMBINED_SOURCE, &all_text));
            }
        }

        if !context.accepted().is_empty() {
            if let Some(note) = context.skipped_note() {
                result.observe(note);
            }
            select_primary_case_number(&mut result, &context);
        }
        backfill_admin_number(&mut result, &context, &name);
        backfill_requisition_date(&mut result, &context, self.config.requisition_scan_documents);
        fill_species_from_reports(&mut result, &context, &self.fees);
        complete_fee_fields(&mut result, &self.fees);

        let validation_text = if accepted_text.is_empty() {
            all_text.as_str()
        } else {
            accepted_text.as_str()
        };
        validate_result(&mut result, context.expected(), validation_text, &self.config);
        self.catalog.scrub(&mut result);

        for field in Field::CRITICAL {
            if !result.has(field) {
                result.observe(format!("Sem {}", field.column()));
            }
        }

        let documents = summarize_documents(&context, &result);
        info!(
            archive = %name,
            accepted = context.accepted().len(),
            skipped = context.skipped().len(),
            filled = result.filled().count(),
            "archive processed"
        );

        ArchiveOutcome {
            name,
            path,
            checksum,
            size_bytes,
            result,
            bucket_counts,
            documents,
        }
    }
}

struct CaseVote<'d> {
    display: String,
    source: &'d LogicalDocument,
    weighted: u64,
    context: u64,
    raw: u64,
}

impl CaseVote<'_> {
    fn score(&self) -> (u64, u64) {
        (self.weighted * 2 + self.context, self.raw)
    }
}

/// Weighted vote over the check-digit-valid judicial numbers of accepted
/// documents. Occurrences count twice, context keywords once, both scaled by
/// document importance; raw occurrences break ties.
fn select_primary_case_number(result: &mut ExtractionResult, context: &ProcessContext) {
    let mut votes: BTreeMap<&str, CaseVote<'_>> = BTreeMap::new();
    for document in context.accepted() {
        let importance = u64::from(document.importance.max(1));
        for (digits, tally) in &document.identifiers.judicial_tally {
            if !is_valid_judicial(&tally.display) {
                continue;
            }
            let vote = votes.entry(digits.as_str()).or_insert_with(|| CaseVote {
                display: tally.display.clone(),
                source: document,
                weighted: 0,
                context: 0,
                raw: 0,
            });
            vote.weighted += u64::from(tally.count) * importance;
            vote.context += u64::from(tally.context) * importance;
            vote.raw += u64::from(tally.count);
        }
    }

    let winner = votes.iter().fold(None::<(&str, &CaseVote<'_>)>, |best, (digits, vote)| match best {
        Some((_, leader)) if leader.score() >= vote.score() => best,
        _ => Some((*digits, vote)),
    });
    let Some((winner_digits, winner)) = winner else {
        return;
    };

    if result.get(Field::CaseNumber) != Some(winner.display.as_str()) {
        result.set(
            FieldCandidate::new(Field::CaseNumber, winner.display.clone(), winner.source.name.clone())
                .with_pattern("primary_cnj")
                .with_weight(1.1)
                .located_in(Some(&winner.source.text)),
        );
    }

    let others: BTreeSet<&str> = votes
        .iter()
        .filter(|(digits, _)| **digits != winner_digits)
        .map(|(_, vote)| vote.display.as_str())
        .collect();
    if !others.is_empty() {
        let listed = others.into_iter().collect::<Vec<_>>().join(", ");
        result.observe(format!("CNJs adicionais mencionados: {listed}"));
    }
}

/// Administrative number from the archive name (0.9), else the cited number
/// reformatted (0.8), else an internal number recovered from the raw stem
/// (0.6).
fn backfill_admin_number(result: &mut ExtractionResult, context: &ProcessContext, archive: &str) {
    let source = format!("zip:{archive}");
    let current = result
        .get(Field::AdminCaseNumber)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let (value, pattern, weight) = if let Some(display) = context.expected().primary_display() {
        if let Some(current) = &current {
            if digits_only(current) != digits_only(display) {
                result.observe(format!("Processo adm. citado nos documentos: {current}"));
            }
        }
        (display.to_string(), "admin_context", 0.9)
    } else if let Some(current) = current {
        (format_admin_number(&digits_only(&current)), "admin_formatted", 0.8)
    } else {
        let stem = Path::new(archive)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(archive);
        match format_internal_candidate(stem) {
            Some(formatted) => (formatted, "zip_fallback", 0.6),
            None => return,
        }
    };

    result.set(
        FieldCandidate::new(Field::AdminCaseNumber, value, source)
            .with_pattern(pattern)
            .with_weight(weight)
            .located_in(None),
    );
}

fn backfill_requisition_date(result: &mut ExtractionResult, context: &ProcessContext, scan: usize) {
    if result.has(Field::RequisitionDate) {
        return;
    }
    let found = context
        .accepted()
        .iter()
        .take(scan)
        .find_map(|document| requisition_date(&document.text).map(|date| (date, document)));
    if let Some((date, document)) = found {
        result.set(
            FieldCandidate::new(Field::RequisitionDate, date, document.name.clone())
                .with_pattern("data_requisicao_doc")
                .with_weight(0.85)
                .located_in(Some(&document.text)),
        );
    }
}

fn fill_species_from_reports(result: &mut ExtractionResult, context: &ProcessContext, fees: &FeeSchedule) {
    if !result.missing_any(&Field::EXAMINATION_FAMILY) {
        return;
    }
    let reports = context
        .accepted()
        .iter()
        .filter(|document| document.bucket == Bucket::Laudo || document.name.to_lowercase().contains("laudo"));
    for document in reports {
        let lines = prepare_lines(&document.text);
        if let Some(species) = examination_type_from_text(&lines, &document.text) {
            apply_species(result, fees, &species, &document.name, Some(&document.text), 0.85, None);
            if result.has(Field::FeeFactor) && result.has(Field::TabulatedValue) {
                break;
            }
        }
    }
}

/// Re-resolves the stored examination type so factor and tabulated value are
/// backfilled from the fee table when the type came without them.
fn complete_fee_fields(result: &mut ExtractionResult, fees: &FeeSchedule) {
    let Some(species) = result.get(Field::ExaminationType).map(str::to_string) else {
        return;
    };
    let source = result
        .provenance(Field::ExaminationType)
        .map(|candidate| candidate.source.clone())
        .unwrap_or_else(|| FEE_TABLE_SOURCE.to_string());
    let entry = fees.canonicalize(&species).cloned();
    apply_species(result, fees, &species, &source, None, 0.7, entry);
}

fn summarize_documents(context: &ProcessContext, result: &ExtractionResult) -> Vec<DocumentSummary> {
    context
        .accepted()
        .iter()
        .map(|document| DocumentSummary {
            name: document.name.clone(),
            bucket: document.bucket,
            tag: tag_kind(&document.text).map(str::to_string),
            fields: result
                .filled()
                .filter(|candidate| candidate.source == document.name)
                .map(FieldAttribution::from_candidate)
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::{FeeEntry, FeeTable};
    use crate::pdf::PageText;
    use pretty_assertions::assert_eq;

    const COMPLETE_PRINCIPAL: &str = "DIRETORIA ESPECIAL\n\
        Processo nº 0801234-50.2024.8.15.0001\n\
        Processo administrativo 2024123456\n\
        Requerente: Juízo da 1ª Vara Cível da Comarca de Campina Grande\n\
        Ação movida por José Alves, CPF 000, em face de Banco Sul S.A., em trâmite\n\
        Interessado: Maria Souza – Perita Grafotécnica - CPF 111.444.777-35\n\
        Valor arbitrado: R$ 850,00";

    fn loaded(name: &str, documents: Vec<LogicalDocument>) -> LoadedArchive {
        LoadedArchive {
            name: name.to_string(),
            path: PathBuf::from(name),
            checksum: "00".to_string(),
            size_bytes: 0,
            documents,
            skipped_entries: Vec::new(),
        }
    }

    fn pipeline() -> ExtractionPipeline {
        let table = FeeTable::from_entries([FeeEntry {
            id: "7".to_string(),
            description: "Perícia grafotécnica".to_string(),
            value: "370,00".to_string(),
        }]);
        ExtractionPipeline::new(ExtractionConfig::default())
            .with_fees(FeeSchedule::new(table, Default::default()))
    }

    #[test]
    fn expansion_transitions() {
        let complete = Completeness {
            accepted_any: true,
            principal_missing: false,
            examination_missing: false,
        };
        let nothing = Completeness::default();
        let missing = Completeness {
            accepted_any: true,
            principal_missing: true,
            examination_missing: true,
        };

        assert_eq!(next_step(Bucket::Principal, &complete), Expansion::Stop);
        assert_eq!(next_step(Bucket::Principal, &missing), Expansion::Continue);
        assert_eq!(next_step(Bucket::Apoio, &missing), Expansion::Continue);
        assert_eq!(next_step(Bucket::Apoio, &complete), Expansion::Stop);
        assert_eq!(next_step(Bucket::Laudo, &missing), Expansion::Stop);
        assert_eq!(next_step(Bucket::Laudo, &nothing), Expansion::Continue);
        assert_eq!(next_step(Bucket::Outro, &nothing), Expansion::Stop);
    }

    #[test]
    fn first_document_must_match_the_archive_name() {
        let expected = ExpectedIdentifiers::from_archive_name("0801234-50.2024.8.15.0001.zip");
        let mut context = ProcessContext::new(expected, RelevanceRules::default());

        let stranger = LogicalDocument::new(
            "a.txt",
            "Processo 0812345-35.2023.8.15.0011",
            Bucket::Principal,
        );
        let own = LogicalDocument::new("b.txt", "Processo 0801234-50.2024.8.15.0001", Bucket::Principal);
        let plain = LogicalDocument::new("c.txt", "Sem números", Bucket::Apoio);

        assert!(!context.is_relevant(&plain));
        assert!(!context.is_relevant(&stranger));
        assert!(context.is_relevant(&own));
        context.register(own);
        assert!(context.is_relevant(&plain));
        assert!(!context.is_relevant(&stranger));
    }

    #[test]
    fn bootstrap_accepts_admin_numbers_without_anchor() {
        let mut context = ProcessContext::new(ExpectedIdentifiers::default(), RelevanceRules::default());
        let first = LogicalDocument::new("a.txt", "Processo administrativo 2024123456", Bucket::Principal);
        let plain = LogicalDocument::new("b.txt", "texto", Bucket::Apoio);

        assert!(!context.is_relevant(&plain));
        assert!(context.is_relevant(&first));
        context.register(first);

        let same = LogicalDocument::new("c.txt", "Ref. 2024123456", Bucket::Apoio);
        let other = LogicalDocument::new("d.txt", "Ref. 2023999999", Bucket::Apoio);
        assert!(context.is_relevant(&same));
        assert!(!context.is_relevant(&other));

        let strict = ProcessContext::new(
            ExpectedIdentifiers::default(),
            RelevanceRules {
                bootstrap_without_anchor: false,
            },
        );
        assert!(!strict.is_relevant(&LogicalDocument::new("e.txt", "2024123456", Bucket::Principal)));
    }

    #[test]
    fn skipped_note_lists_three_names() {
        let mut context = ProcessContext::new(ExpectedIdentifiers::default(), RelevanceRules::default());
        assert_eq!(context.skipped_note(), None);
        for name in ["a", "b", "c", "d", "e"] {
            context.skip(name);
        }
        assert_eq!(
            context.skipped_note().as_deref(),
            Some("5 documento(s) ignorado(s) por divergência: a, b, c (+2)")
        );
    }

    #[test]
    fn complete_principal_never_reaches_later_buckets() {
        let documents = vec![
            LogicalDocument::new("despacho.html", COMPLETE_PRINCIPAL, Bucket::Principal),
            LogicalDocument::new(
                "certidao.txt",
                "Espécie de Perícia: Grafotécnica\nPromovido: Outro Nome",
                Bucket::Apoio,
            ),
            LogicalDocument::new("laudo.txt", "Laudo pericial\nPerito: Outro", Bucket::Laudo),
        ];
        let outcome = pipeline().process_loaded(loaded("0801234-50.2024.8.15.0001.zip", documents));

        assert_eq!(outcome.bucket_counts[&Bucket::Principal], 1);
        assert_eq!(outcome.bucket_counts[&Bucket::Apoio], 0);
        assert_eq!(outcome.bucket_counts[&Bucket::Laudo], 0);
        assert_eq!(outcome.result.get(Field::Defendant), Some("Banco Sul S.A."));
        assert_eq!(outcome.result.get(Field::ExaminationType), None);
        assert!(outcome
            .result
            .candidates(Field::Defendant)
            .iter()
            .all(|candidate| candidate.source != "certidao.txt"));
        assert_eq!(outcome.documents.len(), 1);
    }

    #[test]
    fn missing_principal_fields_expand_into_support_documents() {
        let principal = "DIRETORIA ESPECIAL\nProcesso nº 0801234-50.2024.8.15.0001\nValor arbitrado: R$ 850,00";
        let documents = vec![
            LogicalDocument::new("despacho.html", principal, Bucket::Principal),
            LogicalDocument::new("certidao.txt", "Espécie de Perícia: Grafotécnica", Bucket::Apoio),
            LogicalDocument::new("laudo.txt", "Laudo pericial conclusivo", Bucket::Laudo),
        ];
        let outcome = pipeline().process_loaded(loaded("0801234-50.2024.8.15.0001.zip", documents));

        assert_eq!(outcome.bucket_counts[&Bucket::Apoio], 1);
        assert_eq!(outcome.bucket_counts[&Bucket::Laudo], 0);
        assert_eq!(outcome.result.get(Field::ExaminationType), Some("Perícia grafotécnica"));
        assert_eq!(outcome.result.get(Field::FeeFactor), Some("7"));
        assert_eq!(outcome.result.get(Field::TabulatedValue), Some("R$ 370,00"));
        assert!(outcome
            .result
            .observations()
            .contains(&"Promovido ausente; revisar manualmente".to_string()));

        let attributions = outcome.attributions();
        let factor = attributions
            .iter()
            .find(|item| item.field == Field::FeeFactor)
            .unwrap();
        assert_eq!(factor.source.as_deref(), Some("certidao.txt"));
        assert_eq!(factor.bucket, Some(Bucket::Apoio));
    }

    #[test]
    fn primary_case_number_vote_reports_other_numbers() {
        let text = "Processo nº 0801234-50.2024.8.15.0001 nos autos do processo\n\
            Processo nº 0801234-50.2024.8.15.0001\n\
            Citado o processo 0812345-35.2023.8.15.0011";
        let documents = vec![LogicalDocument::new("despacho.html", text, Bucket::Principal)];
        let outcome = pipeline().process_loaded(loaded("sem_numero.zip", documents));

        assert_eq!(outcome.result.get(Field::CaseNumber), Some("0801234-50.2024.8.15.0001"));
        assert!(outcome
            .result
            .observations()
            .contains(&"CNJs adicionais mencionados: 0812345-35.2023.8.15.0011".to_string()));
    }

    #[test]
    fn admin_number_comes_from_the_archive_name() {
        let text = "Processo nº 0801234-50.2024.8.15.0001\nProcesso administrativo 2024123456";
        let documents = vec![LogicalDocument::new("despacho.html", text, Bucket::Principal)];
        let outcome = pipeline().process_loaded(loaded(
            "0801234-50.2024.8.15.0001_SEI_001234_50.2024.8.15.zip",
            documents,
        ));

        assert_eq!(outcome.result.get(Field::AdminCaseNumber), Some("2024123456"));
        let candidates = outcome.result.candidates(Field::AdminCaseNumber);
        let fallback = candidates.last().unwrap();
        assert_eq!(fallback.value, "0801234-50.2024.8.15");
        assert_eq!(fallback.source, "zip:0801234-50.2024.8.15.0001_SEI_001234_50.2024.8.15.zip");
        assert!(outcome
            .result
            .observations()
            .contains(&"Processo adm. citado nos documentos: 2024123456".to_string()));
    }

    #[test]
    fn empty_archive_reports_no_readable_document() {
        let outcome = pipeline().process_loaded(loaded("vazio.zip", Vec::new()));
        assert_eq!(outcome.result.observations(), [NO_READABLE_DOCUMENT_NOTE.to_string()]);
        assert!(outcome.documents.is_empty());
    }

    #[test]
    fn unmatched_archive_reports_no_compatible_document() {
        let documents = vec![LogicalDocument::new(
            "despacho.html",
            "Processo nº 0812345-35.2023.8.15.0011",
            Bucket::Principal,
        )];
        let outcome = pipeline().process_loaded(loaded("0801234-50.2024.8.15.0001.zip", documents));
        assert!(outcome
            .result
            .observations()
            .contains(&NO_MATCHING_DOCUMENT_NOTE.to_string()));
        assert_eq!(outcome.result.get(Field::CaseNumber), None);
    }

    struct FixedPages(&'static [&'static str]);

    impl PdfExtractor for FixedPages {
        fn extract_pages(&self, _bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
            Ok(self
                .0
                .iter()
                .zip(1..)
                .map(|(text, number)| PageText {
                    number,
                    text: text.to_string(),
                })
                .collect())
        }
    }

    #[test]
    fn combined_pdf_is_split_before_classification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0801234-50.2024.8.15.0001.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let outcome = pipeline()
            .with_extractor(Box::new(FixedPages(&[
                "1\notnemucoD\nDIRETORIA ESPECIAL\nProcesso nº 0801234-50.2024.8.15.0001",
                "2\notnemucoD\nLaudo pericial conclusivo",
            ])))
            .process_archive(&path)
            .unwrap();

        assert_eq!(outcome.bucket_counts[&Bucket::Principal], 1);
        assert_eq!(outcome.result.get(Field::CaseNumber), Some("0801234-50.2024.8.15.0001"));
        assert_eq!(outcome.documents[0].name, "0801234-50.2024.8.15.0001_doc01.pdf");
    }
}
