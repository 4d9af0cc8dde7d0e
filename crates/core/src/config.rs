use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Score deltas of the document priority key. Lower scores are read first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityWeights {
    pub base: i32,
    pub despacho_name: i32,
    pub laudo_name: i32,
    pub authorization_text: i32,
    pub certidao_name: i32,
    pub laudo_name_extra: i32,
    pub html_name: i32,
    /// Importance weight is `max(1, importance_ceiling - score)`.
    pub importance_ceiling: i32,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            base: 10,
            despacho_name: 5,
            laudo_name: 4,
            authorization_text: 3,
            certidao_name: 1,
            laudo_name_extra: 2,
            html_name: 1,
            importance_ceiling: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceRules {
    /// Accept a document carrying only administrative or judicial numbers
    /// when nothing anchors the archive yet.
    pub bootstrap_without_anchor: bool,
}

impl Default for RelevanceRules {
    fn default() -> Self {
        Self {
            bootstrap_without_anchor: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub priority: PriorityWeights,
    pub relevance: RelevanceRules,
    /// Minimum similarity for a closest-match fee table lookup.
    pub fee_match_cutoff: f64,
    pub min_year: i32,
    pub max_year: i32,
    pub currency_min: f64,
    pub currency_max: f64,
    pub classifier_snippet_chars: usize,
    /// Accepted documents scanned by the requisition date backfill.
    pub requisition_scan_documents: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            priority: PriorityWeights::default(),
            relevance: RelevanceRules::default(),
            fee_match_cutoff: 0.75,
            min_year: 2000,
            max_year: chrono::Local::now().year() + 1,
            currency_min: 10.0,
            currency_max: 500_000.0,
            classifier_snippet_chars: crate::classifier::CLASSIFIER_SNIPPET_CHARS,
            requisition_scan_documents: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub workers: usize,
    pub checkpoint_interval: usize,
    /// Per-archive records go under `<output_dir>/records`.
    pub output_dir: PathBuf,
    /// Consolidated table path; defaults to `<output_dir>/relatorio-pericias.csv`.
    pub table_path: Option<PathBuf>,
    pub log_dir: PathBuf,
    /// Run id for a fresh run; generated when absent.
    pub run_id: Option<String>,
    /// Run id to resume; its state file must exist.
    pub resume: Option<String>,
    /// Skip archives that already have a readable record even on a fresh
    /// run. Resumed runs always skip them.
    pub skip_existing: bool,
    pub limit: Option<usize>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(4),
            checkpoint_interval: 25,
            output_dir: PathBuf::from("outputs"),
            table_path: None,
            log_dir: PathBuf::from("logs/extract"),
            run_id: None,
            resume: None,
            skip_existing: false,
            limit: None,
        }
    }
}

impl BatchOptions {
    pub fn table_path(&self) -> PathBuf {
        self.table_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join("relatorio-pericias.csv"))
    }

    pub fn records_dir(&self) -> PathBuf {
        self.output_dir.join("records")
    }
}
