//! Durable outputs of a batch: one JSON record per archive, the consolidated
//! CSV table, the run-state checkpoint and the append-only audit log.

use crate::error::StoreError;
use crate::ingest::read_zip_member;
use crate::merge::{ArchiveOutcome, DocumentSummary, FieldAttribution};
use crate::models::{Bucket, Field};
use chrono::{DateTime, Local, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const INDEX_COLUMN: &str = "Nº DE PERÍCIAS";
pub const ARCHIVE_COLUMN: &str = "ARQUIVO_ORIGEM";
pub const OBSERVATIONS_COLUMN: &str = "OBSERVACOES";
const RECORD_SUFFIX: &str = ".json";
const TMP_SUFFIX: &str = ".tmp";
const RUN_PREFIX: &str = "extract-";

static MONEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)r\$\s*[0-9]{1,3}(?:\.[0-9]{3})*,?\d{2}").expect("valid regex")
});

/// Header of the consolidated table.
pub fn table_columns() -> Vec<&'static str> {
    std::iter::once(INDEX_COLUMN)
        .chain(Field::ALL.iter().map(|field| field.column()))
        .chain([ARCHIVE_COLUMN, OBSERVATIONS_COLUMN])
        .collect()
}

/// Writes through a sibling temp file and renames it into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))?;
    let tmp = path.with_file_name(format!("{file_name}{TMP_SUFFIX}"));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// One archive's row, as persisted by the worker that processed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub archive: String,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub values: BTreeMap<Field, String>,
    #[serde(default)]
    pub observations: Vec<String>,
}

impl ArchiveRecord {
    pub fn from_outcome(outcome: &ArchiveOutcome) -> Self {
        let values = Field::ALL
            .into_iter()
            .filter_map(|field| {
                outcome
                    .result
                    .get(field)
                    .filter(|value| !value.trim().is_empty())
                    .map(|value| (field, value.to_string()))
            })
            .collect();
        Self {
            archive: outcome.name.clone(),
            checksum: outcome.checksum.clone(),
            values,
            observations: outcome.result.observations().to_vec(),
        }
    }

    pub fn value(&self, field: Field) -> &str {
        self.values.get(&field).map(String::as_str).unwrap_or_default()
    }

    /// `VALOR ARBITRADO`, or the first monetary amount of the CM column, then
    /// of the DE column.
    pub fn arbitrated_value(&self) -> String {
        let stored = self.value(Field::ArbitratedValue).trim();
        if !stored.is_empty() {
            return stored.to_string();
        }
        [Field::ArbitratedValueCm, Field::ArbitratedValueDe]
            .into_iter()
            .find_map(|field| MONEY_RE.find(self.value(field)))
            .map(|found| found.as_str().trim().to_string())
            .unwrap_or_default()
    }

    /// Table row in [`table_columns`] order.
    pub fn row(&self, index: usize) -> Vec<String> {
        let mut row = Vec::with_capacity(Field::ALL.len() + 3);
        row.push(format!("{index:02}"));
        for field in Field::ALL {
            if field == Field::ArbitratedValue {
                row.push(self.arbitrated_value());
            } else {
                row.push(self.value(field).to_string());
            }
        }
        row.push(self.archive.clone());
        row.push(self.observations.join("; "));
        row
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Consolidation {
    pub rows: usize,
    /// File names of records that could not be read.
    pub corrupted: Vec<String>,
}

/// Per-archive records under one directory, keyed by archive name.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, archive: &str) -> Result<PathBuf, StoreError> {
        let usable = !archive.trim().is_empty()
            && archive != "."
            && archive != ".."
            && !archive.contains(['/', '\\']);
        if !usable {
            return Err(StoreError::InvalidKey(archive.to_string()));
        }
        Ok(self.root.join(format!("{archive}{RECORD_SUFFIX}")))
    }

    pub fn save(&self, record: &ArchiveRecord) -> Result<PathBuf, StoreError> {
        let path = self.record_path(&record.archive)?;
        write_atomic(&path, &serde_json::to_vec_pretty(record)?)?;
        debug!(archive = %record.archive, path = %path.display(), "record saved");
        Ok(path)
    }

    pub fn load(&self, archive: &str) -> Result<Option<ArchiveRecord>, StoreError> {
        let path = self.record_path(archive)?;
        if !path.exists() {
            return Ok(None);
        }
        Self::read_record(&path).map(Some)
    }

    fn record_files(&self) -> Result<Vec<(String, PathBuf)>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if let Some(archive) = name.strip_suffix(RECORD_SUFFIX) {
                files.push((archive.to_string(), path.clone()));
            }
        }
        files.sort();
        Ok(files)
    }

    fn read_record(path: &Path) -> Result<ArchiveRecord, StoreError> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    /// Archive names with a readable record. A record that no longer parses
    /// does not count, so its archive is processed again.
    pub fn existing(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .record_files()?
            .into_iter()
            .filter(|(_, path)| Self::read_record(path).is_ok())
            .map(|(archive, _)| archive)
            .collect())
    }

    /// Readable records sorted by archive name, plus the file names of the
    /// unreadable ones.
    pub fn records(&self) -> Result<(Vec<ArchiveRecord>, Vec<String>), StoreError> {
        let mut records = Vec::new();
        let mut corrupted = Vec::new();
        for (_, path) in self.record_files()? {
            match Self::read_record(&path) {
                Ok(record) => records.push(record),
                Err(error) => {
                    let name = path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    warn!(record = %name, error = %error, "corrupted record ignored");
                    corrupted.push(name);
                }
            }
        }
        Ok((records, corrupted))
    }

    /// Rewrites the consolidated table from every durable record, numbering
    /// rows from 1.
    pub fn consolidate(&self, table: &Path) -> Result<Consolidation, StoreError> {
        let (records, corrupted) = self.records()?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(table_columns())?;
        for (position, record) in records.iter().enumerate() {
            writer.write_record(record.row(position + 1))?;
        }
        writer.flush()?;
        let bytes = writer
            .into_inner()
            .map_err(|error| StoreError::Io(std::io::Error::other(error.to_string())))?;
        write_atomic(table, &bytes)?;

        if !corrupted.is_empty() {
            warn!(count = corrupted.len(), files = ?corrupted, "records excluded from consolidation");
        }
        Ok(Consolidation {
            rows: records.len(),
            corrupted,
        })
    }
}

/// Checkpoint of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_files: BTreeSet<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            created_at: Utc::now(),
            processed_files: BTreeSet::new(),
            completed: false,
            last_update: None,
            output: None,
        }
    }

    pub fn path(log_dir: &Path, run_id: &str) -> PathBuf {
        log_dir.join(format!("{run_id}.state.json"))
    }

    /// `None` when the run has no checkpoint.
    pub fn load(log_dir: &Path, run_id: &str) -> Result<Option<Self>, StoreError> {
        let path = Self::path(log_dir, run_id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&fs::read(path)?)?))
    }

    pub fn save(&mut self, log_dir: &Path, completed: bool) -> Result<PathBuf, StoreError> {
        self.completed = completed;
        self.last_update = Some(Utc::now());
        let path = Self::path(log_dir, &self.run_id);
        write_atomic(&path, &serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub run_id: String,
    pub zip: String,
    #[serde(default)]
    pub zip_path: String,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub bucket_counts: BTreeMap<Bucket, usize>,
    #[serde(default)]
    pub documents: Vec<DocumentSummary>,
    #[serde(default)]
    pub fields: Vec<FieldAttribution>,
    #[serde(default)]
    pub observations: Vec<String>,
}

impl AuditEntry {
    pub fn from_outcome(run_id: &str, outcome: &ArchiveOutcome) -> Self {
        Self {
            run_id: run_id.to_string(),
            zip: outcome.name.clone(),
            zip_path: outcome.path.display().to_string(),
            checksum: outcome.checksum.clone(),
            bucket_counts: outcome.bucket_counts.clone(),
            documents: outcome.documents.clone(),
            fields: outcome.attributions(),
            observations: outcome.result.observations().to_vec(),
        }
    }
}

/// `<log_dir>/<run_id>.sources.jsonl`, appended by the coordinator only.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(log_dir: &Path, run_id: &str) -> Self {
        Self {
            path: log_dir.join(format!("{run_id}.sources.jsonl")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entries: &[AuditEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        for entry in entries {
            let mut line = serde_json::to_vec(entry)?;
            line.push(b'\n');
            file.write_all(&line)?;
        }
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Vec<AuditEntry>, StoreError> {
        let reader = BufReader::new(fs::File::open(path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

/// Copies the documents of the selected buckets out of the archives listed in
/// an audit log, to `<output>/<archive stem>/<bucket>/<file>`. Archives that
/// moved or no longer open are skipped.
pub fn export_documents(
    sources: &Path,
    output: &Path,
    buckets: &BTreeSet<Bucket>,
    limit: Option<usize>,
) -> Result<Vec<PathBuf>, StoreError> {
    let entries = AuditLog::read(sources)?;
    let mut copied = Vec::new();

    for entry in entries.iter().take(limit.unwrap_or(usize::MAX)) {
        if entry.zip_path.is_empty() {
            continue;
        }
        let archive = Path::new(&entry.zip_path);
        if !archive.exists() {
            debug!(archive = %entry.zip, "archive missing, export skipped");
            continue;
        }
        let stem = Path::new(&entry.zip)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| entry.zip.clone());

        for document in &entry.documents {
            if !buckets.is_empty() && !buckets.contains(&document.bucket) {
                continue;
            }
            let bytes = match read_zip_member(archive, &document.name) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(error) => {
                    warn!(archive = %entry.zip, error = %error, "archive unreadable, export skipped");
                    break;
                }
            };
            let Some(file_name) = Path::new(&document.name).file_name() else {
                continue;
            };
            let target = output.join(&stem).join(document.bucket.as_str()).join(file_name);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, bytes)?;
            copied.push(target);
        }
    }

    info!(copied = copied.len(), sources = %sources.display(), "documents exported");
    Ok(copied)
}

/// `extract-YYYYMMDD-HHMMSS-xxxxxx`.
pub fn generate_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{RUN_PREFIX}{}-{}", Local::now().format("%Y%m%d-%H%M%S"), &suffix[..6])
}

/// Removes run logs and state files older than `days`. Zero disables it.
pub fn cleanup_old_logs(log_dir: &Path, days: u64) -> Result<usize, StoreError> {
    if days == 0 || !log_dir.exists() {
        return Ok(0);
    }
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(days * 24 * 60 * 60))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0;
    for entry in fs::read_dir(log_dir)? {
        let Ok(entry) = entry else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let managed = name.starts_with(RUN_PREFIX)
            && (name.ends_with(".log") || name.ends_with(".state.json"));
        if !managed {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .is_ok_and(|modified| modified < cutoff);
        if stale && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        info!(removed, log_dir = %log_dir.display(), "old run logs removed");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn record(archive: &str, values: &[(Field, &str)]) -> ArchiveRecord {
        ArchiveRecord {
            archive: archive.to_string(),
            checksum: "abc".to_string(),
            values: values
                .iter()
                .map(|(field, value)| (*field, value.to_string()))
                .collect(),
            observations: vec!["Sem PERITO".to_string(), "Sem PROCESSO Nº".to_string()],
        }
    }

    #[test]
    fn columns_wrap_the_field_headers() {
        let columns = table_columns();
        assert_eq!(columns.len(), 26);
        assert_eq!(columns[0], INDEX_COLUMN);
        assert_eq!(columns[1], "DATA DA REQUISIÇÃO");
        assert_eq!(columns[25], OBSERVATIONS_COLUMN);
    }

    #[test]
    fn arbitrated_value_falls_back_to_council_then_directorate() {
        let stored = record("a.zip", &[(Field::ArbitratedValue, "R$ 1,00"), (Field::ArbitratedValueCm, "R$ 2,00")]);
        assert_eq!(stored.arbitrated_value(), "R$ 1,00");

        let council = record(
            "b.zip",
            &[
                (Field::ArbitratedValueCm, "conforme certidão R$ 1.500,00"),
                (Field::ArbitratedValueDe, "R$ 900,00"),
            ],
        );
        assert_eq!(council.arbitrated_value(), "R$ 1.500,00");

        let directorate = record(
            "c.zip",
            &[(Field::ArbitratedValueCm, "sem valor"), (Field::ArbitratedValueDe, "R$ 900,00")],
        );
        assert_eq!(directorate.arbitrated_value(), "R$ 900,00");
    }

    #[test]
    fn row_follows_column_order() {
        let row = record("a.zip", &[(Field::Expert, "Maria")]).row(3);
        assert_eq!(row.len(), table_columns().len());
        assert_eq!(row[0], "03");
        assert_eq!(row[8], "Maria");
        assert_eq!(row[24], "a.zip");
        assert_eq!(row[25], "Sem PERITO; Sem PROCESSO Nº");
    }

    #[test]
    fn corrupt_records_are_neither_durable_nor_consolidated() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("records"));
        store.save(&record("b.zip", &[(Field::Expert, "B")])).unwrap();
        store.save(&record("a.zip", &[(Field::Expert, "A")])).unwrap();
        fs::write(store.root().join("c.zip.json"), b"{not json").unwrap();
        fs::write(store.root().join("d.zip.json.tmp"), b"partial").unwrap();

        assert_eq!(
            store.existing().unwrap(),
            ["a.zip", "b.zip"].map(String::from).into_iter().collect::<BTreeSet<_>>()
        );

        let table = dir.path().join("out/table.csv");
        let report = store.consolidate(&table).unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(report.corrupted, vec!["c.zip.json".to_string()]);

        let mut reader = csv::Reader::from_path(&table).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 26);
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "01");
        assert_eq!(&rows[0][24], "a.zip");
        assert_eq!(&rows[1][0], "02");
        assert_eq!(&rows[1][8], "B");
    }

    #[test]
    fn records_round_trip_through_the_store() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let saved = record("x.zip", &[(Field::CaseNumber, "0801234-50.2024.8.15.0001")]);
        store.save(&saved).unwrap();
        assert_eq!(store.load("x.zip").unwrap(), Some(saved));
        assert_eq!(store.load("y.zip").unwrap(), None);
        assert!(matches!(store.record_path("../x.zip"), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn run_state_grows_and_persists() {
        let dir = tempdir().unwrap();
        assert_eq!(RunState::load(dir.path(), "extract-1").unwrap(), None);

        let mut state = RunState::new("extract-1");
        state.processed_files.insert("b.zip".to_string());
        state.processed_files.insert("a.zip".to_string());
        state.save(dir.path(), false).unwrap();

        let raw = fs::read_to_string(RunState::path(dir.path(), "extract-1")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["processed_files"], serde_json::json!(["a.zip", "b.zip"]));
        assert_eq!(json["completed"], serde_json::json!(false));

        let loaded = RunState::load(dir.path(), "extract-1").unwrap().unwrap();
        assert_eq!(loaded.processed_files.len(), 2);
        assert!(loaded.last_update.is_some());
    }

    #[test]
    fn audit_log_appends_lines() {
        let dir = tempdir().unwrap();
        let log = AuditLog::new(dir.path(), "extract-1");
        let entry = AuditEntry {
            run_id: "extract-1".to_string(),
            zip: "a.zip".to_string(),
            zip_path: String::new(),
            checksum: String::new(),
            bucket_counts: BTreeMap::from([(Bucket::Principal, 1)]),
            documents: Vec::new(),
            fields: Vec::new(),
            observations: vec!["Sem PERITO".to_string()],
        };
        log.append(&[entry.clone()]).unwrap();
        log.append(&[entry.clone()]).unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.contains(r#""bucket_counts":{"principal":1}"#));
        assert_eq!(AuditLog::read(log.path()).unwrap(), vec![entry.clone(), entry]);
    }

    #[test]
    fn run_ids_are_prefixed_and_unique() {
        let first = generate_run_id();
        let second = generate_run_id();
        assert!(first.starts_with("extract-"));
        assert_eq!(first.len(), "extract-20250101-120000-abcdef".len());
        assert_ne!(first, second);
    }

    #[test]
    fn cleanup_only_touches_stale_run_files() {
        let dir = tempdir().unwrap();
        let old = SystemTime::now() - Duration::from_secs(40 * 24 * 60 * 60);
        for name in ["extract-old.log", "extract-old.state.json", "other.log"] {
            let path = dir.path().join(name);
            fs::write(&path, b"x").unwrap();
            fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(old)
                .unwrap();
        }
        fs::write(dir.path().join("extract-new.log"), b"x").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), 0).unwrap(), 0);
        assert_eq!(cleanup_old_logs(dir.path(), 30).unwrap(), 2);
        assert!(dir.path().join("other.log").exists());
        assert!(dir.path().join("extract-new.log").exists());
    }
}
