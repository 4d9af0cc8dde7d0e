use crate::config::BatchOptions;
use crate::error::BatchError;
use crate::ingest::archive_name;
use crate::merge::ExtractionPipeline;
use crate::store::{generate_run_id, ArchiveRecord, ArtifactStore, AuditEntry, AuditLog, RunState};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

/// Outcome of one batch invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub run_id: String,
    pub total: usize,
    /// Archives already durable before this invocation.
    pub skipped: usize,
    pub processed: usize,
    pub failed: usize,
    /// Worklist entries whose file name repeats an earlier entry's; records
    /// are keyed by file name, so only the first one is processed.
    pub duplicates: Vec<PathBuf>,
    pub corrupted: BTreeSet<String>,
    pub table: PathBuf,
    pub audit_log: PathBuf,
    pub state: PathBuf,
}

/// Message from a worker to the coordinator.
enum Completion {
    Done {
        name: String,
        size_bytes: u64,
        entry: Box<AuditEntry>,
    },
    Failed {
        name: String,
        error: String,
    },
}

/// Throughput counters between two checkpoints.
struct Window {
    bytes: u64,
    started: Instant,
}

impl Window {
    fn new() -> Self {
        Self {
            bytes: 0,
            started: Instant::now(),
        }
    }
}

/// Runs a worklist through a bounded pool of blocking workers that report to
/// a single coordinator. Only the coordinator writes the run state, the table
/// and the audit log.
pub struct BatchRunner {
    pipeline: Arc<ExtractionPipeline>,
    options: BatchOptions,
}

impl BatchRunner {
    pub fn new(pipeline: ExtractionPipeline, options: BatchOptions) -> Self {
        Self::shared(Arc::new(pipeline), options)
    }

    pub fn shared(pipeline: Arc<ExtractionPipeline>, options: BatchOptions) -> Self {
        Self { pipeline, options }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Fresh state for a new run, or the checkpoint of the run to resume.
    pub fn prepare_state(&self) -> Result<RunState, BatchError> {
        match &self.options.resume {
            Some(run_id) => RunState::load(&self.options.log_dir, run_id)?.ok_or_else(|| {
                BatchError::UnknownRun {
                    run_id: run_id.clone(),
                    path: RunState::path(&self.options.log_dir, run_id)
                        .display()
                        .to_string(),
                }
            }),
            None => Ok(RunState::new(
                self.options.run_id.clone().unwrap_or_else(generate_run_id),
            )),
        }
    }

    pub async fn run(&self, worklist: Vec<PathBuf>) -> Result<BatchSummary, BatchError> {
        if worklist.is_empty() {
            return Err(BatchError::EmptyWorklist);
        }

        let mut state = self.prepare_state()?;
        let table = self.options.table_path();
        state.output = Some(table.clone());

        let store = Arc::new(ArtifactStore::new(self.options.records_dir()));
        let mut durable = state.processed_files.clone();
        if self.options.resume.is_some() || self.options.skip_existing {
            durable.extend(store.existing()?);
        }

        let mut pending = Vec::new();
        let mut seen = BTreeSet::new();
        let mut duplicates = Vec::new();
        let mut skipped = 0usize;
        for path in worklist.iter() {
            let name = archive_name(path)?;
            if !seen.insert(name.clone()) {
                warn!(archive = %path.display(), "another archive with the same file name is already in the worklist; ignored");
                duplicates.push(path.clone());
            } else if durable.contains(&name) {
                skipped += 1;
            } else {
                pending.push((name, path.clone()));
            }
        }
        let total = worklist.len();
        if let Some(limit) = self.options.limit {
            pending.truncate(limit);
        }

        let workers = self.options.workers.max(1);
        let interval = self.options.checkpoint_interval.max(1);
        info!(
            run_id = %state.run_id,
            total,
            skipped,
            pending = pending.len(),
            workers,
            checkpoint_interval = interval,
            "worklist ready"
        );

        let audit = AuditLog::new(&self.options.log_dir, &state.run_id);
        let mut summary = BatchSummary {
            run_id: state.run_id.clone(),
            total,
            skipped,
            processed: 0,
            failed: 0,
            duplicates,
            corrupted: BTreeSet::new(),
            table: table.clone(),
            audit_log: audit.path().to_path_buf(),
            state: RunState::path(&self.options.log_dir, &state.run_id),
        };

        let (sender, mut receiver) = mpsc::channel::<Completion>(workers * 2);
        let semaphore = Arc::new(Semaphore::new(workers));
        let run_id: Arc<str> = Arc::from(state.run_id.as_str());
        let mut handles = Vec::with_capacity(pending.len());

        for (name, path) in pending {
            let sender = sender.clone();
            let semaphore = Arc::clone(&semaphore);
            let pipeline = Arc::clone(&self.pipeline);
            let store = Arc::clone(&store);
            let run_id = Arc::clone(&run_id);

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let worker_name = name.clone();
                let completion = tokio::task::spawn_blocking(move || {
                    process_one(&pipeline, &store, &run_id, &path, worker_name)
                })
                .await
                .unwrap_or_else(|error| Completion::Failed {
                    name,
                    error: error.to_string(),
                });
                report(&sender, completion).await;
            }));
        }
        drop(sender);

        let mut completed = 0usize;
        let mut window = Window::new();
        while let Some(completion) = receiver.recv().await {
            completed += 1;
            match completion {
                Completion::Done {
                    name,
                    size_bytes,
                    entry,
                } => {
                    audit.append(std::slice::from_ref(&*entry))?;
                    state.processed_files.insert(name);
                    summary.processed += 1;
                    window.bytes += size_bytes;
                }
                Completion::Failed { name, error } => {
                    warn!(archive = %name, error = %error, "archive failed; it will be retried on resume");
                    summary.failed += 1;
                }
            }

            if completed % interval == 0 {
                self.checkpoint(&mut state, &store, &table, &mut window, &mut summary, false)?;
            }
        }

        for handle in handles {
            handle.await?;
        }

        let finished = summary.skipped + summary.processed + summary.duplicates.len() == summary.total;
        self.checkpoint(&mut state, &store, &table, &mut window, &mut summary, finished)?;
        info!(
            run_id = %summary.run_id,
            processed = summary.processed,
            failed = summary.failed,
            skipped = summary.skipped,
            table = %table.display(),
            "run finished"
        );
        Ok(summary)
    }

    fn checkpoint(
        &self,
        state: &mut RunState,
        store: &ArtifactStore,
        table: &Path,
        window: &mut Window,
        summary: &mut BatchSummary,
        completed: bool,
    ) -> Result<(), BatchError> {
        let consolidation = store.consolidate(table)?;
        summary.corrupted.extend(consolidation.corrupted);
        state.save(&self.options.log_dir, completed)?;

        let seconds = window.started.elapsed().as_secs_f64();
        let megabytes = window.bytes as f64 / 1e6;
        let rate = if seconds > 0.0 { megabytes / seconds } else { 0.0 };
        info!(
            records = state.processed_files.len(),
            rows = consolidation.rows,
            megabytes,
            seconds,
            mb_per_s = rate,
            completed,
            "checkpoint saved"
        );
        *window = Window::new();
        Ok(())
    }
}

/// Hands a completion to the coordinator. `false` when the coordinator is
/// gone; the record, if saved, is picked up by the next resume.
async fn report(sender: &mpsc::Sender<Completion>, completion: Completion) -> bool {
    let archive = match &completion {
        Completion::Done { name, .. } | Completion::Failed { name, .. } => name.clone(),
    };
    match sender.send(completion).await {
        Ok(()) => true,
        Err(_) => {
            warn!(archive = %archive, "coordinator stopped; completion dropped");
            false
        }
    }
}

fn process_one(
    pipeline: &ExtractionPipeline,
    store: &ArtifactStore,
    run_id: &str,
    path: &Path,
    name: String,
) -> Completion {
    let outcome = match pipeline.process_archive(path) {
        Ok(outcome) => outcome,
        Err(error) => {
            return Completion::Failed {
                name,
                error: error.to_string(),
            }
        }
    };
    if let Err(error) = store.save(&ArchiveRecord::from_outcome(&outcome)) {
        return Completion::Failed {
            name,
            error: error.to_string(),
        };
    }
    Completion::Done {
        name,
        size_bytes: outcome.size_bytes,
        entry: Box::new(AuditEntry::from_outcome(run_id, &outcome)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionConfig;
    use crate::models::Field;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn options(dir: &TempDir) -> BatchOptions {
        BatchOptions {
            workers: 3,
            checkpoint_interval: 2,
            output_dir: dir.path().join("out"),
            table_path: None,
            log_dir: dir.path().join("logs"),
            run_id: Some("extract-test".to_string()),
            resume: None,
            skip_existing: false,
            limit: None,
        }
    }

    fn inputs(dir: &TempDir, count: usize) -> Vec<PathBuf> {
        let folder = dir.path().join("in");
        fs::create_dir_all(&folder).unwrap();
        (0..count)
            .map(|index| {
                let path = folder.join(format!("caso_{index:02}.txt"));
                fs::write(&path, format!("Perito: Perito {index}\nValor arbitrado: R$ 500,00")).unwrap();
                path
            })
            .collect()
    }

    fn runner(options: BatchOptions) -> BatchRunner {
        BatchRunner::new(ExtractionPipeline::new(ExtractionConfig::default()), options)
    }

    #[tokio::test]
    async fn empty_worklist_is_rejected() {
        let dir = tempdir().unwrap();
        let error = runner(options(&dir)).run(Vec::new()).await.unwrap_err();
        assert!(matches!(error, BatchError::EmptyWorklist));
    }

    #[tokio::test]
    async fn resuming_an_unknown_run_is_a_configuration_error() {
        let dir = tempdir().unwrap();
        let options = BatchOptions {
            run_id: None,
            resume: Some("extract-missing".to_string()),
            ..options(&dir)
        };
        let error = runner(options).run(inputs(&dir, 1)).await.unwrap_err();
        assert!(matches!(error, BatchError::UnknownRun { run_id, .. } if run_id == "extract-missing"));
    }

    #[tokio::test]
    async fn processes_every_archive_and_completes_the_state() {
        let dir = tempdir().unwrap();
        let options = options(&dir);
        let summary = runner(options.clone()).run(inputs(&dir, 5)).await.unwrap();

        assert_eq!(summary.processed, 5);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.skipped, 0);

        let state = RunState::load(&options.log_dir, "extract-test").unwrap().unwrap();
        assert!(state.completed);
        assert_eq!(state.processed_files.len(), 5);
        assert_eq!(state.output, Some(options.table_path()));

        let record = ArtifactStore::new(options.records_dir())
            .load("caso_03.txt")
            .unwrap()
            .unwrap();
        assert_eq!(record.value(Field::Expert), "Perito 3");

        let lines = fs::read_to_string(&summary.audit_log).unwrap();
        assert_eq!(lines.lines().count(), 5);
        let rows = csv::Reader::from_path(&summary.table).unwrap().records().count();
        assert_eq!(rows, 5);
    }

    #[tokio::test]
    async fn a_failing_archive_does_not_stop_the_batch() {
        let dir = tempdir().unwrap();
        let mut worklist = inputs(&dir, 2);
        worklist.push(dir.path().join("in/sumiu.zip"));

        let summary = runner(options(&dir)).run(worklist).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
    }

    fn stale_record(options: &BatchOptions, archive: &str) {
        let mut values = std::collections::BTreeMap::new();
        values.insert(Field::Expert, "Perito Antigo".to_string());
        ArtifactStore::new(options.records_dir())
            .save(&ArchiveRecord {
                archive: archive.to_string(),
                checksum: String::new(),
                values,
                observations: Vec::new(),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn fresh_run_refreshes_existing_records() {
        let dir = tempdir().unwrap();
        let options = BatchOptions {
            run_id: Some("extract-new".to_string()),
            ..options(&dir)
        };
        stale_record(&options, "caso_00.txt");

        let summary = runner(options.clone()).run(inputs(&dir, 1)).await.unwrap();
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.processed, 1);
        let record = ArtifactStore::new(options.records_dir())
            .load("caso_00.txt")
            .unwrap()
            .unwrap();
        assert_eq!(record.value(Field::Expert), "Perito 0");
    }

    #[tokio::test]
    async fn skip_existing_keeps_readable_records() {
        let dir = tempdir().unwrap();
        let options = BatchOptions {
            skip_existing: true,
            ..options(&dir)
        };
        stale_record(&options, "caso_00.txt");

        let summary = runner(options).run(inputs(&dir, 2)).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 1);
    }

    #[tokio::test]
    async fn truncated_record_is_processed_again() {
        let dir = tempdir().unwrap();
        let options = BatchOptions {
            skip_existing: true,
            ..options(&dir)
        };
        let records = options.records_dir();
        fs::create_dir_all(&records).unwrap();
        fs::write(records.join("caso_00.txt.json"), b"{\"archive\": \"caso_").unwrap();

        let summary = runner(options.clone()).run(inputs(&dir, 1)).await.unwrap();
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.processed, 1);
        assert!(summary.corrupted.is_empty());
        let rows = csv::Reader::from_path(&summary.table).unwrap().records().count();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn repeated_file_names_are_processed_once() {
        let dir = tempdir().unwrap();
        let mut worklist = Vec::new();
        for folder in ["a", "b"] {
            let folder = dir.path().join(folder);
            fs::create_dir_all(&folder).unwrap();
            let path = folder.join("caso.txt");
            fs::write(&path, "Perito: Ana").unwrap();
            worklist.push(path);
        }

        let summary = runner(options(&dir)).run(worklist.clone()).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.duplicates, vec![worklist[1].clone()]);
        let state = RunState::load(&options(&dir).log_dir, "extract-test").unwrap().unwrap();
        assert!(state.completed);
    }

    #[tokio::test]
    async fn report_notices_a_stopped_coordinator() {
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);
        let delivered = report(
            &sender,
            Completion::Failed {
                name: "caso.zip".to_string(),
                error: "boom".to_string(),
            },
        )
        .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn limit_caps_pending_archives() {
        let dir = tempdir().unwrap();
        let options = BatchOptions {
            limit: Some(2),
            ..options(&dir)
        };
        let summary = runner(options.clone()).run(inputs(&dir, 4)).await.unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.processed, 2);
        let state = RunState::load(&options.log_dir, "extract-test").unwrap().unwrap();
        assert!(!state.completed);
    }
}
