use polars::prelude::*;
use std::path::Path;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{ORIGIN, records_to_frame};
use crate::pipeline::input_locator::locate_inputs;
use crate::pipeline::run_summary::{RunSummary, Stage};
use crate::processor::{DedupMerger, MissingProduct, RecordCaster, SchemaNormalizer};
use crate::storage::{MasterStore, read_table};

/// Runs one consolidation pass: locate input, normalize, cast, merge into
/// the master, back up, persist.
///
/// No stage is retried. A failure at any point ends the run in `Failed`; a
/// failure before `Backup` leaves the master untouched, and a failed backup
/// prevents the overwrite.
pub struct Consolidator {
    config: PipelineConfig,
    normalizer: SchemaNormalizer,
    caster: RecordCaster,
    merger: DedupMerger,
    store: MasterStore,
}

impl Consolidator {
    pub fn new(config: PipelineConfig) -> LedgerResult<Self> {
        config
            .validate()
            .map_err(|e| LedgerError::Config(format!("{:#}", e)))?;

        let merger = DedupMerger::new(
            config
                .business_key()
                .map_err(|e| LedgerError::Config(format!("{:#}", e)))?,
        );
        let normalizer = SchemaNormalizer::new(config.synonym_table());
        let caster = RecordCaster::new(config.validation.fill_policy, MissingProduct::Drop)
            .with_date_formats(config.validation.date_formats.clone());
        let store = MasterStore::new(&config.paths.master_path, &config.paths.backup_dir);

        Ok(Self {
            config,
            normalizer,
            caster,
            merger,
            store,
        })
    }

    pub fn store(&self) -> &MasterStore {
        &self.store
    }

    /// Executes the run and reports how it ended. Never panics on bad input
    /// and never returns an error: failures are recorded in the summary.
    pub fn run(&self) -> RunSummary {
        let mut summary = RunSummary::start();
        info!("Starting consolidation into {}", self.store.master_path().display());

        match self.execute(&mut summary) {
            Ok(()) => {
                summary.finish();
                info!(
                    "Consolidation done: {} rows scanned, {} valid, {} added, {} updated, master now {} rows",
                    summary.rows_scanned,
                    summary.rows_valid,
                    summary.rows_added,
                    summary.rows_updated,
                    summary.master_rows
                );
            }
            Err(e) => {
                let stage = summary.stage;
                summary.fail(&e);
                if stage.is_abandonable() {
                    warn!("Run stopped at {:?}, master left unchanged: {}", stage, e);
                } else {
                    error!("Run failed at {:?}: {}", stage, e);
                }
            }
        }
        summary
    }

    fn execute(&self, summary: &mut RunSummary) -> LedgerResult<()> {
        summary.enter(Stage::LocateInput);
        let inputs = locate_inputs(&self.config.paths.raw_dir, self.config.input.selection, |p| {
            self.config.accepts_extension(p)
        })?;
        summary.input_files = inputs.clone();
        let _lock = self.store.lock()?;

        summary.enter(Stage::Normalize);
        let mut frames = Vec::with_capacity(inputs.len());
        for path in &inputs {
            let raw = read_table(path)?;
            info!("Read {} rows from {}", raw.height(), path.display());
            summary.rows_scanned += raw.height();

            let mut normalized = self.normalizer.normalize(&raw)?;
            if normalized.column(ORIGIN).is_err() {
                let tags = vec![origin_of(path); normalized.height()];
                normalized.with_column(Series::new(ORIGIN.into(), tags))?;
            }
            frames.push(normalized);
        }

        summary.enter(Stage::ValidateCast);
        let mut records = Vec::new();
        for frame in &frames {
            let (mut batch, stats) = self.caster.cast_records(frame)?;
            summary.rows_valid += stats.valid_rows;
            records.append(&mut batch);
        }
        let incoming = records_to_frame(&records)?;
        if summary.rows_valid < summary.rows_scanned {
            warn!(
                "{} of {} rows discarded during validation",
                summary.rows_scanned - summary.rows_valid,
                summary.rows_scanned
            );
        }

        summary.enter(Stage::LoadMaster);
        let master = self.store.load()?;

        summary.enter(Stage::Merge);
        let outcome = self.merger.merge(&master, &incoming)?;
        summary.rows_added = outcome.stats.added;
        summary.rows_updated = outcome.stats.updated;
        summary.rows_removed = outcome.stats.removed;

        summary.enter(Stage::Backup);
        summary.backup_path = self.store.backup()?;

        summary.enter(Stage::Persist);
        let mut merged = outcome.frame;
        self.store.persist(&mut merged)?;
        summary.master_rows = merged.height();
        Ok(())
    }
}

/// Origin label for rows of a file that carries none: the file stem.
fn origin_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("input")
        .to_string()
}
