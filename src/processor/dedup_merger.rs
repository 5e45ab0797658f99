use chrono::{DateTime, SubsecRound, Utc};
use polars::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::info;

use crate::error::LedgerResult;
use crate::models::{BusinessKey, RecordKey, SaleRecord, records_from_frame, records_to_frame};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub master_rows: usize,
    pub incoming_rows: usize,
    /// Keys that were not in the master before the merge.
    pub added: usize,
    /// Master keys whose row was replaced by an incoming row.
    pub updated: usize,
    /// Rows discarded because a later row had the same key.
    pub removed: usize,
    pub final_rows: usize,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub frame: DataFrame,
    pub stats: MergeStats,
}

/// Combines an incoming batch with the master, keeping the most recently
/// ingested row per business key.
///
/// Merging is idempotent on content: `merge(merge(M, B), B)` maps every
/// business key to the same price and unit values as `merge(M, B)`; only the
/// `ingestion_ts` of the re-ingested rows moves forward.
pub struct DedupMerger {
    key: BusinessKey,
}

impl DedupMerger {
    pub fn new(key: BusinessKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &BusinessKey {
        &self.key
    }

    pub fn merge(&self, master: &DataFrame, incoming: &DataFrame) -> LedgerResult<MergeOutcome> {
        self.merge_at(master, incoming, Utc::now())
    }

    /// Same as [`merge`](Self::merge) with an explicit ingestion instant.
    pub fn merge_at(
        &self,
        master: &DataFrame,
        incoming: &DataFrame,
        now: DateTime<Utc>,
    ) -> LedgerResult<MergeOutcome> {
        let master_records = records_from_frame(master)?;
        let incoming_records = records_from_frame(incoming)?;
        let (merged, stats) = self.merge_records(master_records, incoming_records, now);

        info!(
            "Merged {} master + {} incoming rows -> {} rows (added {}, updated {}, removed {})",
            stats.master_rows,
            stats.incoming_rows,
            stats.final_rows,
            stats.added,
            stats.updated,
            stats.removed
        );

        Ok(MergeOutcome {
            frame: records_to_frame(&merged)?,
            stats,
        })
    }

    /// Record-level merge; the result is sorted by business key ascending.
    pub fn merge_records(
        &self,
        master: Vec<SaleRecord>,
        incoming: Vec<SaleRecord>,
        now: DateTime<Utc>,
    ) -> (Vec<SaleRecord>, MergeStats) {
        // persisted stamps carry microseconds, so stamp at the same precision
        let stamp = now.trunc_subsecs(6);

        let master_keys: HashSet<RecordKey> = master.iter().map(|r| self.key.key_of(r)).collect();
        let incoming_keys: HashSet<RecordKey> =
            incoming.iter().map(|r| self.key.key_of(r)).collect();

        let master_rows = master.len();
        let incoming_rows = incoming.len();

        let mut working: Vec<SaleRecord> = master;
        working.extend(incoming.into_iter().map(|mut record| {
            record.ingestion_ts = Some(stamp);
            record
        }));

        // stable: equal stamps keep master-then-incoming, batch order within
        working.sort_by_key(|r| r.ingestion_ts);

        let working_rows = working.len();
        let mut latest: BTreeMap<RecordKey, SaleRecord> = BTreeMap::new();
        for record in working {
            latest.insert(self.key.key_of(&record), record);
        }
        let merged: Vec<SaleRecord> = latest.into_values().collect();

        let stats = MergeStats {
            master_rows,
            incoming_rows,
            added: incoming_keys.difference(&master_keys).count(),
            updated: incoming_keys.intersection(&master_keys).count(),
            removed: working_rows - merged.len(),
            final_rows: merged.len(),
        };

        (merged, stats)
    }
}
