use crate::codec::{self, DecodeReport};
use crate::dates;
use crate::gateway::{self, DocumentStore, GatewayError};
use crate::stage::Stage;
use crate::store::AttendanceStore;
use tracing::{info, warn};

/// One stage's grid plus the identity of the snapshot it was loaded from.
#[derive(Debug, Clone)]
pub struct AttendanceSession {
    pub stage: Stage,
    pub year: i32,
    pub month0: u32,
    pub store: AttendanceStore,
    pub snapshot_id: Option<String>,
    pub updated_at: Option<String>,
    pub report: DecodeReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub snapshot_id: String,
    pub created: bool,
    pub updated_at: String,
    pub rows: usize,
}

impl AttendanceSession {
    /// Loads the latest snapshot of `stage` aligned to the Fridays of the given month.
    pub fn open(docs: &dyn DocumentStore, stage: Stage, year: i32, month0: u32) -> Result<Self, GatewayError> {
        let layout = stage.layout();
        let axis = dates::fridays_in_month(year, month0);
        let latest = gateway::load_latest(docs, stage.collection())?;
        let session = match latest {
            Some(snapshot) => {
                let (store, report) = codec::decode_records(&snapshot.body.data, &layout, axis);
                let updated_at = snapshot.body.updated_at().map(str::to_string);
                info!(
                    stage = stage.name(),
                    snapshot = %snapshot.id,
                    rows = report.loaded,
                    skipped = report.skipped.len(),
                    "opened attendance"
                );
                Self {
                    stage,
                    year,
                    month0,
                    store,
                    snapshot_id: Some(snapshot.id),
                    updated_at,
                    report,
                }
            }
            None => {
                info!(stage = stage.name(), "no attendance snapshot yet");
                Self {
                    stage,
                    year,
                    month0,
                    store: AttendanceStore::new(layout, axis),
                    snapshot_id: None,
                    updated_at: None,
                    report: DecodeReport::default(),
                }
            }
        };
        Ok(session)
    }

    /// Writes every partition and group as one snapshot: a create the first
    /// time, an in-place update afterwards. The grid is never touched.
    pub fn save(&mut self, docs: &dyn DocumentStore) -> Result<SaveOutcome, GatewayError> {
        let rows = codec::encode_records(&self.store);
        let collection = self.stage.collection();
        let (snapshot, created) = match self.snapshot_id.clone() {
            Some(id) => match gateway::update(docs, collection, &id, rows) {
                Ok(s) => (s, false),
                Err(e @ GatewayError::NotFound { .. }) => {
                    // The next manual save creates a fresh snapshot.
                    warn!(stage = self.stage.name(), error = %e, "snapshot vanished");
                    self.snapshot_id = None;
                    return Err(e);
                }
                Err(e) => return Err(e),
            },
            None => (gateway::create(docs, collection, rows)?, true),
        };
        self.snapshot_id = Some(snapshot.id.clone());
        self.updated_at = Some(snapshot.updated_at.clone());
        Ok(SaveOutcome {
            snapshot_id: snapshot.id,
            created,
            updated_at: snapshot.updated_at,
            rows: snapshot.rows,
        })
    }
}
