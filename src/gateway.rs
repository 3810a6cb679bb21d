use crate::codec::StoredRecord;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("snapshot {id} not found in {collection}")]
    NotFound { collection: String, id: String },
    #[error("document store failure: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("malformed snapshot body: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::Backend(_) => "store_failed",
            GatewayError::Malformed(_) => "malformed_snapshot",
        }
    }
}

/// Stored shape of a snapshot document. Elements of `data` and the
/// timestamp are kept loose so one bad record never hides the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBody {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub updated_at: Option<Value>,
}

impl SnapshotBody {
    fn new(rows: Vec<StoredRecord>, updated_at: &str) -> Self {
        Self {
            data: rows.into_iter().map(Value::Object).collect(),
            updated_at: Some(Value::from(updated_at)),
        }
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.updated_at.as_ref().and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub body: SnapshotBody,
}

/// Identity and timestamp of a snapshot that was just written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSnapshot {
    pub id: String,
    pub updated_at: String,
    pub rows: usize,
}

#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub body: String,
}

/// Schema-less document collections. `list` makes no ordering promise.
pub trait DocumentStore {
    fn list(&self, collection: &str) -> Result<Vec<StoredDocument>, GatewayError>;
    fn insert(&self, collection: &str, body: &str) -> Result<String, GatewayError>;
    /// Replaces the body of an existing document. Returns false when `id` is absent.
    fn replace(&self, collection: &str, id: &str, body: &str) -> Result<bool, GatewayError>;
}

pub struct SqliteDocumentStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteDocumentStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl DocumentStore for SqliteDocumentStore<'_> {
    fn list(&self, collection: &str) -> Result<Vec<StoredDocument>, GatewayError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, body FROM documents WHERE collection = ?")?;
        let docs = stmt
            .query_map([collection], |r| {
                Ok(StoredDocument {
                    id: r.get(0)?,
                    body: r.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(docs)
    }

    fn insert(&self, collection: &str, body: &str) -> Result<String, GatewayError> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO documents(id, collection, body) VALUES(?, ?, ?)",
            (&id, collection, body),
        )?;
        Ok(id)
    }

    fn replace(&self, collection: &str, id: &str, body: &str) -> Result<bool, GatewayError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM documents WHERE collection = ? AND id = ?",
                (collection, id),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        if !exists {
            return Ok(false);
        }
        self.conn.execute(
            "UPDATE documents SET body = ? WHERE collection = ? AND id = ?",
            (body, collection, id),
        )?;
        Ok(true)
    }
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: Option<&str>) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s?.trim()).ok()
}

/// Most recently updated snapshot in `collection`, compared client side.
/// Missing or unparseable timestamps rank below every parseable one; bodies
/// that are not a snapshot object at all are skipped.
pub fn load_latest(store: &dyn DocumentStore, collection: &str) -> Result<Option<Snapshot>, GatewayError> {
    let docs = store.list(collection)?;
    let total = docs.len();
    let mut best: Option<(Option<DateTime<FixedOffset>>, Snapshot)> = None;
    for doc in docs {
        let body: SnapshotBody = match serde_json::from_str(&doc.body) {
            Ok(b) => b,
            Err(e) => {
                warn!(collection, id = %doc.id, error = %e, "ignoring unreadable snapshot");
                continue;
            }
        };
        let ts = parse_timestamp(body.updated_at());
        if ts.is_none() {
            warn!(collection, id = %doc.id, "snapshot has no usable updatedAt");
        }
        let newer = match &best {
            None => true,
            Some((best_ts, _)) => ts > *best_ts,
        };
        if newer {
            best = Some((ts, Snapshot { id: doc.id, body }));
        }
    }
    debug!(collection, documents = total, found = best.is_some(), "loaded latest snapshot");
    Ok(best.map(|(_, s)| s))
}

pub fn create(store: &dyn DocumentStore, collection: &str, rows: Vec<StoredRecord>) -> Result<SavedSnapshot, GatewayError> {
    let updated_at = now_timestamp();
    let count = rows.len();
    let body = SnapshotBody::new(rows, &updated_at);
    let id = store.insert(collection, &serde_json::to_string(&body)?)?;
    info!(collection, id = %id, rows = count, "created snapshot");
    Ok(SavedSnapshot {
        id,
        updated_at,
        rows: count,
    })
}

pub fn update(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
    rows: Vec<StoredRecord>,
) -> Result<SavedSnapshot, GatewayError> {
    let updated_at = now_timestamp();
    let count = rows.len();
    let body = SnapshotBody::new(rows, &updated_at);
    if !store.replace(collection, id, &serde_json::to_string(&body)?)? {
        return Err(GatewayError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }
    info!(collection, id, rows = count, "updated snapshot");
    Ok(SavedSnapshot {
        id: id.to_string(),
        updated_at,
        rows: count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::ensure_schema(&conn).expect("schema");
        conn
    }

    fn body(updated_at: &str, marker: &str) -> String {
        json!({ "data": [{ "col0": "grade", "col1": 0, "col2": 1, "col3": marker }], "updatedAt": updated_at })
            .to_string()
    }

    #[test]
    fn empty_collection_has_no_latest() {
        let conn = conn();
        let store = SqliteDocumentStore::new(&conn);
        assert!(load_latest(&store, "attendance_elementary").expect("load").is_none());
    }

    #[test]
    fn latest_is_chosen_by_timestamp_not_insert_order() {
        let conn = conn();
        let store = SqliteDocumentStore::new(&conn);
        store.insert("c", &body("2025-02-02T10:00:00.000Z", "t2")).expect("insert");
        let t3 = store.insert("c", &body("2025-02-03T10:00:00+02:00", "t3")).expect("insert");
        store.insert("c", &body("2025-02-01T10:00:00.000Z", "t1")).expect("insert");
        store.insert("c", &body("not a date", "bad")).expect("insert");
        store.insert("c", "{ not json").expect("insert");
        store.insert("other", &body("2030-01-01T00:00:00Z", "other")).expect("insert");

        let latest = load_latest(&store, "c").expect("load").expect("some");
        assert_eq!(latest.id, t3);
        assert_eq!(latest.body.data[0]["col3"], json!("t3"));
    }

    #[test]
    fn create_then_update_in_place() {
        let conn = conn();
        let store = SqliteDocumentStore::new(&conn);
        let rec: StoredRecord = serde_json::from_value(json!({ "col0": "who", "col1": 1 })).expect("rec");
        let created = create(&store, "c", vec![rec.clone()]).expect("create");
        assert!(parse_timestamp(Some(&created.updated_at)).is_some());

        let updated = update(&store, "c", &created.id, vec![rec.clone(), rec]).expect("update");
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.rows, 2);

        let docs = store.list("c").expect("list");
        assert_eq!(docs.len(), 1);
        let latest = load_latest(&store, "c").expect("load").expect("some");
        assert_eq!(latest.body.data.len(), 2);
    }

    #[test]
    fn update_of_missing_snapshot_is_not_found() {
        let conn = conn();
        let store = SqliteDocumentStore::new(&conn);
        let err = update(&store, "c", "missing", Vec::new()).expect_err("should fail");
        assert!(matches!(err, GatewayError::NotFound { .. }));
        assert_eq!(err.code(), "not_found");
        assert!(store.list("c").expect("list").is_empty());
    }

    #[test]
    fn bad_record_in_newest_snapshot_does_not_hide_it() {
        let conn = conn();
        let store = SqliteDocumentStore::new(&conn);
        store.insert("c", &body("2025-01-01T00:00:00Z", "old")).expect("insert");
        let newest = store
            .insert(
                "c",
                &json!({
                    "data": [{ "col0": "grade", "col1": 0, "col2": 1, "col3": "new" }, null, 5],
                    "updatedAt": "2025-03-01T00:00:00Z"
                })
                .to_string(),
            )
            .expect("insert");

        let latest = load_latest(&store, "c").expect("load").expect("some");
        assert_eq!(latest.id, newest);
        assert_eq!(latest.body.data.len(), 3);
        assert_eq!(latest.body.updated_at(), Some("2025-03-01T00:00:00Z"));
    }

    #[test]
    fn missing_or_odd_timestamps_rank_lowest_but_still_load() {
        let conn = conn();
        let store = SqliteDocumentStore::new(&conn);
        let only = store
            .insert("c", &json!({ "data": [] }).to_string())
            .expect("insert");
        let latest = load_latest(&store, "c").expect("load").expect("some");
        assert_eq!(latest.id, only);
        assert_eq!(latest.body.updated_at(), None);

        store
            .insert("c", &json!({ "data": [], "updatedAt": 1700000000 }).to_string())
            .expect("insert");
        let dated = store.insert("c", &body("2024-06-07T00:00:00Z", "dated")).expect("insert");
        let latest = load_latest(&store, "c").expect("load").expect("some");
        assert_eq!(latest.id, dated);
    }
}
