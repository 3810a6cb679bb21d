//! Flat tuple encoding of an [`AttendanceStore`].
//!
//! Current format: `[tag, key.., id, name, bit_0, .., bit_n]` where `tag` is
//! `"grade"` (members) or `"who"` (servants) and the key has one or two
//! components depending on the stage layout.
//!
//! Legacy format: `[grade, id, name, bit_0, .., bit_n]`, always a members row.
//!
//! Each tuple is stored as an object `{col0, col1, ..}`.

use crate::model::{GroupKey, GroupLayout, Partition};
use crate::store::{AttendanceStore, StoreError};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub type Tuple = Vec<Value>;
pub type StoredRecord = Map<String, Value>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Anomaly {
    #[error("empty record")]
    Empty,
    #[error("field {0} is not a group index")]
    BadKey(usize),
    #[error("record is too short")]
    Truncated,
    #[error("missing name")]
    MissingName,
    #[error("group {0} does not exist in this stage")]
    UnknownGroup(GroupKey),
    #[error("record is a {0}, not an object")]
    NotARecord(&'static str),
    #[error("rejected by the grid: {0}")]
    Rejected(StoreError),
}

impl From<StoreError> for Anomaly {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownGroup(key) => Anomaly::UnknownGroup(key),
            other => Anomaly::Rejected(other),
        }
    }
}

/// One stored tuple after format detection.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredTuple {
    Tagged {
        partition: Partition,
        key: GroupKey,
        id: Option<u32>,
        name: String,
        bits: Vec<bool>,
    },
    Legacy {
        grade: u32,
        id: Option<u32>,
        name: String,
        bits: Vec<bool>,
    },
}

impl StoredTuple {
    pub fn parse(fields: &[Value], arity: usize) -> Result<StoredTuple, Anomaly> {
        let first = fields.first().ok_or(Anomaly::Empty)?;
        if let Some(partition) = first.as_str().and_then(Partition::from_tag) {
            let mut parts = Vec::with_capacity(arity);
            for pos in 1..=arity {
                let v = fields.get(pos).ok_or(Anomaly::Truncated)?;
                parts.push(as_index(v).ok_or(Anomaly::BadKey(pos))?);
            }
            let key = GroupKey::from_components(&parts).ok_or(Anomaly::BadKey(1))?;
            let (id, name, bits) = parse_body(&fields[1 + arity..])?;
            return Ok(StoredTuple::Tagged {
                partition,
                key,
                id,
                name,
                bits,
            });
        }
        let grade = as_index(first).ok_or(Anomaly::BadKey(0))?;
        let (id, name, bits) = parse_body(&fields[1..])?;
        Ok(StoredTuple::Legacy {
            grade,
            id,
            name,
            bits,
        })
    }

    fn placement(self, layout: &GroupLayout) -> (Partition, GroupKey, Option<u32>, String, Vec<bool>) {
        match self {
            StoredTuple::Tagged {
                partition,
                key,
                id,
                name,
                bits,
            } => (partition, key, id, name, bits),
            StoredTuple::Legacy {
                grade,
                id,
                name,
                bits,
            } => (Partition::Members, layout.legacy_key(grade), id, name, bits),
        }
    }
}

fn parse_body(rest: &[Value]) -> Result<(Option<u32>, String, Vec<bool>), Anomaly> {
    let id = rest.first().ok_or(Anomaly::Truncated)?;
    let name = rest.get(1).ok_or(Anomaly::MissingName)?;
    let name = match name {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    if name.is_empty() {
        return Err(Anomaly::MissingName);
    }
    let bits = rest.iter().skip(2).map(as_present).collect();
    Ok((as_index(id), name, bits))
}

fn as_index(v: &Value) -> Option<u32> {
    if let Some(n) = v.as_u64() {
        return u32::try_from(n).ok();
    }
    let f = v.as_f64()?;
    if f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 {
        return Some(f as u32);
    }
    None
}

fn as_present(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim(), "true" | "1"),
        _ => false,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DecodeReport {
    pub loaded: usize,
    pub legacy: usize,
    pub skipped: Vec<SkippedRecord>,
}

pub fn encode(store: &AttendanceStore) -> Vec<Tuple> {
    let mut out = Vec::with_capacity(store.row_count());
    for (partition, key, rows) in store.iter_groups() {
        for row in rows {
            let mut t: Tuple = Vec::with_capacity(4 + row.attendance.len());
            t.push(Value::from(partition.tag()));
            t.extend(key.components().into_iter().map(Value::from));
            t.push(Value::from(row.id));
            t.push(Value::from(row.name.as_str()));
            t.extend(row.attendance.iter().map(|b| Value::Bool(*b)));
            out.push(t);
        }
    }
    out
}

pub fn to_record(tuple: &[Value]) -> StoredRecord {
    tuple
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("col{i}"), v.clone()))
        .collect()
}

/// Rebuilds a tuple from a stored record, ordering `colN` keys numerically.
/// Keys of any other shape are ignored.
pub fn from_record(record: &StoredRecord) -> Tuple {
    let mut cols: Vec<(usize, &Value)> = record
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix("col")
                .and_then(|n| n.parse::<usize>().ok())
                .map(|n| (n, v))
        })
        .collect();
    cols.sort_by_key(|(n, _)| *n);
    cols.into_iter().map(|(_, v)| v.clone()).collect()
}

pub fn encode_records(store: &AttendanceStore) -> Vec<StoredRecord> {
    encode(store).iter().map(|t| to_record(t)).collect()
}

/// Rebuilds a store for `layout` on the `dates` axis. Tuples that cannot be
/// placed are skipped and reported; they never abort the decode.
pub fn decode(tuples: &[Tuple], layout: &GroupLayout, dates: Vec<NaiveDate>) -> (AttendanceStore, DecodeReport) {
    decode_fields(tuples.iter().cloned().map(Ok), layout, dates)
}

/// Like [`decode`], for the elements of a stored `data` array. Objects are
/// read as `colN` records and bare arrays as tuples; anything else is
/// reported as skipped at its index.
pub fn decode_records(records: &[Value], layout: &GroupLayout, dates: Vec<NaiveDate>) -> (AttendanceStore, DecodeReport) {
    let fields = records.iter().map(|v| match v {
        Value::Object(record) => Ok(from_record(record)),
        Value::Array(tuple) => Ok(tuple.clone()),
        other => Err(Anomaly::NotARecord(json_kind(other))),
    });
    decode_fields(fields, layout, dates)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn decode_fields<I>(items: I, layout: &GroupLayout, dates: Vec<NaiveDate>) -> (AttendanceStore, DecodeReport)
where
    I: IntoIterator<Item = Result<Tuple, Anomaly>>,
{
    let mut store = AttendanceStore::new(layout.clone(), dates);
    let mut report = DecodeReport::default();
    for (index, item) in items.into_iter().enumerate() {
        let placed = item.and_then(|fields| {
            let parsed = StoredTuple::parse(&fields, layout.arity())?;
            let legacy = matches!(parsed, StoredTuple::Legacy { .. });
            let (partition, key, id, name, bits) = parsed.placement(layout);
            if !layout.contains(&key) {
                return Err(Anomaly::UnknownGroup(key));
            }
            store.restore_row(partition, key, id, name, bits)?;
            Ok(legacy)
        });
        match placed {
            Ok(legacy) => {
                report.loaded += 1;
                if legacy {
                    report.legacy += 1;
                }
            }
            Err(anomaly) => {
                warn!(index, reason = %anomaly, "skipping stored attendance record");
                report.skipped.push(SkippedRecord {
                    index,
                    reason: anomaly.to_string(),
                });
            }
        }
    }
    debug!(
        loaded = report.loaded,
        legacy = report.legacy,
        skipped = report.skipped.len(),
        "decoded attendance records"
    );
    (store, report)
}
