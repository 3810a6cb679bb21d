use crate::dates;
use crate::gateway::{GatewayError, SqliteDocumentStore};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{GroupKey, Partition};
use crate::session::AttendanceSession;
use crate::stage::Stage;
use crate::store::StoreError;
use serde_json::json;
use tracing::{info, warn};

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        let code = match e {
            StoreError::EmptyName | StoreError::IdsExhausted(_) => "validation_failed",
            StoreError::UnknownRow { .. } => "not_found",
            StoreError::UnknownGroup(_) | StoreError::ColumnOutOfRange { .. } => "bad_params",
        };
        HandlerErr::new(code, e.to_string())
    }
}

fn get_required_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn get_required_u32(params: &serde_json::Value, key: &str) -> Result<u32, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn parse_stage(params: &serde_json::Value) -> Result<Stage, HandlerErr> {
    let raw = get_required_str(params, "stage")?;
    Stage::parse(raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: "stage must be one of: elementary, preparatory, secondary".to_string(),
        details: Some(json!({ "stage": raw })),
    })
}

/// `month` is optional `YYYY-MM`; the current month is used when absent.
fn parse_month(params: &serde_json::Value) -> Result<(i32, u32), HandlerErr> {
    match params.get("month") {
        None | Some(serde_json::Value::Null) => Ok(dates::current_month()),
        Some(v) => v
            .as_str()
            .and_then(dates::parse_month_key)
            .ok_or_else(|| HandlerErr::bad_params("month must be YYYY-MM")),
    }
}

fn parse_partition(params: &serde_json::Value) -> Result<Partition, HandlerErr> {
    let raw = get_required_str(params, "partition")?;
    Partition::from_name(raw)
        .ok_or_else(|| HandlerErr::bad_params("partition must be members or servants"))
}

fn parse_key(params: &serde_json::Value, arity: usize) -> Result<GroupKey, HandlerErr> {
    let Some(arr) = params.get("key").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing key"));
    };
    let parts = arr
        .iter()
        .map(|v| v.as_u64().and_then(|n| u32::try_from(n).ok()))
        .collect::<Option<Vec<u32>>>()
        .ok_or_else(|| HandlerErr::bad_params("key must be an array of non-negative integers"))?;
    if parts.len() != arity {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("key must have {} component(s)", arity),
            details: Some(json!({ "key": parts })),
        });
    }
    GroupKey::from_components(&parts).ok_or_else(|| HandlerErr::bad_params("invalid key"))
}

fn session_mut<'a>(
    state: &'a mut AppState,
    stage: Stage,
) -> Result<&'a mut AttendanceSession, HandlerErr> {
    state.sessions.get_mut(&stage).ok_or_else(|| HandlerErr {
        code: "no_session",
        message: "open the stage first".to_string(),
        details: Some(json!({ "stage": stage.name() })),
    })
}

/// Session, partition and key for a grid mutation.
fn target<'a>(
    state: &'a mut AppState,
    params: &serde_json::Value,
) -> Result<(&'a mut AttendanceSession, Partition, GroupKey), HandlerErr> {
    let stage = parse_stage(params)?;
    let partition = parse_partition(params)?;
    let key = parse_key(params, stage.layout().arity())?;
    Ok((session_mut(state, stage)?, partition, key))
}

fn session_view(session: &AttendanceSession) -> serde_json::Value {
    let store = &session.store;
    let layout = store.layout();
    let groups: Vec<serde_json::Value> = store
        .iter_groups()
        .map(|(partition, key, rows)| {
            let rows_json: Vec<serde_json::Value> = rows
                .iter()
                .map(|r| {
                    json!({
                        "id": r.id,
                        "name": r.name,
                        "attendance": r.attendance,
                        "selected": store.is_selected(partition, key, r.id),
                    })
                })
                .collect();
            json!({
                "partition": partition.name(),
                "key": key.components(),
                "label": layout.label(&key),
                "rows": rows_json,
                "presentByDate": store.present_by_date(partition, key).unwrap_or_default(),
            })
        })
        .collect();
    let dates: Vec<String> = store.dates().iter().map(|d| d.to_string()).collect();
    json!({
        "stage": session.stage.name(),
        "collection": session.stage.collection(),
        "month": dates::month_key(session.year, session.month0),
        "snapshotId": session.snapshot_id,
        "updatedAt": session.updated_at,
        "dates": dates,
        "groups": groups,
        "legacyRows": session.report.legacy,
        "skipped": session.report.skipped,
    })
}

fn attendance_dates(params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (year, month0) = parse_month(params)?;
    let dates: Vec<String> = dates::fridays_in_month(year, month0)
        .iter()
        .map(|d| d.to_string())
        .collect();
    Ok(json!({
        "month": dates::month_key(year, month0),
        "dates": dates
    }))
}

fn attendance_open(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let stage = parse_stage(params)?;
    let (year, month0) = parse_month(params)?;
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr {
            code: "no_workspace",
            message: "select a workspace first".to_string(),
            details: None,
        });
    };
    let docs = SqliteDocumentStore::new(conn);
    let session = AttendanceSession::open(&docs, stage, year, month0).map_err(|e| {
        warn!(stage = stage.name(), error = %e, "attendance load failed");
        HandlerErr {
            code: "load_failed",
            message: e.to_string(),
            details: Some(json!({ "stage": stage.name(), "reason": e.code() })),
        }
    })?;
    let view = session_view(&session);
    state.sessions.insert(stage, session);
    Ok(view)
}

fn attendance_view(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let stage = parse_stage(params)?;
    Ok(session_view(session_mut(state, stage)?))
}

fn attendance_add_row(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let (session, partition, key) = target(state, params)?;
    let id = session.store.add_row(partition, key, name)?;
    Ok(json!({ "id": id }))
}

fn attendance_bulk_import(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let text = get_required_str(params, "text")?;
    let (session, partition, key) = target(state, params)?;
    let ids = session.store.bulk_import(partition, key, text)?;
    info!(
        stage = session.stage.name(),
        partition = partition.name(),
        key = %key,
        added = ids.len(),
        "bulk import"
    );
    Ok(json!({ "added": ids.len(), "ids": ids }))
}

fn attendance_toggle(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let row_id = get_required_u32(params, "rowId")?;
    let col = get_required_u32(params, "col")? as usize;
    let (session, partition, key) = target(state, params)?;
    let present = session.store.toggle(partition, key, row_id, col)?;
    Ok(json!({ "present": present }))
}

fn attendance_select(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let row_id = get_required_u32(params, "rowId")?;
    let on = params
        .get("selected")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params("missing selected"))?;
    let (session, partition, key) = target(state, params)?;
    session.store.set_selected(partition, key, row_id, on)?;
    Ok(json!({ "selected": session.store.selected(partition, key) }))
}

fn attendance_select_all(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (session, partition, key) = target(state, params)?;
    session.store.select_all(partition, key)?;
    Ok(json!({ "selected": session.store.selected(partition, key) }))
}

fn attendance_clear_selection(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (session, partition, key) = target(state, params)?;
    session.store.clear_selection(partition, key)?;
    Ok(json!({ "selected": session.store.selected(partition, key) }))
}

fn attendance_delete_row(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let row_id = get_required_u32(params, "rowId")?;
    let (session, partition, key) = target(state, params)?;
    session.store.delete_row(partition, key, row_id)?;
    Ok(json!({ "deleted": 1 }))
}

fn attendance_delete_selected(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (session, partition, key) = target(state, params)?;
    let deleted = session.store.delete_selected(partition, key)?;
    Ok(json!({ "deleted": deleted }))
}

fn attendance_delete_all(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (session, partition, key) = target(state, params)?;
    let deleted = session.store.delete_all(partition, key)?;
    Ok(json!({ "deleted": deleted }))
}

fn attendance_save(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let stage = parse_stage(params)?;
    let AppState { db, sessions, .. } = state;
    let Some(conn) = db.as_ref() else {
        return Err(HandlerErr {
            code: "no_workspace",
            message: "select a workspace first".to_string(),
            details: None,
        });
    };
    let session = sessions.get_mut(&stage).ok_or_else(|| HandlerErr {
        code: "no_session",
        message: "open the stage first".to_string(),
        details: Some(json!({ "stage": stage.name() })),
    })?;
    let docs = SqliteDocumentStore::new(conn);
    let outcome = session.save(&docs).map_err(|e| {
        warn!(stage = stage.name(), error = %e, "attendance save failed");
        HandlerErr {
            code: match e {
                GatewayError::NotFound { .. } => "not_found",
                _ => "save_failed",
            },
            message: e.to_string(),
            details: Some(json!({ "stage": stage.name(), "reason": e.code() })),
        }
    })?;
    Ok(json!({
        "snapshotId": outcome.snapshot_id,
        "created": outcome.created,
        "updatedAt": outcome.updated_at,
        "rows": outcome.rows
    }))
}

fn respond(req: &Request, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => err(&req.id, error),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "attendance.dates" => attendance_dates(p),
        "attendance.open" => attendance_open(state, p),
        "attendance.view" => attendance_view(state, p),
        "attendance.addRow" => attendance_add_row(state, p),
        "attendance.bulkImport" => attendance_bulk_import(state, p),
        "attendance.toggle" => attendance_toggle(state, p),
        "attendance.select" => attendance_select(state, p),
        "attendance.selectAll" => attendance_select_all(state, p),
        "attendance.clearSelection" => attendance_clear_selection(state, p),
        "attendance.deleteRow" => attendance_delete_row(state, p),
        "attendance.deleteSelected" => attendance_delete_selected(state, p),
        "attendance.deleteAll" => attendance_delete_all(state, p),
        "attendance.save" => attendance_save(state, p),
        _ => return None,
    };
    Some(respond(req, result))
}
