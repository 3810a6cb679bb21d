use serde_json::json;

/// A failed request: a stable machine code, a human message and optional
/// structured details for the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(id: &str, e: HandlerErr) -> serde_json::Value {
    let mut error = json!({
        "code": e.code,
        "message": e.message,
    });
    if let Some(d) = e.details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_carries_details_only_when_present() {
        let plain = err("r1", HandlerErr::new("no_session", "open the stage first"));
        assert_eq!(
            plain,
            json!({
                "id": "r1",
                "ok": false,
                "error": { "code": "no_session", "message": "open the stage first" }
            })
        );

        let detailed = err(
            "r2",
            HandlerErr::bad_params("unknown stage").with_details(json!({ "stage": "college" })),
        );
        assert_eq!(detailed["error"]["code"], json!("bad_params"));
        assert_eq!(detailed["error"]["details"], json!({ "stage": "college" }));
    }

    #[test]
    fn ok_envelope_wraps_result() {
        assert_eq!(
            ok("r3", json!({ "rows": 2 })),
            json!({ "id": "r3", "ok": true, "result": { "rows": 2 } })
        );
    }
}
