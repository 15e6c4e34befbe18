//! JSON parsing helpers with consistent warning logs.

use serde::de::DeserializeOwned;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub enum JsonContext<'a> {
    StepField {
        job_ref: &'a str,
        step_name: &'a str,
        field: &'static str,
    },
}

fn warn_parse_error(
    raw_len: usize,
    error: serde_json::Error,
    ctx: JsonContext<'_>,
    msg: &'static str,
) {
    match ctx {
        JsonContext::StepField {
            job_ref,
            step_name,
            field,
        } => {
            warn!(
                video_id = %job_ref,
                step = %step_name,
                field,
                raw_len,
                error = %error,
                "{msg}"
            );
        }
    }
}

pub fn parse_optional<T: DeserializeOwned>(
    raw: Option<&str>,
    ctx: JsonContext<'_>,
    msg: &'static str,
) -> Option<T> {
    let raw = raw?;
    match serde_json::from_str(raw) {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            warn_parse_error(raw.len(), error, ctx, msg);
            None
        }
    }
}

pub fn parse_optional_or_default<T: DeserializeOwned + Default>(
    raw: Option<&str>,
    ctx: JsonContext<'_>,
    msg: &'static str,
) -> T {
    parse_optional(raw, ctx, msg).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    const CTX: JsonContext<'static> = JsonContext::StepField {
        job_ref: "vid-1",
        step_name: "fetch-media",
        field: "result",
    };

    #[test]
    fn test_parse_optional() {
        let parsed: Option<Map<String, Value>> =
            parse_optional(Some(r#"{"video_path":"/v.mp4"}"#), CTX, "bad result");
        assert_eq!(
            parsed.unwrap().get("video_path"),
            Some(&Value::from("/v.mp4"))
        );

        let missing: Option<Map<String, Value>> = parse_optional(None, CTX, "bad result");
        assert!(missing.is_none());
    }

    #[test]
    fn test_malformed_falls_back_to_default() {
        let parsed: Map<String, Value> =
            parse_optional_or_default(Some("{not json"), CTX, "bad result");
        assert!(parsed.is_empty());

        // Valid JSON of the wrong shape also falls back.
        let parsed: Map<String, Value> = parse_optional_or_default(Some("[1,2]"), CTX, "bad result");
        assert!(parsed.is_empty());
    }
}
