//! Claim ledger parsing
//!
//! The claim document records results under `claim.results`, keyed by test
//! identifier. An entry is either a single result object or a list of them,
//! each carrying a `state` string.

use serde_json::Value;

use crate::common::{Error, Result};

use super::{truncate_excerpt, Outcome};

const LEDGER: &str = "claim";

/// The matching claim result and the raw JSON it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimEntry {
    pub outcome: Outcome,
    pub excerpt: String,
}

fn parse_state(result: &Value, excerpt: &str) -> Result<Outcome> {
    let state = result
        .get("state")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::report_parse(LEDGER, "result has no 'state' field", excerpt))?;
    match state.to_ascii_lowercase().as_str() {
        "passed" | "pass" => Ok(Outcome::Passed),
        "failed" | "fail" | "error" => Ok(Outcome::Failed),
        "skipped" | "skip" => Ok(Outcome::Skipped),
        other => Err(Error::report_parse(
            LEDGER,
            format!("invalid value '{}' for result state", other),
            excerpt,
        )),
    }
}

/// Find the result for `test_id` in a claim document
///
/// Returns `Ok(None)` when the document is well-formed but holds no result
/// for the test.
pub fn find_result(json: &str, test_id: &str) -> Result<Option<ClaimEntry>> {
    let document: Value = serde_json::from_str(json).map_err(|e| {
        Error::report_parse(LEDGER, e.to_string(), truncate_excerpt(json))
    })?;

    let results = document
        .pointer("/claim/results")
        .ok_or_else(|| {
            Error::report_parse(LEDGER, "missing 'claim.results'", truncate_excerpt(json))
        })?;
    let results = results.as_object().ok_or_else(|| {
        Error::report_parse(
            LEDGER,
            "'claim.results' is not an object",
            truncate_excerpt(&results.to_string()),
        )
    })?;

    let Some(entry) = results.get(test_id) else {
        return Ok(None);
    };
    let excerpt = truncate_excerpt(&serde_json::to_string_pretty(entry)?);

    let outcome = match entry {
        Value::Object(_) => parse_state(entry, &excerpt)?,
        Value::Array(items) => {
            let mut outcome: Option<Outcome> = None;
            for item in items {
                let next = parse_state(item, &excerpt)?;
                match outcome {
                    Some(prev) if prev != next => {
                        return Err(Error::report_parse(
                            LEDGER,
                            format!(
                                "results for '{}' disagree ({} and {})",
                                test_id, prev, next
                            ),
                            excerpt,
                        ));
                    }
                    _ => outcome = Some(next),
                }
            }
            match outcome {
                Some(outcome) => outcome,
                None => return Ok(None),
            }
        }
        _ => {
            return Err(Error::report_parse(
                LEDGER,
                format!("result for '{}' is neither an object nor a list", test_id),
                excerpt,
            ))
        }
    };

    Ok(Some(ClaimEntry { outcome, excerpt }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLAIM: &str = r#"{
        "claim": {
            "metadata": {"startTime": "2024-01-01T00:00:00Z"},
            "results": {
                "rt-isolated-cpu": {"state": "passed", "testID": {"id": "rt-isolated-cpu", "suite": "performance"}},
                "automount-token": {"state": "failed", "failureReason": "pod uses default SA"},
                "shared-pool": [{"state": "skipped"}, {"state": "skipped"}],
                "mixed": [{"state": "passed"}, {"state": "failed"}],
                "weird": {"state": "flaky"}
            }
        }
    }"#;

    #[test]
    fn test_object_and_list_entries() {
        assert_eq!(
            find_result(CLAIM, "rt-isolated-cpu").unwrap().unwrap().outcome,
            Outcome::Passed
        );
        let failed = find_result(CLAIM, "automount-token").unwrap().unwrap();
        assert_eq!(failed.outcome, Outcome::Failed);
        assert!(failed.excerpt.contains("pod uses default SA"));
        assert_eq!(
            find_result(CLAIM, "shared-pool").unwrap().unwrap().outcome,
            Outcome::Skipped
        );
    }

    #[test]
    fn test_absent_entry_is_none() {
        assert_eq!(find_result(CLAIM, "unknown").unwrap(), None);
        let empty_list = r#"{"claim": {"results": {"t": []}}}"#;
        assert_eq!(find_result(empty_list, "t").unwrap(), None);
    }

    #[test]
    fn test_disagreeing_list_rejected() {
        assert!(matches!(
            find_result(CLAIM, "mixed"),
            Err(Error::ReportParse { .. })
        ));
    }

    #[test]
    fn test_unknown_state_rejected() {
        let err = find_result(CLAIM, "weird").unwrap_err();
        assert!(err.to_string().contains("invalid value 'flaky'"));
    }

    #[test]
    fn test_structurally_broken_documents_rejected() {
        assert!(find_result("{", "t").is_err());
        assert!(find_result(r#"{"claim": {}}"#, "t").is_err());
        assert!(find_result(r#"{"claim": {"results": []}}"#, "t").is_err());
        assert!(find_result(r#"{"claim": {"results": {"t": "passed"}}}"#, "t").is_err());
        assert!(find_result(r#"{"claim": {"results": {"t": {"status": "passed"}}}}"#, "t").is_err());
    }
}
