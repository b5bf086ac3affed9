//! Verdict reduction from run ledgers
//!
//! A verification run leaves two independent ledgers: a JUnit-style XML
//! report and a claim JSON document. Both are looked up for the test plan,
//! cross-checked, and reduced to a single `Verdict`. Ledgers are only ever
//! read; they stay on disk as evidence after the run.

mod claim;
mod junit;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

pub use claim::{find_result, ClaimEntry};
pub use junit::{find_test_case, JunitEntry};

/// Longest ledger excerpt carried in errors
const MAX_EXCERPT_CHARS: usize = 2000;

/// Outcome of a single ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Verdict::from(*self).as_str())
    }
}

/// Reduced classification of a test plan's run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Verdict {
    Passed,
    Failed,
    Skipped,
    /// The run produced no evidence for the test plan
    Error,
}

impl Verdict {
    pub const ALL: [Verdict; 4] = [
        Verdict::Passed,
        Verdict::Failed,
        Verdict::Skipped,
        Verdict::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Passed => "passed",
            Verdict::Failed => "failed",
            Verdict::Skipped => "skipped",
            Verdict::Error => "error",
        }
    }
}

impl From<Outcome> for Verdict {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Passed => Verdict::Passed,
            Outcome::Failed => Verdict::Failed,
            Outcome::Skipped => Verdict::Skipped,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passed" | "pass" => Ok(Verdict::Passed),
            "failed" | "fail" => Ok(Verdict::Failed),
            "skipped" | "skip" => Ok(Verdict::Skipped),
            "error" => Ok(Verdict::Error),
            _ => Err(Error::invalid_value("verdict", s)),
        }
    }
}

impl TryFrom<String> for Verdict {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Verdict> for String {
    fn from(v: Verdict) -> Self {
        v.as_str().to_string()
    }
}

/// Ledger files a run left behind; either may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArtifacts {
    pub junit_ledger: Option<PathBuf>,
    pub claim_ledger: Option<PathBuf>,
}

impl RunArtifacts {
    /// Collect whichever ledgers exist in `dir`
    pub fn locate(dir: &Path, junit_file: &str, claim_file: &str) -> Self {
        let existing = |name: &str| {
            let path = dir.join(name);
            path.is_file().then_some(path)
        };
        Self {
            junit_ledger: existing(junit_file),
            claim_ledger: existing(claim_file),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.junit_ledger.is_none() && self.claim_ledger.is_none()
    }
}

/// Verdict together with the ledger text it was derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub excerpt: String,
}

fn read_ledger(path: Option<&Path>, ledger: &str) -> Result<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::FileRead {
                path: path.display().to_string(),
                error: e.to_string(),
            })
        }
    };
    String::from_utf8(bytes).map(Some).map_err(|e| {
        Error::report_parse(
            ledger,
            format!("{} is not valid UTF-8: {}", path.display(), e),
            String::new(),
        )
    })
}

/// Reduces run ledgers to a verdict and checks it against an expectation
pub struct ReportEvaluator;

impl ReportEvaluator {
    /// Read the artifacts from disk and reduce them for `test_plan`
    pub fn evaluate(artifacts: &RunArtifacts, test_plan: &str) -> Result<Evaluation> {
        let junit = read_ledger(artifacts.junit_ledger.as_deref(), "junit")?;
        let claim = read_ledger(artifacts.claim_ledger.as_deref(), "claim")?;
        Self::evaluate_ledgers(junit.as_deref(), claim.as_deref(), test_plan)
    }

    /// Reduce ledger contents for `test_plan`
    ///
    /// A ledger that is present must parse. When both ledgers mention the
    /// test plan they must agree; otherwise whichever one does decides.
    /// No mention anywhere reduces to `Verdict::Error`.
    pub fn evaluate_ledgers(
        junit: Option<&str>,
        claim: Option<&str>,
        test_plan: &str,
    ) -> Result<Evaluation> {
        let junit_entry = junit
            .map(|xml| find_test_case(xml, test_plan))
            .transpose()?
            .flatten();
        let claim_entry = claim
            .map(|json| find_result(json, test_plan))
            .transpose()?
            .flatten();

        let evaluation = match (junit_entry, claim_entry) {
            (Some(j), Some(c)) if j.outcome != c.outcome => {
                return Err(Error::report_parse(
                    "junit/claim",
                    format!(
                        "ledgers disagree on '{}': junit says {}, claim says {}",
                        test_plan, j.outcome, c.outcome
                    ),
                    format!("{}\n{}", j.excerpt, c.excerpt),
                ));
            }
            (Some(j), Some(c)) => Evaluation {
                verdict: j.outcome.into(),
                excerpt: format!("{}\n{}", j.excerpt, c.excerpt),
            },
            (Some(j), None) => Evaluation {
                verdict: j.outcome.into(),
                excerpt: j.excerpt,
            },
            (None, Some(c)) => Evaluation {
                verdict: c.outcome.into(),
                excerpt: c.excerpt,
            },
            (None, None) => Evaluation {
                verdict: Verdict::Error,
                excerpt: format!(
                    "no ledger entry for '{}' (junit {}, claim {})",
                    test_plan,
                    if junit.is_some() { "present" } else { "absent" },
                    if claim.is_some() { "present" } else { "absent" },
                ),
            },
        };

        tracing::debug!(test_plan, verdict = %evaluation.verdict, "ledgers evaluated");
        Ok(evaluation)
    }
}

/// Check an evaluated verdict against the expected one
pub fn validate(expected: Verdict, actual: Verdict, excerpt: &str) -> Result<()> {
    if expected == actual {
        return Ok(());
    }
    Err(Error::AssertionMismatch {
        expected,
        actual,
        excerpt: truncate_excerpt(excerpt),
    })
}

/// Cap an excerpt at a readable length
pub(crate) fn truncate_excerpt(text: &str) -> String {
    match text.char_indices().nth(MAX_EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// A window of `text` around byte offset `pos`
pub(crate) fn excerpt_around(text: &str, pos: usize) -> String {
    let pos = pos.min(text.len());
    let mut start = pos.saturating_sub(200);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (pos + 200).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].to_string()
}
