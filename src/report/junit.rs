//! JUnit-style ledger parsing
//!
//! Only the `<testcase>` elements matter. A case is skipped if it contains
//! `<skipped>`, failed if it contains `<failure>` or `<error>`, and passed
//! otherwise. A `status` attribute, when present, must agree with those
//! child elements and decides the outcome of a case that has none.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::common::{Error, Result};

use super::{excerpt_around, Outcome};

const LEDGER: &str = "junit";

/// The matching test case and the raw XML it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunitEntry {
    pub outcome: Outcome,
    pub excerpt: String,
}

/// State of the test case currently being read
struct OpenCase {
    start: usize,
    depth: usize,
    status: Option<Outcome>,
    skipped: bool,
    failed: bool,
}

impl OpenCase {
    fn new(start: usize, depth: usize, status: Option<Outcome>) -> Self {
        Self {
            start,
            depth,
            status,
            skipped: false,
            failed: false,
        }
    }

    fn mark(&mut self, child: &[u8]) {
        match child {
            b"skipped" => self.skipped = true,
            b"failure" | b"error" => self.failed = true,
            _ => {}
        }
    }

    /// Outcome from the child elements, checked against the `status` attribute
    fn outcome(&self, test_case: &str, excerpt: &str) -> Result<Outcome> {
        let from_children = if self.skipped {
            Some(Outcome::Skipped)
        } else if self.failed {
            Some(Outcome::Failed)
        } else {
            None
        };
        match (self.status, from_children) {
            (Some(status), Some(found)) if status != found => Err(Error::report_parse(
                LEDGER,
                format!(
                    "test case '{}' has status {} but its elements report {}",
                    test_case, status, found
                ),
                excerpt,
            )),
            (_, Some(found)) => Ok(found),
            (Some(status), None) => Ok(status),
            (None, None) => Ok(Outcome::Passed),
        }
    }
}

fn attribute(element: &BytesStart<'_>, key: &str, xml: &str, pos: usize) -> Result<Option<String>> {
    let attr = element
        .try_get_attribute(key)
        .map_err(|e| Error::report_parse(LEDGER, e.to_string(), excerpt_around(xml, pos)))?;
    match attr {
        Some(attr) => {
            let value = attr
                .unescape_value()
                .map_err(|e| Error::report_parse(LEDGER, e.to_string(), excerpt_around(xml, pos)))?;
            Ok(Some(value.trim().to_string()))
        }
        None => Ok(None),
    }
}

fn parse_status(value: &str, xml: &str, pos: usize) -> Result<Outcome> {
    match value.to_ascii_lowercase().as_str() {
        "passed" | "pass" | "success" => Ok(Outcome::Passed),
        "failed" | "fail" | "failure" | "error" => Ok(Outcome::Failed),
        "skipped" | "skip" => Ok(Outcome::Skipped),
        other => Err(Error::report_parse(
            LEDGER,
            format!("invalid value '{}' for test case status", other),
            excerpt_around(xml, pos),
        )),
    }
}

/// Open `element` if it is the test case being looked for
fn open_case(
    element: &BytesStart<'_>,
    test_case: &str,
    xml: &str,
    pos: usize,
    depth: usize,
) -> Result<Option<OpenCase>> {
    if element.local_name().as_ref() != b"testcase"
        || attribute(element, "name", xml, pos)?.as_deref() != Some(test_case)
    {
        return Ok(None);
    }
    let status = attribute(element, "status", xml, pos)?
        .map(|value| parse_status(&value, xml, pos))
        .transpose()?;
    Ok(Some(OpenCase::new(pos, depth, status)))
}

/// Merge a newly found case with any earlier case of the same name
fn record(found: &mut Option<JunitEntry>, entry: JunitEntry, test_case: &str) -> Result<()> {
    match found {
        None => {
            *found = Some(entry);
            Ok(())
        }
        Some(previous) if previous.outcome == entry.outcome => Ok(()),
        Some(previous) => Err(Error::report_parse(
            LEDGER,
            format!(
                "test case '{}' reported twice with different outcomes ({} and {})",
                test_case, previous.outcome, entry.outcome
            ),
            format!("{}\n{}", previous.excerpt, entry.excerpt),
        )),
    }
}

/// Find the outcome of `test_case` in a JUnit XML document
///
/// Returns `Ok(None)` if the document is well-formed but has no such case.
pub fn find_test_case(xml: &str, test_case: &str) -> Result<Option<JunitEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut found: Option<JunitEntry> = None;
    let mut open: Option<OpenCase> = None;
    let mut depth: usize = 0;
    let mut seen_element = false;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| Error::report_parse(LEDGER, e.to_string(), excerpt_around(xml, before)))?;

        match event {
            Event::Start(e) => {
                seen_element = true;
                depth += 1;
                if let Some(case) = open.as_mut() {
                    case.mark(e.local_name().as_ref());
                } else {
                    open = open_case(&e, test_case, xml, before, depth)?;
                }
            }
            Event::Empty(e) => {
                seen_element = true;
                if let Some(case) = open.as_mut() {
                    case.mark(e.local_name().as_ref());
                } else if let Some(case) = open_case(&e, test_case, xml, before, depth + 1)? {
                    let end = reader.buffer_position() as usize;
                    let excerpt = xml[before..end].trim().to_string();
                    let outcome = case.outcome(test_case, &excerpt)?;
                    record(&mut found, JunitEntry { outcome, excerpt }, test_case)?;
                }
            }
            Event::End(_) => {
                if open.as_ref().is_some_and(|case| case.depth == depth) {
                    if let Some(case) = open.take() {
                        let end = reader.buffer_position() as usize;
                        let excerpt = xml[case.start..end].trim().to_string();
                        let outcome = case.outcome(test_case, &excerpt)?;
                        record(&mut found, JunitEntry { outcome, excerpt }, test_case)?;
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_element {
        return Err(Error::report_parse(
            LEDGER,
            "document contains no XML elements",
            excerpt_around(xml, 0),
        ));
    }
    if depth != 0 {
        return Err(Error::report_parse(
            LEDGER,
            "document ends inside an open element",
            excerpt_around(xml, xml.len()),
        ));
    }

    Ok(found)
}
