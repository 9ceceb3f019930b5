//! Grading of raw test-runner output.
use crate::datapoint::TaskRecord;
use crate::harness::{InstanceReport, TestGroupReport, INSTANCE_REPORT_SCHEMA_VERSION};
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;

/// Observed status of one test case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

/// Scan pytest-style result lines (`PASSED <id>`, `FAILED <id> - msg`, …)
/// into a per-test status map. Later lines win on duplicates, matching the
/// runner's final summary section.
pub fn parse_test_statuses(output: &str) -> Result<BTreeMap<String, TestStatus>> {
    let line_pattern = Regex::new(r"^(PASSED|FAILED|ERROR|XFAIL|SKIPPED)\s+(\S+)")
        .context("compile test status pattern")?;

    let mut statuses = BTreeMap::new();
    for line in output.lines() {
        let Some(captures) = line_pattern.captures(line.trim()) else {
            continue;
        };
        let status = match &captures[1] {
            "PASSED" => TestStatus::Passed,
            "FAILED" | "XFAIL" => TestStatus::Failed,
            "ERROR" => TestStatus::Error,
            _ => TestStatus::Skipped,
        };
        statuses.insert(captures[2].to_string(), status);
    }
    Ok(statuses)
}

/// Grade one task: resolved iff every FAIL_TO_PASS id and every PASS_TO_PASS
/// id graded as passed. An id absent from the output is not passed.
pub fn grade_instance(
    record: &TaskRecord,
    model_name: &str,
    statuses: &BTreeMap<String, TestStatus>,
    patch_applied: bool,
    timed_out: bool,
) -> InstanceReport {
    let fail_to_pass = split_group(&record.fail_to_pass, statuses);
    let pass_to_pass = split_group(&record.pass_to_pass, statuses);
    let resolved = patch_applied
        && !timed_out
        && fail_to_pass.not_passed.is_empty()
        && pass_to_pass.not_passed.is_empty();

    InstanceReport {
        schema_version: INSTANCE_REPORT_SCHEMA_VERSION,
        instance_id: record.instance_id.clone(),
        model_name: model_name.to_string(),
        patch_applied,
        timed_out,
        resolved,
        fail_to_pass,
        pass_to_pass,
    }
}

fn split_group(
    expected: &[String],
    statuses: &BTreeMap<String, TestStatus>,
) -> TestGroupReport {
    let mut group = TestGroupReport::default();
    for test_id in expected {
        if statuses.get(test_id) == Some(&TestStatus::Passed) {
            group.passed.push(test_id.clone());
        } else {
            group.not_passed.push(test_id.clone());
        }
    }
    group
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoint::parse_datapoint;

    fn record(fail_to_pass: &[&str], pass_to_pass: &[&str]) -> TaskRecord {
        parse_datapoint(
            &serde_json::json!({
                "instance_id": "repo__task-1",
                "repo": "org/repo",
                "base_commit": "abc",
                "problem_statement": "desc",
                "patch": "diff",
                "test_patch": "test diff",
                "environment_setup_commit": "def",
                "FAIL_TO_PASS": fail_to_pass,
                "PASS_TO_PASS": pass_to_pass,
            })
            .to_string(),
        )
        .expect("parse")
    }

    #[test]
    fn parses_summary_lines_and_ignores_noise() {
        let output = "\
============ test session starts ============
collected 3 items

tests/test_a.py::test_roundtrip .                    [ 33%]
PASSED tests/test_a.py::test_roundtrip
FAILED tests/test_a.py::test_identity - AssertionError: boom
ERROR tests/test_b.py::test_setup - ImportError
";
        let statuses = parse_test_statuses(output).expect("parse");
        assert_eq!(
            statuses.get("tests/test_a.py::test_roundtrip"),
            Some(&TestStatus::Passed)
        );
        assert_eq!(
            statuses.get("tests/test_a.py::test_identity"),
            Some(&TestStatus::Failed)
        );
        assert_eq!(
            statuses.get("tests/test_b.py::test_setup"),
            Some(&TestStatus::Error)
        );
        assert_eq!(statuses.len(), 3);
    }

    #[test]
    fn later_duplicate_lines_win() {
        let output = "FAILED t::a - flaked\nPASSED t::a\n";
        let statuses = parse_test_statuses(output).expect("parse");
        assert_eq!(statuses.get("t::a"), Some(&TestStatus::Passed));
    }

    #[test]
    fn resolved_when_both_groups_pass() {
        let record = record(&["t::f2p"], &["t::p2p"]);
        let statuses = parse_test_statuses("PASSED t::f2p\nPASSED t::p2p\n").expect("parse");
        let report = grade_instance(&record, "candidate", &statuses, true, false);
        assert!(report.resolved);
        assert_eq!(report.fail_to_pass.passed, vec!["t::f2p"]);
    }

    #[test]
    fn regression_in_pass_to_pass_blocks_resolution() {
        let record = record(&["t::f2p"], &["t::p2p"]);
        let statuses = parse_test_statuses("PASSED t::f2p\nFAILED t::p2p - boom\n").expect("parse");
        let report = grade_instance(&record, "candidate", &statuses, true, false);
        assert!(!report.resolved);
        assert_eq!(report.pass_to_pass.not_passed, vec!["t::p2p"]);
    }

    #[test]
    fn absent_tests_are_not_passed() {
        let record = record(&["t::f2p"], &[]);
        let statuses = BTreeMap::new();
        let report = grade_instance(&record, "candidate", &statuses, true, false);
        assert!(!report.resolved);
        assert_eq!(report.fail_to_pass.not_passed, vec!["t::f2p"]);
    }

    #[test]
    fn timeout_and_unapplied_patch_block_resolution() {
        let record = record(&["t::f2p"], &[]);
        let statuses = parse_test_statuses("PASSED t::f2p\n").expect("parse");
        assert!(!grade_instance(&record, "candidate", &statuses, true, true).resolved);
        assert!(!grade_instance(&record, "candidate", &statuses, false, false).resolved);
    }
}
