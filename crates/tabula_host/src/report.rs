//! Plain-text suite report.

use std::fmt::Write;

use crate::conformance::CaseResult;

/// Number of failed cases.
pub fn failures(results: &[CaseResult]) -> usize {
    results.iter().filter(|r| !r.passed()).count()
}

/// One block per case, then the overall verdict.
pub fn render(results: &[CaseResult], transcript: Option<&str>) -> String {
    let mut out = String::new();
    for result in results {
        match &result.error {
            None => {
                let _ = writeln!(out, "{}: passed", result.name);
            }
            Some(error) => {
                let _ = writeln!(out, "{}: failed ({}): {}", result.name, result.phase, error);
            }
        }
        if !result.description.is_empty() {
            let _ = writeln!(out, "  {}", result.description);
        }
        for comment in &result.comments {
            let _ = writeln!(out, "    - {}", comment);
        }
    }

    out.push('\n');
    match failures(results) {
        0 => out.push_str("PASSED\n"),
        n => {
            let _ = writeln!(out, "{} TESTS FAILED", n);
        }
    }
    if let Some(path) = transcript {
        let _ = writeln!(out, "see {} for all data processed", path);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::Phase;

    fn result(name: &str, error: Option<&str>, comments: &[&str]) -> CaseResult {
        CaseResult {
            name: name.to_string(),
            description: format!("{} case", name),
            phase: if error.is_some() {
                Phase::Publishing
            } else {
                Phase::Done
            },
            error: error.map(str::to_string),
            comments: comments.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_all_passed() {
        let results = vec![result("animals", None, &["inferred types on schema animals"])];
        let text = render(&results, Some(".log"));
        assert!(text.starts_with("animals: passed\n  animals case\n"));
        assert!(text.contains("    - inferred types on schema animals\n"));
        assert!(text.contains("\nPASSED\n"));
        assert!(text.ends_with("see .log for all data processed\n"));
        assert_eq!(failures(&results), 0);
    }

    #[test]
    fn test_failures_counted() {
        let results = vec![
            result("animals", None, &[]),
            result("logs", Some("publish error on record 3: boom"), &[]),
            result("people", Some("wrong count"), &[]),
        ];
        let text = render(&results, None);
        assert!(text.contains("logs: failed (publishing): publish error on record 3: boom\n"));
        assert!(text.ends_with("2 TESTS FAILED\n"));
        assert_eq!(failures(&results), 2);
    }
}
