use chrono::Utc;
use tempfile::TempDir;

use promote_core::{
    Environment, FailureDetail, MergeRecord, Outcome, Release, Step, StepResult, TerminalStatus,
    TraceEntry,
};
use promote_renderer::Renderer;
use promote_runtime::{append_summary, outcome_json, summary_destination};

fn checks_failed() -> Outcome {
    let now = Utc::now();
    Outcome {
        release: Release {
            tag: "1.2.3".into(),
            commit: "c0ffee0000000000000000000000000000000001".into(),
            environment: Environment::Prod,
            skip_merge: false,
            delete_branch: false,
            finalize: false,
        },
        status: TerminalStatus::ChecksFailed,
        proposal: None,
        merge: MergeRecord::NotAttempted,
        rollout: None,
        failure: Some(FailureDetail {
            step: Step::Checks,
            error: "required checks failed: test".into(),
            last_observed: Some("build=success, test=failure".into()),
        }),
        trace: vec![TraceEntry {
            at: now,
            step: Step::Checks,
            result: StepResult::Failed,
            detail: "required checks failed: test".into(),
        }],
        started_at: now,
        finished_at: now,
    }
}

#[test]
fn summary_is_appended_not_overwritten() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("step_summary.md");
    std::fs::write(&path, "## earlier job output\n").unwrap();
    let renderer = Renderer::new().unwrap();

    append_summary(&renderer, &checks_failed(), &path).unwrap();
    append_summary(&renderer, &checks_failed(), &path).unwrap();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.starts_with("## earlier job output\n"));
    assert_eq!(written.matches("**CHECKS_FAILED**").count(), 2);
    assert!(written.contains("required checks failed: test"));
    assert!(written.ends_with('\n'));
}

#[test]
fn summary_into_missing_directory_is_an_io_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("missing").join("summary.md");
    let err = append_summary(&Renderer::new().unwrap(), &checks_failed(), &path).unwrap_err();
    assert!(err.to_string().contains("summary.md"));
}

#[test]
fn explicit_destination_wins() {
    let tmp = TempDir::new().unwrap();
    let explicit = tmp.path().join("out.md");
    assert_eq!(summary_destination(Some(&explicit)), Some(explicit));
}

#[test]
fn json_outcome_uses_wire_names() {
    let json = outcome_json(&checks_failed()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["status"], "CHECKS_FAILED");
    assert_eq!(value["merge"]["state"], "not_attempted");
    assert_eq!(value["failure"]["step"], "checks");
    assert_eq!(value["trace"][0]["result"], "failed");
}
