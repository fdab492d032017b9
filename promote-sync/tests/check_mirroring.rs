mod common;

use common::*;
use promote_core::fakes::check_run;
use promote_core::types::{CheckState, ProposalState};
use promote_core::{abort_pair, PromoteError};
use promote_sync::{CheckSync, CheckVerdict};

#[tokio::test(start_paused = true)]
async fn passes_once_every_check_succeeds_and_mirrors_each_state() {
    let forge = forge();
    let release = release("1.2.3");
    let update = open_proposal(&forge, &release).await;
    forge.script_checks(vec![
        vec![check_run("build", "in_progress", None), check_run("lint", "queued", None)],
        vec![check_run("build", "completed", Some("success")), check_run("lint", "in_progress", None)],
        vec![
            check_run("build", "completed", Some("success")),
            check_run("lint", "completed", Some("success")),
        ],
    ]);

    let mut sync = check_sync(&forge, &[], 10);
    let verdict = sync.wait_for_checks(&release, &update.proposal).await.unwrap();
    let CheckVerdict::Passed(passed) = verdict else {
        panic!("expected pass, got {verdict:?}");
    };
    assert_eq!(passed.proposal_number(), update.proposal.number);
    assert_eq!(passed.head_sha(), &update.commit);
    assert_eq!(passed.checks(), ["build", "lint"]);

    let statuses = forge.statuses_on(RELEASE_COMMIT);
    assert_eq!(statuses.len(), 2);
    for status in &statuses {
        assert_eq!(status.state, CheckState::Success);
        assert!(status.context.ends_with(" / 1.2.3"));
        assert_eq!(status.description.as_deref(), Some(format!("PR #{}", update.proposal.number).as_str()));
    }
    // pending x2, build success, lint success
    assert_eq!(sync.mirror_writes(), 4);
}

#[tokio::test(start_paused = true)]
async fn unchanged_checks_produce_no_further_writes() {
    let forge = forge();
    let release = release("1.2.3");
    let update = open_proposal(&forge, &release).await;
    forge.script_checks(vec![vec![
        check_run("build", "completed", Some("success")),
        check_run("e2e", "in_progress", None),
    ]]);

    let mut first = check_sync(&forge, &[], 4);
    let verdict = first.wait_for_checks(&release, &update.proposal).await.unwrap();
    assert!(matches!(verdict, CheckVerdict::TimedOut { attempts: 4, .. }));
    assert_eq!(first.mirror_writes(), 2);
    assert_eq!(forge.calls_named("create_status"), 2);

    // a fresh session seeds its ledger from the statuses already on the commit
    let mut second = check_sync(&forge, &[], 3);
    second.wait_for_checks(&release, &update.proposal).await.unwrap();
    assert_eq!(second.mirror_writes(), 0);
    assert_eq!(forge.calls_named("create_status"), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_required_check_stops_polling() {
    let forge = forge();
    let release = release("1.2.3");
    let update = open_proposal(&forge, &release).await;
    forge.script_checks(vec![vec![
        check_run("build", "completed", Some("failure")),
        check_run("lint", "in_progress", None),
    ]]);

    let mut sync = check_sync(&forge, &["build"], 10);
    let verdict = sync.wait_for_checks(&release, &update.proposal).await.unwrap();
    match verdict {
        CheckVerdict::Failed(summary) => {
            assert_eq!(summary.with_state(CheckState::Failure), vec!["build"]);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(forge.calls_named("list_check_runs"), 1);
    let build = forge
        .statuses_on(RELEASE_COMMIT)
        .into_iter()
        .find(|s| s.context == "build / 1.2.3")
        .expect("build mirrored");
    assert_eq!(build.state, CheckState::Failure);
}

#[tokio::test(start_paused = true)]
async fn unrequired_failure_does_not_block() {
    let forge = forge();
    let release = release("1.2.3");
    let update = open_proposal(&forge, &release).await;
    forge.script_checks(vec![vec![
        check_run("build", "completed", Some("success")),
        check_run("flaky", "completed", Some("failure")),
    ]]);

    let mut sync = check_sync(&forge, &["build"], 3);
    let verdict = sync.wait_for_checks(&release, &update.proposal).await.unwrap();
    assert!(matches!(verdict, CheckVerdict::Passed(_)));
}

#[tokio::test(start_paused = true)]
async fn required_check_that_never_reports_times_out() {
    let forge = forge();
    let release = release("1.2.3");
    let update = open_proposal(&forge, &release).await;
    forge.script_checks(vec![vec![check_run("build", "completed", Some("success"))]]);

    let started = tokio::time::Instant::now();
    let mut sync = check_sync(&forge, &["build", "deploy-gate"], 5);
    let verdict = sync.wait_for_checks(&release, &update.proposal).await.unwrap();
    match verdict {
        CheckVerdict::TimedOut { attempts, last } => {
            assert_eq!(attempts, 5);
            assert_eq!(last.states.len(), 1);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    // 5s settle + 4 gaps of 10s
    assert_eq!(started.elapsed().as_secs(), 45);
}

#[tokio::test(start_paused = true)]
async fn no_checks_at_all_never_passes() {
    let forge = forge();
    let release = release("1.2.3");
    let update = open_proposal(&forge, &release).await;

    let mut sync = check_sync(&forge, &[], 2);
    let verdict = sync.wait_for_checks(&release, &update.proposal).await.unwrap();
    assert!(matches!(verdict, CheckVerdict::TimedOut { attempts: 2, .. }));
}

#[tokio::test(start_paused = true)]
async fn closed_proposal_is_missing() {
    let forge = forge();
    let release = release("1.2.3");
    let update = open_proposal(&forge, &release).await;
    forge.state().proposals[0].state = ProposalState::Closed;

    let mut sync = check_sync(&forge, &[], 3);
    let err = sync.wait_for_checks(&release, &update.proposal).await.unwrap_err();
    assert!(matches!(err, PromoteError::MissingProposal { .. }));
}

#[tokio::test(start_paused = true)]
async fn abort_ends_the_wait() {
    let forge = forge();
    let release = release("1.2.3");
    let update = open_proposal(&forge, &release).await;
    forge.script_checks(vec![vec![check_run("build", "queued", None)]]);

    let (handle, signal) = abort_pair();
    handle.abort();
    let mut sync = CheckSync::new(&forge, check_settings(&[], 10), signal);
    let err = sync.wait_for_checks(&release, &update.proposal).await.unwrap_err();
    assert!(matches!(err, PromoteError::Aborted { ref step } if step == "checks"));
    assert_eq!(forge.calls_named("list_check_runs"), 0);
}
