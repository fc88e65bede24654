//! Root/branch lifecycle integration tests.

use assert_matches::assert_matches;
use std::time::Duration;
use tcc_coordinator::BranchSpec;
use tcc_core::codes::{
    BRANCH_TXN_CONFIRM_FAILED_BRANCH_TXN_STATE_ERROR, TXN_END_FAILED_NOT_ALL_BRANCHES_COMPLETED,
    TXN_JOIN_FAILED_BRANCH_XID_ALREADY_EXISTS,
};
use tcc_core::{
    BranchId, BranchState, Completion, ErrorKind, Operation, Outcome, RootState, TccError,
};
use tcc_testkit::{Fixture, ScriptedAction, ServiceScript};

#[tokio::test]
async fn test_happy_path_confirm() {
    let fx = Fixture::default();
    let inventory = ServiceScript::new();
    let payments = ServiceScript::new();
    let inventory_spec = inventory.register(&fx.actions, "inventory");
    let payments_spec = payments.register(&fx.actions, "payments");

    let root_id = fx.coordinator.begin("order-1".into()).await.unwrap();
    let b1 = fx.coordinator.join(root_id, inventory_spec).await.unwrap();
    let b2 = fx.coordinator.join(root_id, payments_spec).await.unwrap();
    fx.coordinator.try_branch(root_id, b1).await.unwrap();
    fx.coordinator.try_branch(root_id, b2).await.unwrap();

    let report = fx.coordinator.end(root_id, Outcome::Confirm).await.unwrap();
    assert_eq!(report.completion, Completion::Completed);
    assert_eq!(report.state, RootState::Confirmed);
    let order: Vec<_> = report.branches.iter().map(|b| b.branch_id).collect();
    assert_eq!(order, vec![b1, b2]);

    assert_eq!(inventory.confirm.calls(), 1);
    assert_eq!(payments.confirm.calls(), 1);
    assert_eq!(inventory.cancel.calls(), 0);
    assert_eq!(
        fx.manager.records().root_state(root_id),
        Some(RootState::Confirmed)
    );
    assert_eq!(
        fx.manager.records().branch_state(root_id, b2),
        Some(BranchState::Confirmed)
    );

    // Ending again is an idempotent no-op.
    let again = fx.coordinator.end(root_id, Outcome::Confirm).await.unwrap();
    assert_eq!(again.completion, Completion::AlreadyCompleted);
    assert_eq!(inventory.confirm.calls(), 1);
}

#[tokio::test]
async fn test_double_begin_same_scope() {
    let fx = Fixture::default();
    let first = fx.coordinator.begin("order-2".into()).await.unwrap();

    let err = fx.coordinator.begin("order-2".into()).await.unwrap_err();
    assert_matches!(err, TccError::RootAlreadyActive { existing, .. } if existing == first);
    assert!(fx.coordinator.begin("order-3".into()).await.is_ok());
}

#[tokio::test]
async fn test_join_after_end_is_state_error() {
    let fx = Fixture::default();
    let script = ServiceScript::new();
    let spec = script.register(&fx.actions, "inventory");
    let root_id = fx.coordinator.begin("order-4".into()).await.unwrap();
    fx.coordinator.end(root_id, Outcome::Cancel).await.unwrap();

    let err = fx.coordinator.join(root_id, spec.clone()).await.unwrap_err();
    assert_matches!(
        err,
        TccError::RootStateError {
            state: RootState::Cancelled,
            operation: Operation::Join,
            ..
        }
    );

    fx.coordinator.archive(root_id).unwrap();
    let err = fx.coordinator.join(root_id, spec).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RootNotFound);
}

#[tokio::test]
async fn test_join_rejects_duplicate_and_unknown_actions() {
    let fx = Fixture::default();
    let spec = ServiceScript::new().register(&fx.actions, "inventory");
    let root_id = fx.coordinator.begin("order-5".into()).await.unwrap();

    let branch_id = BranchId::new_v4();
    fx.coordinator
        .join(root_id, spec.clone().with_branch_id(branch_id))
        .await
        .unwrap();
    let err = fx
        .coordinator
        .join(root_id, spec.with_branch_id(branch_id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BranchAlreadyExists);
    assert_eq!(
        err.code(Operation::Join),
        TXN_JOIN_FAILED_BRANCH_XID_ALREADY_EXISTS
    );

    let unknown = BranchSpec::new("inventory", "try", "confirm", "refund");
    let err = fx.coordinator.join(root_id, unknown).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ActionNotRegistered);
    assert_eq!(fx.coordinator.root_snapshot(root_id).unwrap().branches.len(), 1);
}

#[tokio::test]
async fn test_branch_addressing_and_state_errors() {
    let fx = Fixture::default();
    let spec = ServiceScript::new().register(&fx.actions, "inventory");
    let root_id = fx.coordinator.begin("order-6".into()).await.unwrap();
    let registered = fx.coordinator.join(root_id, spec.clone()).await.unwrap();
    let tried = fx.coordinator.join(root_id, spec).await.unwrap();
    fx.coordinator.try_branch(root_id, tried).await.unwrap();

    let err = fx
        .coordinator
        .confirm_branch(root_id, BranchId::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BranchNotFound);

    // Never tried: Confirm is a state error and fails the branch.
    let err = fx
        .coordinator
        .confirm_branch(root_id, registered)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BranchStateError);
    assert_eq!(
        err.code(Operation::Confirm),
        BRANCH_TXN_CONFIRM_FAILED_BRANCH_TXN_STATE_ERROR
    );

    // Cancelled then confirmed: state error, branch stays Cancelled.
    fx.coordinator.cancel_branch(root_id, tried).await.unwrap();
    let err = fx
        .coordinator
        .confirm_branch(root_id, tried)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        TccError::BranchStateError {
            state: BranchState::Cancelled,
            ..
        }
    );

    let snapshot = fx.coordinator.root_snapshot(root_id).unwrap();
    let states: Vec<_> = snapshot.branches.iter().map(|b| b.state).collect();
    assert_eq!(states, vec![BranchState::Failed, BranchState::Cancelled]);
}

#[tokio::test]
async fn test_end_retry_only_reruns_failed_branch() {
    let fx = Fixture::default();
    let good_a = ServiceScript::new();
    let good_b = ServiceScript::new();
    let flaky = ServiceScript::new().with_confirm(ScriptedAction::failing_times(1));
    let specs = [
        good_a.register(&fx.actions, "inventory"),
        good_b.register(&fx.actions, "payments"),
        flaky.register(&fx.actions, "shipping"),
    ];

    let root_id = fx.coordinator.begin("order-7".into()).await.unwrap();
    let mut ids = Vec::new();
    for spec in specs {
        let id = fx.coordinator.join(root_id, spec).await.unwrap();
        fx.coordinator.try_branch(root_id, id).await.unwrap();
        ids.push(id);
    }

    let err = fx
        .coordinator
        .end(root_id, Outcome::Confirm)
        .await
        .unwrap_err();
    assert_eq!(
        err.code(Operation::End),
        TXN_END_FAILED_NOT_ALL_BRANCHES_COMPLETED
    );
    assert_matches!(
        &err,
        TccError::NotAllBranchesCompleted { pending, failed, .. }
            if pending == &vec![ids[2]] && failed.is_empty()
    );
    assert_eq!(
        fx.coordinator.root_snapshot(root_id).unwrap().state,
        RootState::Confirming
    );

    let report = fx.coordinator.end(root_id, Outcome::Confirm).await.unwrap();
    assert_eq!(report.state, RootState::Confirmed);
    assert_eq!(good_a.confirm.calls(), 1);
    assert_eq!(good_b.confirm.calls(), 1);
    assert_eq!(flaky.confirm.calls(), 2);

    let results: Vec<_> = report.branches.iter().map(|b| b.result.clone()).collect();
    assert_eq!(
        results,
        vec![
            Ok(Completion::AlreadyCompleted),
            Ok(Completion::AlreadyCompleted),
            Ok(Completion::Completed),
        ]
    );
}

#[tokio::test]
async fn test_end_with_opposite_outcome_rejected() {
    let fx = Fixture::default();
    let stuck = ServiceScript::new().with_confirm(ScriptedAction::always_failing());
    let spec = stuck.register(&fx.actions, "inventory");
    let root_id = fx.coordinator.begin("order-8".into()).await.unwrap();
    let id = fx.coordinator.join(root_id, spec).await.unwrap();
    fx.coordinator.try_branch(root_id, id).await.unwrap();

    assert!(fx.coordinator.end(root_id, Outcome::Confirm).await.is_err());
    let err = fx
        .coordinator
        .end(root_id, Outcome::Cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RootStateError);
    assert_eq!(stuck.cancel.calls(), 0);
}

#[tokio::test]
async fn test_cancel_covers_untried_branches() {
    let fx = Fixture::default();
    let tried = ServiceScript::new();
    let untried = ServiceScript::new().with_try(ScriptedAction::always_failing());
    let tried_spec = tried.register(&fx.actions, "inventory");
    let untried_spec = untried.register(&fx.actions, "payments");

    let root_id = fx.coordinator.begin("order-9".into()).await.unwrap();
    let a = fx.coordinator.join(root_id, tried_spec).await.unwrap();
    let b = fx.coordinator.join(root_id, untried_spec).await.unwrap();
    fx.coordinator.try_branch(root_id, a).await.unwrap();
    let err = fx.coordinator.try_branch(root_id, b).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ActionFailed);

    let report = fx.coordinator.end(root_id, Outcome::Cancel).await.unwrap();
    assert_eq!(report.state, RootState::Cancelled);
    assert_eq!(tried.cancel.calls(), 1);
    // Nothing to compensate on the branch whose Try never succeeded.
    assert_eq!(untried.cancel.calls(), 0);
}

#[tokio::test]
async fn test_branches_run_concurrently() {
    let fx = Fixture::with_end_timeout(Duration::from_secs(5));
    let delay = Duration::from_millis(200);
    let scripts: Vec<_> = (0..4)
        .map(|_| {
            ServiceScript::new().with_confirm(ScriptedAction::succeeding().with_delay(delay))
        })
        .collect();

    let root_id = fx.coordinator.begin("order-10".into()).await.unwrap();
    for (i, script) in scripts.iter().enumerate() {
        let spec = script.register(&fx.actions, &format!("svc-{i}"));
        let id = fx.coordinator.join(root_id, spec).await.unwrap();
        fx.coordinator.try_branch(root_id, id).await.unwrap();
    }

    let started = std::time::Instant::now();
    fx.coordinator.end(root_id, Outcome::Confirm).await.unwrap();
    // Sequential execution would take at least 800ms.
    assert!(started.elapsed() < Duration::from_millis(700));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_leaves_work_running_and_retry_succeeds() {
    let fx = Fixture::with_end_timeout(Duration::from_millis(100));
    let fast = ServiceScript::new();
    let slow = ServiceScript::new()
        .with_confirm(ScriptedAction::succeeding().with_delay(Duration::from_secs(2)));
    let fast_spec = fast.register(&fx.actions, "inventory");
    let slow_spec = slow.register(&fx.actions, "shipping");

    let root_id = fx.coordinator.begin("order-11".into()).await.unwrap();
    let fast_id = fx.coordinator.join(root_id, fast_spec).await.unwrap();
    let slow_id = fx.coordinator.join(root_id, slow_spec).await.unwrap();
    fx.coordinator.try_branch(root_id, fast_id).await.unwrap();
    fx.coordinator.try_branch(root_id, slow_id).await.unwrap();

    let err = fx
        .coordinator
        .end(root_id, Outcome::Confirm)
        .await
        .unwrap_err();
    assert_matches!(
        &err,
        TccError::Timeout { pending, failed, elapsed_ms, .. }
            if pending == &vec![slow_id] && failed.is_empty() && *elapsed_ms >= 100
    );
    assert_eq!(
        fx.coordinator.root_snapshot(root_id).unwrap().state,
        RootState::TimedOut
    );

    // The slow Confirm was not aborted; it finishes on its own.
    tokio::time::sleep(Duration::from_secs(3)).await;
    let snapshot = fx.coordinator.root_snapshot(root_id).unwrap();
    assert_eq!(snapshot.branches[1].state, BranchState::Confirmed);

    let report = fx.coordinator.end(root_id, Outcome::Confirm).await.unwrap();
    assert_eq!(report.state, RootState::Confirmed);
    assert_eq!(slow.confirm.calls(), 1);
    assert_eq!(fast.confirm.calls(), 1);
}

#[tokio::test]
async fn test_archive_requires_terminal_root() {
    let fx = Fixture::default();
    let root_id = fx.coordinator.begin("order-12".into()).await.unwrap();

    let err = fx.coordinator.archive(root_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RootStateError);

    fx.coordinator.end(root_id, Outcome::Confirm).await.unwrap();
    let archived = fx.coordinator.archive(root_id).unwrap();
    assert_eq!(archived.state, RootState::Confirmed);
    assert_eq!(
        fx.coordinator.root_snapshot(root_id).unwrap_err().kind(),
        ErrorKind::RootNotFound
    );
    assert!(fx.coordinator.active_root(&"order-12".into()).is_none());
}

#[tokio::test]
async fn test_end_reports_failed_branches() {
    let fx = Fixture::default();
    let tried = ServiceScript::new();
    let untried = ServiceScript::new();
    let tried_spec = tried.register(&fx.actions, "inventory");
    let untried_spec = untried.register(&fx.actions, "payments");

    let root_id = fx.coordinator.begin("order-13".into()).await.unwrap();
    let tried_id = fx.coordinator.join(root_id, tried_spec).await.unwrap();
    let untried_id = fx.coordinator.join(root_id, untried_spec).await.unwrap();
    fx.coordinator.try_branch(root_id, tried_id).await.unwrap();

    let err = fx
        .coordinator
        .end(root_id, Outcome::Confirm)
        .await
        .unwrap_err();
    assert_matches!(
        &err,
        TccError::NotAllBranchesCompleted { pending, failed, .. }
            if pending.is_empty() && failed == &vec![untried_id]
    );
    let snapshot = fx.coordinator.root_snapshot(root_id).unwrap();
    assert_eq!(snapshot.branches[0].state, BranchState::Confirmed);
    assert_eq!(snapshot.branches[1].state, BranchState::Failed);
    assert_eq!(untried.confirm.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_separates_failed_from_pending() {
    let fx = Fixture::with_end_timeout(Duration::from_millis(100));
    let slow = ServiceScript::new()
        .with_confirm(ScriptedAction::succeeding().with_delay(Duration::from_secs(2)));
    let untried = ServiceScript::new();
    let slow_spec = slow.register(&fx.actions, "shipping");
    let untried_spec = untried.register(&fx.actions, "payments");

    let root_id = fx.coordinator.begin("order-14".into()).await.unwrap();
    let slow_id = fx.coordinator.join(root_id, slow_spec).await.unwrap();
    let untried_id = fx.coordinator.join(root_id, untried_spec).await.unwrap();
    fx.coordinator.try_branch(root_id, slow_id).await.unwrap();

    let err = fx
        .coordinator
        .end(root_id, Outcome::Confirm)
        .await
        .unwrap_err();
    assert_matches!(
        &err,
        TccError::Timeout { pending, failed, .. }
            if pending == &vec![slow_id] && failed == &vec![untried_id]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_try_runs_compensation() {
    let fx = std::sync::Arc::new(Fixture::default());
    let script = ServiceScript::new()
        .with_try(ScriptedAction::succeeding().with_delay(Duration::from_millis(500)));
    let spec = script.register(&fx.actions, "inventory");
    let root_id = fx.coordinator.begin("order-15".into()).await.unwrap();
    let id = fx.coordinator.join(root_id, spec).await.unwrap();

    let trying = tokio::spawn({
        let fx = fx.clone();
        async move { fx.coordinator.try_branch(root_id, id).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = fx.coordinator.end(root_id, Outcome::Cancel).await.unwrap();
    assert_eq!(report.state, RootState::Cancelled);
    assert_eq!(trying.await.unwrap().unwrap(), Completion::Completed);
    assert_eq!(script.try_action.calls(), 1);
    assert_eq!(script.cancel.calls(), 1);
}
