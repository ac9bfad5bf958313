//! End-to-end behaviour of a session: intake, comparison, classification
//! and rollup driven through the in-memory transport.

use async_trait::async_trait;
use shotcheck_engine::{
    ChannelTransport, Comparator, DiffBounds, DiffResult, DimensionDifference, EngineConfig,
    Error, ErroredPolicy, GroupVerdict, ImageRef, ReportSnapshot, ResultGroupSpec, Role, Session,
    TransportEvent, Verdict, VerdictDetail,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

/// Returns a configured result per name and records every call
#[derive(Default)]
struct ScriptedComparator {
    results: HashMap<String, Result<DiffResult, String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedComparator {
    fn with(mut self, name: &str, result: Result<DiffResult, String>) -> Self {
        self.results.insert(name.to_string(), result);
        self
    }

    fn calls_for(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|n| *n == name).count()
    }
}

#[async_trait]
impl Comparator for ScriptedComparator {
    async fn compare(
        &self,
        reference: &ImageRef,
        test: &ImageRef,
    ) -> shotcheck_engine::Result<DiffResult> {
        assert_eq!(reference.role, Role::Reference);
        assert_eq!(test.role, Role::Test);
        self.calls.lock().unwrap().push(reference.name.clone());
        match self.results.get(&reference.name) {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(message)) => Err(Error::Comparison(message.clone())),
            None => Ok(DiffResult::identical()),
        }
    }
}

fn group(id: &str, names: &[&str]) -> ResultGroupSpec {
    ResultGroupSpec {
        id: id.to_string(),
        breakpoints: names.iter().map(|n| n.to_string()).collect(),
    }
}

fn mismatch(pct: f64, same_dimensions: bool) -> DiffResult {
    DiffResult::new(
        pct,
        same_dimensions,
        DiffBounds {
            top: 10,
            left: 0,
            bottom: 120,
            right: 640,
        },
        DimensionDifference {
            width: 0,
            height: if same_dimensions { 0 } else { 24 },
        },
        Some(vec![0x89, b'P', b'N', b'G']),
    )
}

/// Run a session over `events` until the transport closes
async fn run(
    config: EngineConfig,
    comparator: Arc<ScriptedComparator>,
    events: Vec<TransportEvent>,
) -> ReportSnapshot {
    let (session, _handle) = Session::new(config, comparator).unwrap();
    let (publisher, transport) = ChannelTransport::new("screenshots:test", 16);
    let task = tokio::spawn(session.run(transport));
    for event in events {
        publisher.publish(event).await.unwrap();
    }
    drop(publisher);
    task.await.unwrap()
}

fn breakpoint<'a>(report: &'a ReportSnapshot, name: &str) -> &'a shotcheck_engine::Breakpoint {
    report
        .groups
        .iter()
        .flat_map(|g| g.breakpoints.iter())
        .chain(report.ungrouped.iter())
        .find(|b| b.name == name)
        .expect("breakpoint present in report")
}

fn group_verdict(report: &ReportSnapshot, id: &str) -> GroupVerdict {
    report
        .groups
        .iter()
        .find(|g| g.id == id)
        .map(|g| g.verdict)
        .expect("group present in report")
}

#[tokio::test]
async fn scenario_a_one_comparison_per_pair() {
    let comparator = Arc::new(ScriptedComparator::default());
    let config = EngineConfig::default().with_groups(vec![group("home", &["hero"])]);

    run(
        config,
        comparator.clone(),
        vec![
            TransportEvent::image("hero", Role::Reference),
            TransportEvent::image("hero", Role::Test),
        ],
    )
    .await;

    assert_eq!(comparator.calls_for("hero"), 1);
}

#[tokio::test]
async fn scenario_b_zero_mismatch_passes_group() {
    let comparator =
        Arc::new(ScriptedComparator::default().with("hero", Ok(DiffResult::identical())));
    let config = EngineConfig::default().with_groups(vec![group("home", &["hero"])]);

    let report = run(
        config,
        comparator,
        vec![
            TransportEvent::image("hero", Role::Reference),
            TransportEvent::image("hero", Role::Test),
        ],
    )
    .await;

    let hero = breakpoint(&report, "hero");
    assert_eq!(hero.verdict, Some(Verdict::Passed));
    assert!(hero.detail.is_none());
    assert_eq!(group_verdict(&report, "home"), GroupVerdict::Passed);
}

#[tokio::test]
async fn scenario_c_mismatch_fails_group() {
    let comparator =
        Arc::new(ScriptedComparator::default().with("footer", Ok(mismatch(3.2, false))));
    let config = EngineConfig::default().with_groups(vec![group("home", &["footer"])]);

    let report = run(
        config,
        comparator,
        vec![
            TransportEvent::image("footer", Role::Test),
            TransportEvent::image("footer", Role::Reference),
        ],
    )
    .await;

    let footer = breakpoint(&report, "footer");
    assert_eq!(footer.verdict, Some(Verdict::Failed));
    match &footer.detail {
        Some(VerdictDetail::Mismatch(result)) => {
            assert!(!result.is_same_dimensions);
            assert_eq!(result.mismatch_percentage, 3.2);
            assert_eq!(result.dimension_difference.height, 24);
        }
        other => panic!("Expected mismatch detail, got {:?}", other),
    }
    assert_eq!(group_verdict(&report, "home"), GroupVerdict::Failed);
}

#[tokio::test]
async fn scenario_d_scoped_error_without_comparison() {
    let comparator = Arc::new(ScriptedComparator::default());
    let config = EngineConfig::default().with_groups(vec![group("home", &["nav"])]);

    let report = run(
        config,
        comparator.clone(),
        vec![TransportEvent::error(Some("nav"), Some(Role::Test), "timeout")],
    )
    .await;

    let nav = breakpoint(&report, "nav");
    assert_eq!(nav.verdict, Some(Verdict::Errored));
    assert_eq!(nav.detail, Some(VerdictDetail::Error("timeout".to_string())));
    assert_eq!(comparator.calls_for("nav"), 0);
    // Errored is excluded from the tally by default
    assert_eq!(group_verdict(&report, "home"), GroupVerdict::Pending);
}

#[tokio::test]
async fn duplicate_deliveries_do_not_compare_twice() {
    let comparator = Arc::new(ScriptedComparator::default());
    let config = EngineConfig::default().with_groups(vec![group("home", &["hero"])]);

    run(
        config,
        comparator.clone(),
        vec![
            TransportEvent::image("hero", Role::Reference),
            TransportEvent::image("hero", Role::Reference),
            TransportEvent::image("hero", Role::Test),
            TransportEvent::image("hero", Role::Test),
            TransportEvent::image("hero", Role::Reference),
        ],
    )
    .await;

    assert_eq!(comparator.calls_for("hero"), 1);
}

#[tokio::test]
async fn single_role_never_compared() {
    let comparator = Arc::new(ScriptedComparator::default());
    let config = EngineConfig::default().with_groups(vec![group("home", &["hero"])]);

    let report = run(
        config,
        comparator.clone(),
        vec![
            TransportEvent::image("hero", Role::Test),
            TransportEvent::image("hero", Role::Test),
        ],
    )
    .await;

    assert_eq!(comparator.calls_for("hero"), 0);
    assert_eq!(breakpoint(&report, "hero").verdict, None);
    assert_eq!(group_verdict(&report, "home"), GroupVerdict::Pending);
}

#[tokio::test]
async fn unscoped_errors_touch_nothing() {
    let comparator = Arc::new(ScriptedComparator::default());
    let config = EngineConfig::default().with_groups(vec![group("home", &["nav"])]);

    let report = run(
        config,
        comparator,
        vec![
            TransportEvent::error(Some("nav"), None, "no role"),
            TransportEvent::error(None, Some(Role::Test), "no name"),
            TransportEvent::error(None, None, "nothing"),
        ],
    )
    .await;

    assert_eq!(breakpoint(&report, "nav").verdict, None);
    assert!(report.ungrouped.is_empty());
}

#[tokio::test]
async fn comparison_failure_is_errored_with_message() {
    let comparator = Arc::new(
        ScriptedComparator::default().with("hero", Err("reference image unreadable".to_string())),
    );
    let config = EngineConfig::default().with_groups(vec![group("home", &["hero"])]);

    let report = run(
        config,
        comparator,
        vec![
            TransportEvent::image("hero", Role::Reference),
            TransportEvent::image("hero", Role::Test),
        ],
    )
    .await;

    let hero = breakpoint(&report, "hero");
    assert_eq!(hero.verdict, Some(Verdict::Errored));
    match &hero.detail {
        Some(VerdictDetail::Error(message)) => {
            assert!(message.contains("reference image unreadable"))
        }
        other => panic!("Expected error detail, got {:?}", other),
    }
}

#[tokio::test]
async fn first_verdict_wins_over_late_error() {
    let comparator = Arc::new(ScriptedComparator::default());
    let config = EngineConfig::default().with_groups(vec![group("home", &["hero", "nav"])]);

    let report = run(
        config,
        comparator,
        vec![
            TransportEvent::error(Some("nav"), Some(Role::Reference), "first"),
            TransportEvent::error(Some("nav"), Some(Role::Test), "second"),
        ],
    )
    .await;

    assert_eq!(
        breakpoint(&report, "nav").detail,
        Some(VerdictDetail::Error("first".to_string()))
    );
}

#[tokio::test]
async fn failure_dominates_group_regardless_of_siblings() {
    let comparator = Arc::new(
        ScriptedComparator::default()
            .with("hero", Ok(DiffResult::identical()))
            .with("footer", Ok(mismatch(0.4, true))),
    );
    let config =
        EngineConfig::default().with_groups(vec![group("home", &["hero", "footer", "nav", "cta"])]);

    let report = run(
        config,
        comparator,
        vec![
            TransportEvent::image("hero", Role::Reference),
            TransportEvent::image("hero", Role::Test),
            TransportEvent::image("footer", Role::Reference),
            TransportEvent::image("footer", Role::Test),
            TransportEvent::error(Some("nav"), Some(Role::Test), "timeout"),
        ],
    )
    .await;

    assert_eq!(report.count(Verdict::Passed), 1);
    assert_eq!(report.count(Verdict::Failed), 1);
    assert_eq!(report.count(Verdict::Errored), 1);
    assert_eq!(group_verdict(&report, "home"), GroupVerdict::Failed);
}

#[tokio::test]
async fn errored_policy_fail_fails_group() {
    let comparator = Arc::new(ScriptedComparator::default());
    let config = EngineConfig::default()
        .with_groups(vec![group("home", &["hero", "nav"]), group("about", &["team"])])
        .with_errored_policy(ErroredPolicy::Fail);

    let report = run(
        config,
        comparator,
        vec![
            TransportEvent::image("hero", Role::Reference),
            TransportEvent::image("hero", Role::Test),
            TransportEvent::error(Some("nav"), Some(Role::Test), "timeout"),
            TransportEvent::image("team", Role::Reference),
            TransportEvent::image("team", Role::Test),
        ],
    )
    .await;

    assert_eq!(group_verdict(&report, "home"), GroupVerdict::Failed);
    assert_eq!(group_verdict(&report, "about"), GroupVerdict::Passed);
}

#[tokio::test]
async fn reset_allows_rerun_of_same_name() {
    let comparator = Arc::new(ScriptedComparator::default());
    let config = EngineConfig::default().with_groups(vec![group("home", &["hero"])]);
    let (session, handle) = Session::new(config, comparator.clone()).unwrap();
    let (publisher, transport) = ChannelTransport::new("screenshots:test", 16);
    let mut changes = handle.subscribe();
    let task = tokio::spawn(session.run(transport));

    for role in [Role::Reference, Role::Test] {
        publisher.publish(TransportEvent::image("hero", role)).await.unwrap();
    }
    wait_for_group(&mut changes, GroupVerdict::Passed).await;

    handle.reset().await.unwrap();
    assert_eq!(
        handle.group_verdict("home").await.unwrap(),
        Some(GroupVerdict::Pending)
    );

    for role in [Role::Reference, Role::Test] {
        publisher.publish(TransportEvent::image("hero", role)).await.unwrap();
    }
    drop(publisher);

    let report = task.await.unwrap();
    assert_eq!(comparator.calls_for("hero"), 2);
    assert_eq!(group_verdict(&report, "home"), GroupVerdict::Passed);
}

async fn wait_for_group(
    changes: &mut tokio::sync::broadcast::Receiver<shotcheck_engine::StateChange>,
    target: GroupVerdict,
) {
    loop {
        if let shotcheck_engine::StateChange::GroupChanged { to, .. } = changes.recv().await.unwrap()
        {
            if to == target {
                return;
            }
        }
    }
}
