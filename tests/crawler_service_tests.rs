mod common;

use std::sync::Arc;

use checklist_crawler_lib::CrawlerService;
use checklist_crawler_lib::crawling::CrawlOrchestrator;
use checklist_crawler_lib::domain::{PhaseTwoStatus, RunEvent, RunId};
use checklist_crawler_lib::infrastructure::{RunBroadcaster, RunSubscription};
use common::{FakeApproved, FakeLauncher, FakePage, FakeTransport, approved, labels, test_config};

fn service(page: FakePage, transport: Arc<FakeTransport>) -> CrawlerService {
    let mut config = test_config();
    config.harvest.statuses = vec!["SUBMITTED".into()];
    config.harvest.months = vec!["JUL".into()];
    let orchestrator = CrawlOrchestrator::new(
        Arc::new(config),
        FakeLauncher::new(page),
        transport,
        FakeApproved::with(vec![approved("JUL", "1", Some(PhaseTwoStatus::NotFound))]),
    );
    CrawlerService::new(orchestrator, RunBroadcaster::new())
}

fn drain(sub: &mut RunSubscription) -> Vec<RunEvent> {
    std::iter::from_fn(|| sub.try_recv()).collect()
}

fn kinds(events: &[RunEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(RunEvent::kind)
        .filter(|k| *k != "log")
        .collect()
}

#[tokio::test(start_paused = true)]
async fn phase_one_publishes_start_batches_and_complete() {
    let page = FakePage::new().with_facet("SUBMITTED", "JUL", labels(1..=3));
    let service = service(page, FakeTransport::healthy());
    let run_id = RunId::from("run_1_events");
    let mut sub = service.subscribe(&run_id);

    let summary = service.trigger_phase_one("BANDUNG", Some(run_id.clone())).await.unwrap();

    let events = drain(&mut sub);
    assert_eq!(kinds(&events), ["connected", "start", "batch_start", "batch_complete", "complete"]);
    assert!(events.iter().any(|e| matches!(e, RunEvent::Log { .. })));
    assert_eq!(
        events[1],
        RunEvent::Start {
            area: "BANDUNG".into(),
            period: "1-20".into()
        }
    );
    match events.last().unwrap() {
        RunEvent::Complete { success, totals } => {
            assert!(success);
            assert_eq!(totals.total_crawled, Some(3));
            assert_eq!(totals.total_sent, Some(3));
            assert_eq!(totals.total_checked, None);
        }
        other => panic!("unexpected last event: {other:?}"),
    }
    assert_eq!(summary.run_id, run_id);
}

#[tokio::test(start_paused = true)]
async fn failure_publishes_error() {
    let service = service(FakePage::new(), FakeTransport::healthy());
    let run_id = RunId::from("run_2_error");
    let mut sub = service.subscribe(&run_id);

    assert!(service.trigger_phase_one("CORPU", Some(run_id)).await.is_err());

    let events = drain(&mut sub);
    assert_eq!(kinds(&events), ["connected", "start", "error"]);
    match &events[2] {
        RunEvent::Error { error } => assert!(error.contains("CORPU")),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn both_phases_share_one_channel() {
    let page = FakePage::new()
        .with_facet("SUBMITTED", "JUL", labels(1..=2))
        .with_facet("APPROVED", "JUL", labels(1..=2));
    let service = service(page, FakeTransport::healthy());
    let run_id = RunId::from("run_3_both");
    let mut sub = service.subscribe(&run_id);

    let combined = service.trigger_both("BANDUNG", true, Some(run_id)).await.unwrap();

    let starts: Vec<_> = drain(&mut sub)
        .into_iter()
        .filter_map(|e| match e {
            RunEvent::Start { period, .. } => Some(period),
            _ => None,
        })
        .collect();
    assert_eq!(starts, ["1-20", "21-30"]);
    assert_eq!(combined.phase_one.total_crawled, 2);
    assert_eq!(combined.phase_two.total_checked, 1);
}

#[tokio::test(start_paused = true)]
async fn all_areas_continue_past_failures() {
    let page = FakePage::new().with_facet("SUBMITTED", "JUL", labels(1..=2));
    let service = service(page, FakeTransport::healthy());
    let base = RunId::from("run_4_sweep");
    let mut bandung = service.subscribe(&RunId::from("run_4_sweep_bandung"));
    let mut corpu = service.subscribe(&RunId::from("run_4_sweep_corpu"));

    let results = service.trigger_all_areas_phase_one(Some(base)).await;

    let areas: Vec<_> = results.iter().map(|(a, _)| a.as_str()).collect();
    assert_eq!(areas, ["BANDUNG", "CORPU", "PRIANGAN_BARAT", "PRIANGAN_TIMUR"]);
    assert_eq!(
        results[0].1.as_ref().unwrap().run_id,
        RunId::from("run_4_sweep_bandung")
    );
    assert!(results[1..].iter().all(|(_, r)| r.is_err()));
    assert_eq!(kinds(&drain(&mut bandung)).last(), Some(&"complete"));
    assert_eq!(kinds(&drain(&mut corpu)).last(), Some(&"error"));
}
