//! End-to-end pipeline behaviour against a scripted capability and the
//! in-memory cache backend.

mod common;

use common::{harness, harness_with, harness_with_response_cache, ScriptedCapability};
use intel_harness::config::TtlConfig;
use intel_harness::sink::CollectingSink;
use intel_harness_core::events::EventKind;
use intel_harness_core::fingerprint::AnalysisRequest;
use intel_harness_core::models::{RunStatus, StageName};
use tokio_util::sync::CancellationToken;

fn steps(sink: &CollectingSink) -> Vec<String> {
    sink.events()
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::StatusUpdate { step, .. } => Some(step.clone()),
            _ => None,
        })
        .collect()
}

fn assert_single_terminal_last(sink: &CollectingSink) {
    let events = sink.events();
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "events: {:?}", sink.types());
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn second_identical_request_is_served_from_cache() {
    let h = harness(ScriptedCapability::new());
    let cancel = CancellationToken::new();

    let first_sink = CollectingSink::new();
    let first = h
        .orchestrator
        .run(&AnalysisRequest::new("Acme"), &first_sink, &cancel)
        .await
        .unwrap();
    assert_eq!(first.status, RunStatus::Succeeded);
    assert!(!first.cache_hit);
    assert_eq!(h.capability.calls(), StageName::ALL.to_vec());
    assert_single_terminal_last(&first_sink);
    assert!(steps(&first_sink).contains(&"cache_stored".to_string()));

    // Same logical request, different casing and whitespace.
    let second_sink = CollectingSink::new();
    let second = h
        .orchestrator
        .run(&AnalysisRequest::new("  ACME "), &second_sink, &cancel)
        .await
        .unwrap();
    assert_eq!(second.status, RunStatus::Succeeded);
    assert!(second.cache_hit);
    assert_eq!(h.capability.calls().len(), 3, "no stage may run twice");
    assert_eq!(second_sink.types(), vec!["status_update", "complete"]);
    assert_eq!(steps(&second_sink), vec!["cache_hit"]);
    assert_eq!(
        second.final_payload.unwrap().final_report,
        first.final_payload.unwrap().final_report
    );
}

#[tokio::test]
async fn stage_two_failure_keeps_stage_one_output() {
    let h = harness(ScriptedCapability::failing_on(StageName::Analyze));
    let sink = CollectingSink::new();

    let run = h
        .orchestrator
        .run(&AnalysisRequest::new("Acme"), &sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(!run.stage_output(StageName::Research).unwrap().is_empty());
    let analyze = run.stage(StageName::Analyze).unwrap();
    assert!(analyze.error.as_deref().unwrap().contains("rate limited"));
    assert!(analyze.output.is_empty());
    assert!(run.stage(StageName::Write).is_none());
    assert!(run.final_payload.is_none());
    assert_eq!(run.failure.as_ref().unwrap().stage, Some(StageName::Analyze));
    assert_eq!(h.capability.calls(), vec![StageName::Research, StageName::Analyze]);

    assert_single_terminal_last(&sink);
    match &sink.events().last().unwrap().kind {
        EventKind::Error {
            stage,
            message,
            partial_results,
        } => {
            assert_eq!(*stage, Some(StageName::Analyze));
            assert!(message.contains("analyze"));
            assert_eq!(partial_results.len(), 2);
        }
        other => panic!("expected error event, got {:?}", other),
    }

    // The failed run is not cached; a retry runs the pipeline again but
    // reuses the research that did succeed.
    let retry_sink = CollectingSink::new();
    h.orchestrator
        .run(&AnalysisRequest::new("Acme"), &retry_sink, &CancellationToken::new())
        .await
        .unwrap();
    assert!(steps(&retry_sink).contains(&"research_cache_hit".to_string()));
    assert_eq!(h.capability.calls().len(), 3);
}

#[tokio::test]
async fn unreachable_cache_degrades_to_uncached_runs() {
    let h = harness(ScriptedCapability::new());
    h.backend.set_offline(true);
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        let sink = CollectingSink::new();
        let run = h
            .orchestrator
            .run(&AnalysisRequest::new("Acme"), &sink, &cancel)
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(!steps(&sink).contains(&"cache_stored".to_string()));
        assert_single_terminal_last(&sink);
    }
    assert_eq!(h.capability.calls().len(), 6);
}

#[tokio::test]
async fn expired_entries_rerun_the_pipeline() {
    let h = harness_with(
        ScriptedCapability::new(),
        TtlConfig {
            analysis_secs: 2,
            research_secs: 2,
            ..TtlConfig::default()
        },
    );
    let cancel = CancellationToken::new();
    let sink = CollectingSink::new();

    h.orchestrator
        .run(&AnalysisRequest::new("Acme"), &sink, &cancel)
        .await
        .unwrap();
    h.clock.advance_secs(3);
    let run = h
        .orchestrator
        .run(&AnalysisRequest::new("Acme"), &sink, &cancel)
        .await
        .unwrap();

    assert!(!run.cache_hit);
    assert_eq!(h.capability.calls().len(), 6);
}

#[tokio::test]
async fn research_is_reused_across_modes() {
    let h = harness(ScriptedCapability::new());
    let cancel = CancellationToken::new();

    h.orchestrator
        .run(&AnalysisRequest::new("Acme").with_mode("simple"), &CollectingSink::new(), &cancel)
        .await
        .unwrap();

    let sink = CollectingSink::new();
    let deep = h
        .orchestrator
        .run(&AnalysisRequest::new("Acme").with_mode("deep"), &sink, &cancel)
        .await
        .unwrap();

    assert!(!deep.cache_hit);
    assert!(deep.stage(StageName::Research).unwrap().cached);
    assert_eq!(
        h.capability.calls(),
        vec![
            StageName::Research,
            StageName::Analyze,
            StageName::Write,
            StageName::Analyze,
            StageName::Write
        ]
    );
    assert!(steps(&sink).contains(&"research_cache_hit".to_string()));
    assert_eq!(deep.final_payload.unwrap().workflow, "multi_agent_deep");
}

#[tokio::test]
async fn report_carries_metrics_and_request_fields() {
    let h = harness(ScriptedCapability::new());
    let request = AnalysisRequest::new("Acme")
        .with_url("https://acme.test")
        .with_focus("pricing");

    let run = h
        .orchestrator
        .run(&request, &CollectingSink::new(), &CancellationToken::new())
        .await
        .unwrap();
    let report = run.final_payload.unwrap();

    assert_eq!(report.competitor, "Acme");
    assert_eq!(report.website.as_deref(), Some("https://acme.test"));
    assert_eq!(report.status, "success");
    assert_eq!(report.metrics.threat_level, Some(4.0));
    assert_eq!(report.metrics.weaknesses, Some(3.0));
    assert!(report.strategic_analysis.contains("## METRICS"));

    let prompts = h.capability.prompts();
    assert!(prompts[0].contains("Focus area: pricing"));
    assert!(prompts[1].contains("Research notes"));
    assert!(prompts[2].contains("## METRICS"));
}

#[tokio::test]
async fn every_event_is_stamped_with_mode() {
    let h = harness(ScriptedCapability::new());
    let sink = CollectingSink::new();
    h.orchestrator
        .run(&AnalysisRequest::new("Acme").with_mode("deep"), &sink, &CancellationToken::new())
        .await
        .unwrap();
    assert!(sink
        .events()
        .iter()
        .all(|e| e.analysis_mode == Some(intel_harness_core::profiles::AnalysisMode::Deep)));
    assert!(sink.types().contains(&"tool_call"));
}

#[tokio::test]
async fn cancelled_run_ends_with_one_error() {
    let h = harness(ScriptedCapability::new());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let sink = CollectingSink::new();

    let run = h
        .orchestrator
        .run(&AnalysisRequest::new("Acme"), &sink, &cancel)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.failure.unwrap().message, "run cancelled");
    assert!(h.capability.calls().is_empty());
    assert_single_terminal_last(&sink);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_an_in_flight_stage() {
    let h = harness(ScriptedCapability::new().with_delay(std::time::Duration::from_secs(60)));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let sink = CollectingSink::new();
    let run = h
        .orchestrator
        .run(&AnalysisRequest::new("Acme"), &sink, &cancel)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.failure.unwrap().stage, Some(StageName::Research));
    assert_eq!(h.capability.calls(), vec![StageName::Research]);
    assert_single_terminal_last(&sink);
}

#[tokio::test]
async fn invalid_request_is_rejected_before_any_work() {
    let h = harness(ScriptedCapability::new());
    let sink = CollectingSink::new();
    let err = h
        .orchestrator
        .run(&AnalysisRequest::new("   "), &sink, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_client_error());
    assert!(sink.events().is_empty());
    assert!(h.capability.calls().is_empty());
}

#[tokio::test]
async fn repeated_prompts_are_answered_from_the_response_tier() {
    let h = harness_with_response_cache(ScriptedCapability::new());
    let cancel = CancellationToken::new();
    let request = AnalysisRequest::new("Acme");

    let first = h
        .orchestrator
        .run(&request, &CollectingSink::new(), &cancel)
        .await
        .unwrap();
    assert_eq!(h.capability.calls().len(), 3);
    let stats = h.orchestrator.cache().stats().await;
    assert_eq!(stats.response_cached, 3);

    // Drop the report and research tiers; every prompt is still cached.
    let cache = h.orchestrator.cache();
    assert_eq!(cache.invalidate_prefix("analysis:*").await, 1);
    assert_eq!(cache.invalidate_prefix("research:*").await, 1);

    let sink = CollectingSink::new();
    let second = h.orchestrator.run(&request, &sink, &cancel).await.unwrap();
    assert_eq!(second.status, RunStatus::Succeeded);
    assert!(!second.cache_hit);
    assert_eq!(h.capability.calls().len(), 3, "replies must come from cache");
    assert_eq!(
        second.final_payload.unwrap().final_report,
        first.final_payload.unwrap().final_report
    );
    assert!(steps(&sink).contains(&"write_complete".to_string()));

    // A different mode changes the prompts, so those stages miss.
    h.orchestrator
        .run(&AnalysisRequest::new("Acme").with_mode("deep"), &CollectingSink::new(), &cancel)
        .await
        .unwrap();
    assert!(h.capability.calls().len() > 3);
}
