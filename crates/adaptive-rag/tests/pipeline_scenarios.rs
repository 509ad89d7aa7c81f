mod common;

use adaptive_rag::rag::coverage::COVERAGE_HINT;
use adaptive_rag::rag::retrieval_grader::GRADER_HINT;
use adaptive_rag::{
    CoveragePolicy, FallbackReason, PipelineConfig, QueryStrategy, ServiceError, Step, StepOutput, StepStatus,
    FALLBACK_DISCLAIMER,
};
use adaptive_rag::testing::{FlakyIndex, ScriptedLlm, UnavailableIndex};
use common::{guideline_index, harness, harness_with_index};

fn config() -> PipelineConfig {
    PipelineConfig::default()
}

#[tokio::test]
async fn off_topic_query_falls_back_without_retrieval() {
    let h = harness(ScriptedLlm::happy_path("unused"));
    let result = h
        .orchestrator
        .process("How do I bake a sourdough loaf?", &config())
        .await;

    assert!(!result.success);
    assert!(result.is_fallback);
    assert_eq!(result.fallback_reason, Some(FallbackReason::OutOfDomain));
    assert_eq!(result.trace.len(), 1);
    let entry = &result.trace.entries()[0];
    assert_eq!(entry.step, Step::RelevanceGate);
    assert_eq!(entry.status, StepStatus::Failed);
    assert_eq!(h.index.search_count(), 0);
    assert_eq!(h.llm.total_calls(), 0);
    assert!(result.answer.starts_with(FALLBACK_DISCLAIMER));
}

#[tokio::test]
async fn verified_answer_cites_retrieved_chunks() {
    let h = harness(ScriptedLlm::happy_path("penicillin resistance in bacteria"));
    let result = h
        .orchestrator
        .process("How does penicillin resistance happen?", &config())
        .await;

    assert!(result.success);
    assert!(!result.is_fallback);
    assert_eq!(result.fallback_reason, None);
    assert_eq!(result.cycles_used, 1);
    assert_eq!(result.source_chunk_ids.first().map(String::as_str), Some("who-aware#1"));
    assert_eq!(result.trace.max_cycle(), Some(0));
}

#[tokio::test]
async fn coverage_failures_exhaust_budget_then_fall_back() {
    let h = harness(ScriptedLlm::happy_path("sepsis antibiotic timing"));
    let result = h
        .orchestrator
        .process("antibiotic timing in sepsis", &config())
        .await;

    assert!(!result.success);
    assert!(result.is_fallback);
    assert!(result.source_chunk_ids.is_empty());
    assert_eq!(result.fallback_reason, Some(FallbackReason::Exhausted));
    assert_eq!(result.trace.count_step(Step::CoverageGuard), 2);
    assert!(result.trace.max_cycle().unwrap() <= config().max_retries);
    assert_eq!(h.llm.calls("analyze"), 2);
    assert!(h.llm.inputs("analyze")[1].ends_with(&format!("(Fix: {})", COVERAGE_HINT)));
    assert_eq!(h.llm.calls("fallback"), 1);
}

#[tokio::test]
async fn safety_failure_uses_raw_query_in_same_cycle() {
    let llm = ScriptedLlm::happy_path("amoxicillin dose for penicillin resistance");
    llm.push("safety", Ok(r#"{"risk_level": "medium"}"#.into()));
    let h = harness(llm);
    let result = h
        .orchestrator
        .process("penicillin resistance explained", &config())
        .await;

    assert!(result.success);
    assert_eq!(
        result.effective_query.as_deref(),
        Some("penicillin resistance explained")
    );
    assert_eq!(result.trace.max_cycle(), Some(0));
    assert_eq!(h.llm.calls("analyze"), 1);

    let strategy = result
        .trace
        .entries()
        .iter()
        .find_map(|e| match &e.output {
            StepOutput::Strategy { strategy, .. } => Some(strategy.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        strategy,
        QueryStrategy::OriginalKept {
            reason: "risk_level=medium".into()
        }
    );
}

#[tokio::test]
async fn hallucination_discards_answer_and_reanalyzes() {
    let llm = ScriptedLlm::happy_path("penicillin resistance");
    llm.push("generate", Ok("Take 500mg penicillin twice daily.".into()));
    llm.push("hallucination", Ok("YES".into()));
    let h = harness(llm);
    let result = h
        .orchestrator
        .process("penicillin resistance", &config())
        .await;

    assert!(result.success);
    assert_eq!(result.cycles_used, 2);
    assert!(!result.answer.contains("500mg"));
    assert_eq!(h.llm.calls("analyze"), 2);

    let cycle0: Vec<Step> = result.trace.cycle(0).map(|e| e.step).collect();
    assert_eq!(cycle0.last(), Some(&Step::HallucinationCheck));
    assert!(result.trace.cycle(1).any(|e| e.step == Step::QueryAnalysis));
}

#[tokio::test]
async fn final_check_failures_fall_back() {
    let llm = ScriptedLlm::happy_path("penicillin resistance");
    llm.push("final", Ok("NO".into()));
    llm.push("final", Ok("NO".into()));
    let h = harness(llm);
    let result = h
        .orchestrator
        .process("penicillin resistance", &config())
        .await;

    assert!(result.is_fallback);
    assert!(!result.success);
    assert_eq!(result.trace.count_step(Step::FinalCheck), 2);
}

#[tokio::test]
async fn identical_runs_are_deterministic() {
    let first = harness(ScriptedLlm::happy_path("penicillin resistance in bacteria"));
    let second = harness(ScriptedLlm::happy_path("penicillin resistance in bacteria"));

    let a = first.orchestrator.process("penicillin resistance", &config()).await;
    let b = second.orchestrator.process("penicillin resistance", &config()).await;

    assert_eq!(a.effective_query, b.effective_query);
    assert_eq!(a.source_chunk_ids, b.source_chunk_ids);
    assert_eq!(a.success, b.success);
    assert_ne!(a.request_id, b.request_id);
}

#[tokio::test]
async fn expand_retrieval_policy_widens_k() {
    let h = harness(ScriptedLlm::happy_path("sepsis"));
    let config = PipelineConfig {
        coverage_policy: CoveragePolicy::ExpandRetrieval { step: 1 },
        ..config()
    };
    let result = h.orchestrator.process("antibiotic use in sepsis", &config).await;

    assert!(result.is_fallback);
    assert_eq!(*h.index.searches.lock(), vec![3, 4]);
    assert_eq!(h.llm.calls("analyze"), 1);
}

#[tokio::test]
async fn unavailable_index_is_operational_fallback() {
    let h = harness_with_index(ScriptedLlm::happy_path("penicillin resistance"), Box::new(UnavailableIndex));
    let result = h
        .orchestrator
        .process("penicillin resistance", &config())
        .await;

    assert!(result.is_fallback);
    assert!(!result.success);
    let retrieval = result
        .trace
        .entries()
        .iter()
        .find(|e| e.step == Step::Retrieval)
        .unwrap();
    assert_eq!(retrieval.status, StepStatus::Failed);
    assert!(matches!(
        &retrieval.output,
        StepOutput::Error { kind, .. } if kind == "index_unavailable"
    ));
    assert_eq!(h.llm.calls("grade"), 0);
}

#[tokio::test]
async fn rate_limited_generation_still_returns_safe_answer() {
    let llm = ScriptedLlm::happy_path("penicillin resistance");
    llm.push("generate", Err(ServiceError::RateLimited { attempts: 3 }));
    llm.push("fallback", Err(ServiceError::RateLimited { attempts: 3 }));
    let h = harness(llm);
    let result = h
        .orchestrator
        .process("penicillin resistance", &config())
        .await;

    assert!(result.is_fallback);
    assert!(result.answer.starts_with(FALLBACK_DISCLAIMER));
    assert!(result.source_chunk_ids.is_empty());
}

#[tokio::test]
async fn concurrent_requests_share_the_knowledge_base() {
    let h = harness(ScriptedLlm::happy_path("penicillin resistance in bacteria"));

    let mut handles = Vec::new();
    for i in 0..8 {
        let orchestrator = h.orchestrator.clone();
        let query = if i % 2 == 0 {
            "penicillin resistance".to_string()
        } else {
            "How do I bake bread?".to_string()
        };
        handles.push(tokio::spawn(async move {
            let result = orchestrator.process(&query, &PipelineConfig::default()).await;
            (i, result)
        }));
    }

    for handle in handles {
        let (i, result) = handle.await.unwrap();
        assert_eq!(result.success, i % 2 == 0);
        assert_eq!(result.is_fallback, i % 2 == 1);
    }
    assert_eq!(h.index.search_count(), 4);
}

#[tokio::test]
async fn irrelevant_retrieval_reanalyzes_with_feedback() {
    let llm = ScriptedLlm::happy_path("penicillin resistance in bacteria");
    llm.push("grade", Ok("BAD".into()));
    let h = harness(llm);
    let result = h
        .orchestrator
        .process("penicillin resistance", &config())
        .await;

    assert!(result.success);
    assert_eq!(result.cycles_used, 2);
    assert_eq!(h.llm.calls("analyze"), 2);
    assert!(h.llm.inputs("analyze")[1].ends_with(&format!("(Fix: {})", GRADER_HINT)));

    let last = result.trace.cycle(0).last().unwrap();
    assert_eq!(last.step, Step::RetrievalGrading);
    assert_eq!(last.status, StepStatus::Failed);
    assert_eq!(h.llm.calls("generate"), 1);
}

#[tokio::test]
async fn retrieval_timeout_restarts_from_analysis() {
    let index = FlakyIndex::new(Box::new(guideline_index()), 1);
    let h = harness_with_index(
        ScriptedLlm::happy_path("penicillin resistance in bacteria"),
        Box::new(index),
    );
    let result = h
        .orchestrator
        .process("penicillin resistance", &config())
        .await;

    assert!(result.success);
    assert_eq!(result.cycles_used, 2);
    assert_eq!(h.index.search_count(), 2);
    assert_eq!(h.llm.calls("analyze"), 2);
    assert!(h.llm.inputs("analyze")[1].ends_with("(Fix: Previous attempt failed with timeout.)"));

    let failed = result.trace.cycle(0).last().unwrap();
    assert_eq!(failed.step, Step::Retrieval);
    assert_eq!(failed.status, StepStatus::Failed);
    assert!(result.trace.cycle(1).any(|e| e.step == Step::QueryAnalysis));
}

#[tokio::test]
async fn expanded_retrieval_records_skipped_analysis() {
    let h = harness(ScriptedLlm::happy_path("sepsis"));
    let config = PipelineConfig {
        coverage_policy: CoveragePolicy::ExpandRetrieval { step: 1 },
        ..config()
    };
    let result = h.orchestrator.process("antibiotic use in sepsis", &config).await;

    let skipped: Vec<Step> = result
        .trace
        .cycle(1)
        .filter(|e| e.status == StepStatus::Skipped)
        .map(|e| e.step)
        .collect();
    assert_eq!(
        skipped,
        vec![Step::QueryAnalysis, Step::SafetyValidation, Step::CentralControl]
    );
    assert!(result
        .trace
        .cycle(0)
        .all(|e| e.status != StepStatus::Skipped));
}
