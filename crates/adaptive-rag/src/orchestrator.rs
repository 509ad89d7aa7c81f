//! Bounded validate-and-retry loop around the pipeline stages.
//!
//! One `process` call owns one `QueryContext` and one trace. The relevance
//! gate runs once on the raw query; each cycle then runs
//! analyze, safety, control, retrieve, coverage, grade, generate,
//! hallucination and final check. Retryable failures start a new cycle
//! (from analysis, or from retrieval under the expand-retrieval coverage
//! policy) until the cycle budget is spent, after which the request falls back.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;
use uuid::Uuid;

use crate::config::{CoveragePolicy, PipelineConfig};
use crate::error::{with_timeout, ServiceError};
use crate::knowledge_base::KnowledgeBase;
use crate::llm::CompletionService;
use crate::rag::control::is_identical_rewrite;
use crate::rag::{
    decide_strategy, CoverageGuard, FailureClass, FallbackAgent, FallbackReason, FinalChecker,
    Generator, HallucinationChecker, QueryAnalyzer, RelevanceGate, RetrievalGrader, Retriever,
    SafetyValidator, StageInput, StageOutcome, Validator,
};
use crate::trace::{PipelineTrace, Step, StepOutput, StepStatus};
use crate::types::{GateVerdict, GeneratedAnswer, PipelineResult, QueryContext, RetrievedChunk};

/// Where the next cycle starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    Analyze,
    Retrieve { k: usize },
}

enum CycleOutcome {
    Verified(GeneratedAnswer),
    Retry { hint: String, resume: Resume },
    Terminal(FallbackReason),
}

/// Mutable state of one request. Never shared.
struct RequestRun {
    request_id: Uuid,
    ctx: QueryContext,
    trace: PipelineTrace,
    logs: Vec<String>,
    cycles_run: u32,
}

impl RequestRun {
    fn new(raw_query: &str) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            ctx: QueryContext::new(raw_query),
            trace: PipelineTrace::new(),
            logs: Vec::new(),
            cycles_run: 0,
        }
    }

    fn cycle(&self) -> u32 {
        self.ctx.cycle_count
    }

    fn record(&mut self, step: Step, status: StepStatus, output: StepOutput) {
        let cycle = self.cycle();
        self.trace.record(cycle, step, status, output);
    }

    fn record_skipped(&mut self, step: Step, reason: &str) {
        self.record(
            step,
            StepStatus::Skipped,
            StepOutput::Skipped {
                reason: reason.to_string(),
            },
        );
    }

    fn record_error(&mut self, step: Step, error: &ServiceError) {
        self.record(
            step,
            StepStatus::Failed,
            StepOutput::Error {
                kind: error.kind().to_string(),
                message: error.to_string(),
            },
        );
    }

    fn log(&mut self, line: String) {
        tracing::info!("{}", line);
        self.logs.push(line);
    }
}

pub struct Orchestrator {
    kb: Arc<KnowledgeBase>,
    analyzer: QueryAnalyzer,
    safety: SafetyValidator,
    retriever: Retriever,
    grader: RetrievalGrader,
    generator: Generator,
    hallucination: HallucinationChecker,
    final_check: FinalChecker,
    fallback: FallbackAgent,
}

impl Orchestrator {
    pub fn new(kb: Arc<KnowledgeBase>, llm: Arc<dyn CompletionService>) -> Self {
        tracing::info!(llm = %llm.name(), "Creating pipeline orchestrator");
        Self {
            analyzer: QueryAnalyzer::new(llm.clone()),
            safety: SafetyValidator::new(llm.clone()),
            retriever: Retriever::new(kb.clone()),
            grader: RetrievalGrader::new(llm.clone()),
            generator: Generator::new(llm.clone()),
            hallucination: HallucinationChecker::new(llm.clone()),
            final_check: FinalChecker::new(llm.clone()),
            fallback: FallbackAgent::new(llm),
            kb,
        }
    }

    /// Answer one query. Never fails: every unrecoverable path ends in a
    /// fallback answer with `success = false`.
    pub async fn process(&self, raw_query: &str, config: &PipelineConfig) -> PipelineResult {
        let run = RequestRun::new(raw_query);
        let span = tracing::info_span!("rag_request", request_id = %run.request_id);
        self.drive(run, config).instrument(span).await
    }

    async fn drive(&self, mut run: RequestRun, config: &PipelineConfig) -> PipelineResult {
        let timeout = config.call_timeout();
        let budget = config.cycle_budget();

        let relevance = RelevanceGate::new(self.kb.clone(), config.relevance_threshold);
        let input_ctx = run.ctx.clone();
        let (outcome, verdict) = self
            .gate(&relevance, &StageInput::query_only(&input_ctx), &mut run, timeout)
            .await;
        match outcome {
            StageOutcome::Proceed => {
                run.log(format!("Relevance gate passed (score {:.2})", verdict.score));
            }
            StageOutcome::Terminal(reason) => {
                run.log(format!(
                    "Relevance gate stopped request (score {:.2}): {}",
                    verdict.score, reason
                ));
                return self.fall_back(run, reason, timeout).await;
            }
            // The relevance gate is terminal; it never asks for a retry.
            StageOutcome::Retry(_) => {
                return self.fall_back(run, FallbackReason::OutOfDomain, timeout).await;
            }
        }

        let mut resume = Resume::Analyze;
        let mut feedback: Option<String> = None;
        loop {
            run.cycles_run += 1;
            match self
                .run_cycle(&mut run, config, resume, feedback.as_deref(), timeout)
                .await
            {
                CycleOutcome::Verified(answer) => return self.succeed(run, answer),
                CycleOutcome::Terminal(reason) => {
                    run.log(format!("Cycle {}: terminal failure ({})", run.cycle(), reason));
                    return self.fall_back(run, reason, timeout).await;
                }
                CycleOutcome::Retry { hint, resume: next } => {
                    run.log(format!("Cycle {}: retrying ({})", run.cycle(), hint));
                    run.ctx.cycle_count += 1;
                    if run.ctx.cycle_count >= budget {
                        run.log(format!("Retry budget of {} cycles exhausted", budget));
                        return self.fall_back(run, FallbackReason::Exhausted, timeout).await;
                    }
                    feedback = Some(hint);
                    resume = next;
                }
            }
        }
    }

    async fn run_cycle(
        &self,
        run: &mut RequestRun,
        config: &PipelineConfig,
        resume: Resume,
        feedback: Option<&str>,
        timeout: Duration,
    ) -> CycleOutcome {
        let k = match resume {
            Resume::Retrieve { k } => {
                for step in [Step::QueryAnalysis, Step::SafetyValidation, Step::CentralControl] {
                    run.record_skipped(step, "retrieval_expanded");
                }
                k
            }
            Resume::Analyze => {
                if let Some(outcome) = self.analyze_and_choose(run, feedback, timeout).await {
                    return outcome;
                }
                config.top_k
            }
        };

        // Retrieve
        let query = run.ctx.effective_query().to_string();
        let retrieval = with_timeout("retrieval", timeout, self.retriever.retrieve(&query, k)).await;
        let chunks: Vec<RetrievedChunk> = match retrieval {
            Ok(chunks) => {
                run.record(
                    Step::Retrieval,
                    StepStatus::Completed,
                    StepOutput::Retrieval {
                        k,
                        sources: chunks.iter().map(|c| c.source_id.clone()).collect(),
                        top_score: chunks.first().map(|c| c.similarity_score),
                    },
                );
                chunks
            }
            Err(e) => {
                run.record_error(Step::Retrieval, &e);
                return retry_or_terminal(
                    StageOutcome::from_error(FailureClass::Retryable, &e),
                    Resume::Analyze,
                );
            }
        };

        // Coverage guard
        let coverage =
            CoverageGuard::new(self.kb.clone(), config.coverage_threshold, config.coverage_chars);
        let ctx = run.ctx.clone();
        let (outcome, verdict) = self
            .gate(&coverage, &StageInput::with_chunks(&ctx, &chunks), run, timeout)
            .await;
        if outcome != StageOutcome::Proceed {
            run.log(format!(
                "Cycle {}: coverage guard failed (max score {:.2})",
                run.cycle(),
                verdict.score
            ));
            let resume = match config.coverage_policy {
                CoveragePolicy::RestartCycle => Resume::Analyze,
                CoveragePolicy::ExpandRetrieval { step } => Resume::Retrieve { k: k + step },
            };
            return retry_or_terminal(outcome, resume);
        }

        // Retrieval grader
        let (outcome, _) = self
            .gate(&self.grader, &StageInput::with_chunks(&ctx, &chunks), run, timeout)
            .await;
        if outcome != StageOutcome::Proceed {
            return retry_or_terminal(outcome, Resume::Analyze);
        }

        // Generate
        let answer = match with_timeout("generation", timeout, self.generator.generate(&ctx, &chunks)).await {
            Ok(answer) => {
                run.record(
                    Step::AnswerGeneration,
                    StepStatus::Completed,
                    StepOutput::Answer {
                        tone: answer.tone_applied,
                        length: answer.text.len(),
                        source_count: answer.source_chunk_ids.len(),
                    },
                );
                answer
            }
            Err(e) => {
                run.record_error(Step::AnswerGeneration, &e);
                return retry_or_terminal(
                    StageOutcome::from_error(FailureClass::Retryable, &e),
                    Resume::Analyze,
                );
            }
        };

        // The answer lives only in this cycle; both checks must pass here.
        let checked = StageInput::with_answer(&ctx, &chunks, &answer);
        let checkers: [&dyn Validator; 2] = [&self.hallucination, &self.final_check];
        for checker in checkers {
            let (outcome, _) = self.gate(checker, &checked, run, timeout).await;
            if outcome != StageOutcome::Proceed {
                return retry_or_terminal(outcome, Resume::Analyze);
            }
        }

        CycleOutcome::Verified(answer)
    }

    /// Analyze, safety-check the rewrite and pick the effective query.
    /// Returns `Some` when the cycle must stop here.
    async fn analyze_and_choose(
        &self,
        run: &mut RequestRun,
        feedback: Option<&str>,
        timeout: Duration,
    ) -> Option<CycleOutcome> {
        let raw = run.ctx.raw_query().to_string();
        let analysis = match with_timeout("analysis", timeout, self.analyzer.analyze(&raw, feedback)).await {
            Ok(analysis) => analysis,
            Err(e) => {
                run.record_error(Step::QueryAnalysis, &e);
                let outcome = match e {
                    // Unparseable analysis fails closed like an off-topic query.
                    ServiceError::Malformed(_) => CycleOutcome::Terminal(FallbackReason::AnalysisRejected),
                    _ => retry_or_terminal(
                        StageOutcome::from_error(FailureClass::Retryable, &e),
                        Resume::Analyze,
                    ),
                };
                return Some(outcome);
            }
        };

        run.ctx.apply_analysis(&analysis);
        run.record(
            Step::QueryAnalysis,
            StepStatus::Completed,
            StepOutput::Analysis(analysis.clone()),
        );

        // Safety failures are absorbed: the control node keeps the raw query.
        let safety = if is_identical_rewrite(&raw, &analysis.rewritten_query) {
            let verdict = GateVerdict::pass(1.0, "identical");
            run.record(
                Step::SafetyValidation,
                StepStatus::Skipped,
                StepOutput::Verdict(verdict.clone()),
            );
            verdict
        } else {
            let ctx = run.ctx.clone();
            let (_, verdict) = self
                .gate(&self.safety, &StageInput::query_only(&ctx), run, timeout)
                .await;
            verdict
        };

        let strategy = decide_strategy(&raw, &analysis.rewritten_query, &safety);
        run.ctx.set_strategy(strategy.clone());
        let effective_query = run.ctx.effective_query().to_string();
        run.log(format!(
            "Cycle {}: category '{}', effective query '{}'",
            run.cycle(),
            analysis.category,
            effective_query
        ));
        run.record(
            Step::CentralControl,
            StepStatus::Completed,
            StepOutput::Strategy {
                strategy,
                effective_query,
            },
        );
        None
    }

    /// Run one validator with a timeout, record it, and classify the result.
    async fn gate(
        &self,
        validator: &dyn Validator,
        input: &StageInput<'_>,
        run: &mut RequestRun,
        timeout: Duration,
    ) -> (StageOutcome, GateVerdict) {
        let step = validator.step();
        match with_timeout(step.name(), timeout, validator.evaluate(input)).await {
            Ok(verdict) => {
                let status = if verdict.passed {
                    StepStatus::Completed
                } else {
                    StepStatus::Failed
                };
                if !verdict.passed {
                    tracing::warn!(step = step.name(), reason = %verdict.reason, score = verdict.score, "Validation failed");
                }
                run.record(step, status, StepOutput::Verdict(verdict.clone()));
                let outcome = StageOutcome::from_verdict(
                    validator.failure_class(),
                    validator.retry_hint(),
                    &verdict,
                );
                (outcome, verdict)
            }
            Err(e) => {
                tracing::warn!(step = step.name(), error = %e, "Validator call failed");
                run.record_error(step, &e);
                let outcome = StageOutcome::from_error(validator.failure_class(), &e);
                (outcome, GateVerdict::fail(0.0, e.kind()))
            }
        }
    }

    fn succeed(&self, mut run: RequestRun, answer: GeneratedAnswer) -> PipelineResult {
        run.log(format!(
            "Cycle {}: answer verified with {} sources",
            run.cycle(),
            answer.source_chunk_ids.len()
        ));
        PipelineResult {
            request_id: run.request_id,
            category: run.ctx.category_or_default().to_string(),
            tone: answer.tone_applied,
            is_fallback: false,
            fallback_reason: None,
            success: true,
            effective_query: Some(run.ctx.effective_query().to_string()),
            source_chunk_ids: answer.source_chunk_ids,
            cycles_used: run.cycles_run,
            answer: answer.text,
            trace: run.trace,
            logs: run.logs,
        }
    }

    async fn fall_back(
        &self,
        mut run: RequestRun,
        reason: FallbackReason,
        timeout: Duration,
    ) -> PipelineResult {
        let tone = run.ctx.tone_or_default();
        let category = run.ctx.category_or_default().to_string();
        let answer = self
            .fallback
            .respond(run.ctx.raw_query(), &category, tone, &reason, timeout)
            .await;
        run.log(format!("Fallback answer returned ({})", reason));

        PipelineResult {
            request_id: run.request_id,
            answer: answer.text,
            category,
            tone: answer.tone_applied,
            is_fallback: true,
            fallback_reason: Some(reason),
            success: false,
            effective_query: run
                .ctx
                .strategy()
                .map(|_| run.ctx.effective_query().to_string()),
            source_chunk_ids: answer.source_chunk_ids,
            cycles_used: run.cycles_run,
            trace: run.trace,
            logs: run.logs,
        }
    }
}

fn retry_or_terminal(outcome: StageOutcome, resume: Resume) -> CycleOutcome {
    match outcome {
        StageOutcome::Retry(hint) => CycleOutcome::Retry { hint, resume },
        StageOutcome::Terminal(reason) => CycleOutcome::Terminal(reason),
        // Callers only get here after a non-proceed outcome.
        StageOutcome::Proceed => CycleOutcome::Terminal(FallbackReason::Operational(
            "unexpected_proceed".to_string(),
        )),
    }
}
