//! Scenario harness over the crate's shared test doubles.

#![allow(dead_code)]

use std::sync::Arc;

use adaptive_rag::storage::{FlatIndex, VectorIndex};
use adaptive_rag::testing::{flat_index, knowledge_base, CountingIndex, KeywordEmbedder, ScriptedLlm};
use adaptive_rag::Orchestrator;

pub const GUIDELINE_CHUNKS: &[(&str, &str)] = &[
    ("who-aware#1", "Penicillin resistance in bacteria is mostly driven by beta-lactamase production."),
    ("nice-ng15#4", "Antibiotic stewardship programmes reduce antimicrobial resistance."),
    ("bnf#9", "Amoxicillin dose adjustment is needed in severe renal impairment."),
];

pub fn guideline_index() -> FlatIndex {
    flat_index(&KeywordEmbedder::medical(), GUIDELINE_CHUNKS)
}

pub struct Harness {
    pub index: Arc<CountingIndex>,
    pub llm: Arc<ScriptedLlm>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn harness(llm: ScriptedLlm) -> Harness {
    harness_with_index(llm, Box::new(guideline_index()))
}

pub fn harness_with_index(llm: ScriptedLlm, index: Box<dyn VectorIndex>) -> Harness {
    let index = Arc::new(CountingIndex::new(index));
    let llm = Arc::new(llm);
    let orchestrator = Arc::new(Orchestrator::new(knowledge_base(index.clone()), llm.clone()));
    Harness {
        index,
        llm,
        orchestrator,
    }
}
