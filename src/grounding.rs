//! Citation-constrained answer generation.
//!
//! [`GroundedGenerator`] wraps a [`Generator`] in a bounded state machine:
//!
//! ```text
//! Attempt(n) ──generate──▶ Validate(n) ──ok──▶ Done
//!     ▲                        │
//!     └──── Retry(n+1) ◀───────┤ no answer / no valid citations, n < max
//!                              └──────────────▶ Exhausted
//! ```
//!
//! Every attempt makes exactly one generator call. Attempts are sequential
//! and there is no backoff between them. A transport failure from the
//! generator aborts the chain immediately as an upstream error; only
//! grounding failures are retried here.
//!
//! Citations returned by the model are checked against the hits it was
//! shown. References to unknown `(doc_id, chunk_id)` pairs, or whose
//! checksum is missing or disagrees with the hit, are dropped. An answer
//! survives only if at least one citation remains.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{RagError, Result, Stage, StageContext};
use crate::generate::{Generator, SamplingConfig};
use crate::models::{ChunkHit, Citation, GeneratedAnswer};

pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Which [`RetryStrategy`] to build from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyKind {
    /// Re-send the identical prompt with identical sampling.
    #[default]
    Fixed,
    /// Tell the model why the last attempt was rejected and cool the temperature.
    Escalating,
}

impl RetryStrategyKind {
    pub fn build(self) -> Box<dyn RetryStrategy> {
        match self {
            RetryStrategyKind::Fixed => Box::new(FixedRetry),
            RetryStrategyKind::Escalating => Box::new(EscalatingRetry::default()),
        }
    }
}

/// What to do once every attempt has produced an answer without citations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationFallback {
    /// Fail as ungroundable.
    #[default]
    Reject,
    /// Attribute the last non-empty answer to every supplied hit.
    CiteAllHits,
}

/// Why a single attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The completion held no JSON object.
    Unparseable,
    EmptyAnswer,
    NoCitations,
    /// Citations were given but none matched a supplied hit.
    NoValidCitations,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AttemptFailure::Unparseable => "response was not a JSON object",
            AttemptFailure::EmptyAnswer => "response had no answer text",
            AttemptFailure::NoCitations => "response cited no chunks",
            AttemptFailure::NoValidCitations => "no cited chunk matched the supplied context",
        };
        f.write_str(msg)
    }
}

/// Decides the prompt and sampling for each attempt.
///
/// `attempt` is zero-based. `last_failure` is `None` on the first attempt.
pub trait RetryStrategy: Send + Sync {
    fn prepare(
        &self,
        attempt: u32,
        base_prompt: &str,
        base: SamplingConfig,
        last_failure: Option<AttemptFailure>,
    ) -> (String, SamplingConfig);
}

pub struct FixedRetry;

impl RetryStrategy for FixedRetry {
    fn prepare(
        &self,
        _attempt: u32,
        base_prompt: &str,
        base: SamplingConfig,
        _last_failure: Option<AttemptFailure>,
    ) -> (String, SamplingConfig) {
        (base_prompt.to_string(), base)
    }
}

pub struct EscalatingRetry {
    /// Temperature subtracted per retry, floored at zero.
    pub temperature_step: f32,
}

impl Default for EscalatingRetry {
    fn default() -> Self {
        Self {
            temperature_step: 0.15,
        }
    }
}

impl RetryStrategy for EscalatingRetry {
    fn prepare(
        &self,
        attempt: u32,
        base_prompt: &str,
        base: SamplingConfig,
        last_failure: Option<AttemptFailure>,
    ) -> (String, SamplingConfig) {
        let Some(failure) = last_failure else {
            return (base_prompt.to_string(), base);
        };
        let prompt = format!(
            "{}\n\nYour previous reply was rejected: {}. Reply again with only the JSON object, \
             and list in \"cited_chunks\" at least one chunk copied exactly from the reference material.",
            base_prompt, failure
        );
        let sampling = SamplingConfig {
            temperature: (base.temperature - self.temperature_step * attempt as f32).max(0.0),
            ..base
        };
        (prompt, sampling)
    }
}

// ============ Prompt ============

/// One section per hit, numbered from 1.
pub fn render_context(hits: &[ChunkHit]) -> String {
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "[Chunk {}]\ndoc_id: {}\npage: {}\npath: {}\nchunk_id: {}\nchecksum: {}\ncontent:\n{}\n\n---\n",
            i + 1,
            hit.doc_id,
            hit.page,
            hit.path,
            hit.chunk_id,
            hit.checksum,
            hit.context_text()
        ));
    }
    out
}

pub fn build_prompt(query: &str, hits: &[ChunkHit]) -> String {
    format!(
        r#"You are an assistant that answers strictly from the registered documents below.
Base every statement on the reference material. If the material is insufficient, say that the answer is unknown; do not fill gaps from general knowledge.

Respond with a single JSON object and nothing else:
{{
  "answer": "the answer text",
  "cited_chunks": [
    {{"doc_id": "...", "page": 1, "path": "...", "chunk_id": "...", "checksum": "..."}}
  ]
}}

"cited_chunks" must list only chunks you actually used, with fields copied exactly from the reference material.

Question: {query}

Reference material:
{context}
Answer the question using the reference material above, citing your sources."#,
        query = query,
        context = render_context(hits)
    )
}

// ============ Response parsing ============

/// A citation as the model wrote it, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CitedChunk {
    pub doc_id: String,
    pub chunk_id: String,
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub answer: String,
    pub cited: Vec<CitedChunk>,
}

/// Pull the first JSON object out of a completion.
///
/// Tolerates Markdown code fences and prose around the object, including
/// trailing prose that itself contains braces. Accepts `cited_chunks` or
/// `citations` as the list key. Returns `None` when no object can be
/// recovered.
pub fn parse_response(raw: &str) -> Option<ParsedResponse> {
    let value = first_json_object(raw)?;
    let obj = value.as_object()?;

    let answer = obj
        .get("answer")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let cited = obj
        .get("cited_chunks")
        .or_else(|| obj.get("citations"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(cited_chunk).collect())
        .unwrap_or_default();

    Some(ParsedResponse { answer, cited })
}

/// The first `{` that opens a complete JSON object; whatever follows the
/// object is ignored.
fn first_json_object(raw: &str) -> Option<Value> {
    raw.match_indices('{').find_map(|(start, _)| {
        match serde_json::Deserializer::from_str(&raw[start..])
            .into_iter::<Value>()
            .next()
        {
            Some(Ok(value @ Value::Object(_))) => Some(value),
            _ => None,
        }
    })
}

fn cited_chunk(item: &Value) -> Option<CitedChunk> {
    let obj = item.as_object()?;
    let text = |key: &str| match obj.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    Some(CitedChunk {
        doc_id: text("doc_id")?,
        chunk_id: text("chunk_id")?,
        checksum: text("checksum"),
    })
}

/// Keep citations that name a supplied hit, in citation order, deduplicated.
///
/// The checksum must equal the hit's. Page and path are taken from the
/// hit, not from the model.
pub fn validate_citations(cited: &[CitedChunk], hits: &[ChunkHit]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for c in cited {
        let Some(hit) = hits
            .iter()
            .find(|h| h.doc_id == c.doc_id && h.chunk_id == c.chunk_id)
        else {
            debug!(doc_id = %c.doc_id, chunk_id = %c.chunk_id, "dropping citation to unknown chunk");
            continue;
        };
        if c.checksum.as_deref() != Some(hit.checksum.as_str()) {
            debug!(chunk_id = %c.chunk_id, "dropping citation with missing or mismatched checksum");
            continue;
        }
        if seen.insert((hit.doc_id.as_str(), hit.chunk_id.as_str())) {
            out.push(Citation::from(hit));
        }
    }
    out
}

// ============ State machine ============

enum State {
    Attempt {
        n: u32,
        last_failure: Option<AttemptFailure>,
    },
    Validate {
        n: u32,
        raw: String,
    },
    Done(GeneratedAnswer),
    Exhausted {
        attempts: u32,
        failure: AttemptFailure,
    },
}

/// Generates answers whose citations are guaranteed to reference supplied hits.
pub struct GroundedGenerator {
    generator: Arc<dyn Generator>,
    sampling: SamplingConfig,
    max_retries: u32,
    strategy: Box<dyn RetryStrategy>,
    fallback: CitationFallback,
}

impl GroundedGenerator {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            sampling: SamplingConfig::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            strategy: Box::new(FixedRetry),
            fallback: CitationFallback::Reject,
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_strategy(mut self, strategy: Box<dyn RetryStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_fallback(mut self, fallback: CitationFallback) -> Self {
        self.fallback = fallback;
        self
    }

    fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Answer `query` from `hits` with at least one validated citation.
    ///
    /// Makes at most `max_retries + 1` generator calls. Empty `hits` fail
    /// with [`RagError::NoRelevantContent`] without calling the generator.
    pub async fn generate(&self, query: &str, hits: &[ChunkHit]) -> Result<GeneratedAnswer> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidInput("query cannot be empty".into()));
        }
        if hits.is_empty() {
            return Err(RagError::NoRelevantContent);
        }

        let base_prompt = build_prompt(query, hits);
        let max_attempts = self.max_attempts();
        // Last non-empty answer seen, for the cite-all fallback.
        let mut last_answer: Option<String> = None;

        let mut state = State::Attempt {
            n: 0,
            last_failure: None,
        };
        loop {
            state = match state {
                State::Attempt { n, last_failure } => {
                    let (prompt, sampling) =
                        self.strategy
                            .prepare(n, &base_prompt, self.sampling, last_failure);
                    debug!(
                        attempt = n + 1,
                        max_attempts,
                        generator = self.generator.name(),
                        model = self.generator.model(),
                        "requesting grounded answer"
                    );
                    let raw = self
                        .generator
                        .generate(&prompt, &sampling)
                        .await
                        .stage(Stage::Generate)?;
                    State::Validate { n, raw }
                }
                State::Validate { n, raw } => match self.validate(&raw, hits) {
                    Ok(answer) => State::Done(answer),
                    Err((failure, answer_text)) => {
                        if answer_text.is_some() {
                            last_answer = answer_text;
                        }
                        warn!(attempt = n + 1, max_attempts, %failure, "answer rejected");
                        if n + 1 < max_attempts {
                            State::Attempt {
                                n: n + 1,
                                last_failure: Some(failure),
                            }
                        } else {
                            State::Exhausted {
                                attempts: n + 1,
                                failure,
                            }
                        }
                    }
                },
                State::Done(answer) => {
                    info!(citations = answer.citations.len(), "grounded answer ready");
                    return Ok(answer);
                }
                State::Exhausted { attempts, failure } => {
                    if let (CitationFallback::CiteAllHits, Some(answer)) =
                        (self.fallback, last_answer.take())
                    {
                        warn!(attempts, "citing every supplied hit as a last resort");
                        return Ok(GeneratedAnswer {
                            answer,
                            citations: cite_all(hits),
                        });
                    }
                    return Err(RagError::Ungroundable {
                        attempts,
                        reason: failure.to_string(),
                    });
                }
            };
        }
    }

    /// Accept a completion, or say why not. On rejection, also returns the
    /// answer text when one was present.
    fn validate(
        &self,
        raw: &str,
        hits: &[ChunkHit],
    ) -> std::result::Result<GeneratedAnswer, (AttemptFailure, Option<String>)> {
        let parsed = parse_response(raw).ok_or((AttemptFailure::Unparseable, None))?;
        if parsed.answer.is_empty() {
            return Err((AttemptFailure::EmptyAnswer, None));
        }
        if parsed.cited.is_empty() {
            return Err((AttemptFailure::NoCitations, Some(parsed.answer)));
        }
        let citations = validate_citations(&parsed.cited, hits);
        if citations.is_empty() {
            return Err((AttemptFailure::NoValidCitations, Some(parsed.answer)));
        }
        Ok(GeneratedAnswer {
            answer: parsed.answer,
            citations,
        })
    }
}

fn cite_all(hits: &[ChunkHit]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter(|h| seen.insert((h.doc_id.as_str(), h.chunk_id.as_str())))
        .map(Citation::from)
        .collect()
}
