// src/interpret.rs

use crate::config::GenerationConfig;
use crate::context::{self, ArchitectureContext, EvolutionContext, PatternContext};
use crate::error::Result;
use crate::generation::{GenerationRequest, TextGenerator};
use regex::Regex;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};

pub const ANALYSIS_ERROR: &str = "Analysis Error";

const EVOLUTION_ANSWER_PREVIEW: usize = 500;
const ERROR_PREVIEW: usize = 200;

// ─── result shapes ──────────────────────────────────────────────────────────

// Model output is trusted once it parses: field values are coerced rather
// than rejected, so one odd field never discards the rest of an answer.

fn text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Value::deserialize(deserializer).map(text)
}

fn lenient_optional<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        other => Some(text(other)),
    })
}

/// Arrays map element-wise; a lone scalar becomes a one-element list.
fn lenient_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().map(text).collect(),
        other => vec![text(other)],
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionResult {
    #[serde(default, deserialize_with = "lenient_string")]
    pub answer: String,
    /// Short hashes the answer draws on
    #[serde(default, deserialize_with = "lenient_list")]
    pub relevant_commits: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub key_insights: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub patterns: Vec<String>,
    #[serde(
        default,
        deserialize_with = "lenient_optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub business_context: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    High,
    #[default]
    Medium,
    Low,
}

// Case is ignored; anything outside the vocabulary reads as the default.
impl<'de> Deserialize<'de> for Impact {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = text(Value::deserialize(deserializer)?);
        Ok(match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            _ => {
                tracing::debug!(impact = %raw, "unrecognised impact, using medium");
                Self::default()
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternResult {
    #[serde(default, deserialize_with = "lenient_string")]
    pub pattern: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    /// Commit hash or date
    #[serde(default, deserialize_with = "lenient_string")]
    pub introduced_at: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub evolution: Vec<String>,
    #[serde(default)]
    pub impact: Impact,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchitecturalDecision {
    #[serde(default, deserialize_with = "lenient_string")]
    pub decision: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub rationale: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub commit: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub impact: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    Parsed,
    Fallback,
}

/// A typed result and whether it came from the model or the fallback
#[derive(Debug, Clone, PartialEq)]
pub struct Interpreted<T> {
    pub result: T,
    pub outcome: ParseOutcome,
}

// ─── parsing ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Object,
    Array,
}

impl JsonShape {
    fn pattern(&self) -> &'static Regex {
        static OBJECT: OnceLock<Regex> = OnceLock::new();
        static ARRAY: OnceLock<Regex> = OnceLock::new();
        match self {
            Self::Object => OBJECT.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid regex")),
            Self::Array => ARRAY.get_or_init(|| Regex::new(r"(?s)\[.*\]").expect("valid regex")),
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// Greedy match from the first opening bracket to the last closing one.
///
/// Falls back to the whole text when there is no match.
pub fn extract_json(raw: &str, shape: JsonShape) -> &str {
    shape.pattern().find(raw).map_or(raw, |m| m.as_str())
}

/// Parses the extracted span as JSON whose top level is `shape`.
fn parse_value(raw: &str, shape: JsonShape) -> std::result::Result<Value, String> {
    let value: Value = serde_json::from_str(extract_json(raw, shape)).map_err(|e| e.to_string())?;
    if shape.accepts(&value) {
        Ok(value)
    } else {
        Err(format!("expected a JSON {shape:?}"))
    }
}

/// Wraps array elements that are not objects as `{primary: element}`.
fn promote_scalars(value: Value, primary: &str) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(_) => item,
                    other => {
                        let mut fields = Map::new();
                        fields.insert(primary.to_string(), other);
                        Value::Object(fields)
                    }
                })
                .collect(),
        ),
        other => other,
    }
}

fn interpret<T, N, F>(raw: &str, shape: JsonShape, normalize: N, fallback: F) -> Interpreted<T>
where
    T: DeserializeOwned,
    N: FnOnce(Value) -> Value,
    F: FnOnce(&str) -> T,
{
    let parsed = parse_value(raw, shape)
        .and_then(|value| serde_json::from_value::<T>(normalize(value)).map_err(|e| e.to_string()));
    match parsed {
        Ok(result) => Interpreted {
            result,
            outcome: ParseOutcome::Parsed,
        },
        Err(reason) => {
            tracing::warn!(%reason, chars = raw.len(), "unparseable generation output, using fallback");
            Interpreted {
                result: fallback(raw),
                outcome: ParseOutcome::Fallback,
            }
        }
    }
}

/// Parses `raw` as `T`, or builds a fallback from it. Never fails.
///
/// Only unparseable JSON or the wrong top-level kind triggers the fallback.
pub fn parse_or_fallback<T, F>(raw: &str, shape: JsonShape, fallback: F) -> Interpreted<T>
where
    T: DeserializeOwned,
    F: FnOnce(&str) -> T,
{
    interpret(raw, shape, |value| value, fallback)
}

fn preview(raw: &str, limit: usize) -> (String, bool) {
    let mut chars = raw.chars();
    let head: String = chars.by_ref().take(limit).collect();
    (head, chars.next().is_some())
}

pub fn evolution_fallback(raw: &str) -> EvolutionResult {
    let (head, truncated) = preview(raw, EVOLUTION_ANSWER_PREVIEW);
    EvolutionResult {
        answer: if truncated { format!("{head}...") } else { head },
        relevant_commits: Vec::new(),
        key_insights: vec!["Unable to parse structured response".to_string()],
        patterns: vec!["Raw response provided above".to_string()],
        business_context: Some(
            "Try asking a more specific question about the codebase evolution.".to_string(),
        ),
    }
}

pub fn pattern_fallback(raw: &str) -> Vec<PatternResult> {
    let (head, _) = preview(raw, ERROR_PREVIEW);
    vec![PatternResult {
        pattern: ANALYSIS_ERROR.to_string(),
        description: "Unable to parse pattern analysis response".to_string(),
        introduced_at: "unknown".to_string(),
        evolution: vec![head],
        impact: Impact::Low,
        reasoning: "The response could not be read as structured JSON".to_string(),
    }]
}

pub fn architecture_fallback(raw: &str) -> Vec<ArchitecturalDecision> {
    let (head, _) = preview(raw, ERROR_PREVIEW);
    vec![ArchitecturalDecision {
        decision: ANALYSIS_ERROR.to_string(),
        rationale: "Unable to parse architectural analysis response".to_string(),
        commit: "unknown".to_string(),
        impact: head,
        alternatives: vec!["retry".to_string(), "verify history exists".to_string()],
    }]
}

pub fn parse_evolution(raw: &str) -> Interpreted<EvolutionResult> {
    parse_or_fallback(raw, JsonShape::Object, evolution_fallback)
}

pub fn parse_patterns(raw: &str) -> Interpreted<Vec<PatternResult>> {
    interpret(
        raw,
        JsonShape::Array,
        |value| promote_scalars(value, "pattern"),
        pattern_fallback,
    )
}

pub fn parse_architecture(raw: &str) -> Interpreted<Vec<ArchitecturalDecision>> {
    interpret(
        raw,
        JsonShape::Array,
        |value| promote_scalars(value, "decision"),
        architecture_fallback,
    )
}

// ─── prompts ────────────────────────────────────────────────────────────────

pub fn evolution_prompt(context_json: &str) -> String {
    format!(
        r#"You are a senior software historian analysing how a codebase evolved.

Answer the question in the context below using the commit history and file snapshot it contains.
Cite commits by their short hash.

=== CONTEXT ===
{context_json}

=== RESPONSE FORMAT ===
Return ONLY a single JSON object with exactly these fields:
{{
  "answer": "narrative answer to the question",
  "relevantCommits": ["short hashes of the commits the answer relies on"],
  "keyInsights": ["notable observations"],
  "patterns": ["recurring development patterns"],
  "businessContext": "optional business reasoning behind the changes"
}}

Do not write anything before or after the JSON object. No markdown, no commentary."#
    )
}

pub fn pattern_prompt(context_json: &str) -> String {
    format!(
        r#"You are a software architect identifying recurring code and design patterns in a repository.

Study the commit history and file snapshot below and describe the patterns that emerged, when they
were introduced and how they changed over time.

=== CONTEXT ===
{context_json}

=== RESPONSE FORMAT ===
Return ONLY a JSON array. Each element must have exactly these fields:
[
  {{
    "pattern": "pattern name",
    "description": "what the pattern is and where it appears",
    "introducedAt": "short hash or date where it first appears",
    "evolution": ["how it changed, in order"],
    "impact": "high | medium | low",
    "reasoning": "evidence from the history"
  }}
]

Do not write anything before or after the JSON array. No markdown, no commentary."#
    )
}

pub fn architecture_prompt(context_json: &str) -> String {
    format!(
        r#"You are a principal engineer reconstructing the architectural decisions behind a codebase.

The context below lists the major commits (large changes, refactors, redesigns, breaking changes)
and a snapshot of key files. Identify the architectural decisions they reveal.

=== CONTEXT ===
{context_json}

=== RESPONSE FORMAT ===
Return ONLY a JSON array. Each element must have exactly these fields:
[
  {{
    "decision": "the decision taken",
    "rationale": "why it was likely taken",
    "commit": "short hash of the commit that introduced it",
    "impact": "effect on the codebase",
    "alternatives": ["alternatives that were available"]
  }}
]

Do not write anything before or after the JSON array. No markdown, no commentary."#
    )
}

// ─── interpreter ────────────────────────────────────────────────────────────

/// Sends assembled context to the generation boundary and types the answer.
///
/// A failed call is an error; unparseable output is not.
pub struct ResponseInterpreter {
    generator: Arc<dyn TextGenerator>,
    limits: GenerationConfig,
}

impl ResponseInterpreter {
    pub fn new(generator: Arc<dyn TextGenerator>, limits: GenerationConfig) -> Self {
        Self { generator, limits }
    }

    async fn call(&self, prompt: String, max_tokens: u32, mode: &'static str) -> Result<String> {
        tracing::debug!(mode, prompt_tokens = context::estimate_tokens(&prompt), "calling generator");
        let request = GenerationRequest { prompt, max_tokens };
        self.generator.generate(&request).await.map_err(|e| {
            tracing::error!(mode, error = %e, code = e.category().as_str(), "generation failed");
            e
        })
    }

    pub async fn evolution(&self, ctx: &EvolutionContext) -> Result<Interpreted<EvolutionResult>> {
        let prompt = evolution_prompt(&context::render(ctx)?);
        let raw = self
            .call(prompt, self.limits.evolution_max_tokens, "evolution")
            .await?;
        Ok(parse_evolution(&raw))
    }

    pub async fn patterns(&self, ctx: &PatternContext) -> Result<Interpreted<Vec<PatternResult>>> {
        let prompt = pattern_prompt(&context::render(ctx)?);
        let raw = self
            .call(prompt, self.limits.pattern_max_tokens, "pattern")
            .await?;
        Ok(parse_patterns(&raw))
    }

    pub async fn architecture(
        &self,
        ctx: &ArchitectureContext,
    ) -> Result<Interpreted<Vec<ArchitecturalDecision>>> {
        let prompt = architecture_prompt(&context::render(ctx)?);
        let raw = self
            .call(prompt, self.limits.architecture_max_tokens, "architecture")
            .await?;
        Ok(parse_architecture(&raw))
    }
}
