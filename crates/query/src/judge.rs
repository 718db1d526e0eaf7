use anyhow::{Context, Result};
use index::{RetryPolicy, SearchHit};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Judgement {
    High,
    Medium,
    Low,
}

impl Judgement {
    pub fn from_score(total_score: u8) -> Self {
        match total_score {
            80.. => Judgement::High,
            50..=79 => Judgement::Medium,
            _ => Judgement::Low,
        }
    }

    fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "high" => Some(Judgement::High),
            "medium" => Some(Judgement::Medium),
            "low" => Some(Judgement::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub total_score: u8,
    pub judgement: Judgement,
    pub reason: String,
}

impl Verdict {
    /// Scores above 100 are clamped; a missing judgement is derived from the score.
    pub fn new(total_score: f64, judgement: Option<Judgement>, reason: &str) -> Self {
        let total_score = total_score.round().clamp(0.0, 100.0) as u8;
        Self {
            total_score,
            judgement: judgement.unwrap_or_else(|| Judgement::from_score(total_score)),
            reason: reason.to_string(),
        }
    }

    /// Stand-in for a hit the judge said nothing about.
    pub fn missing() -> Self {
        Self {
            total_score: 0,
            judgement: Judgement::Low,
            reason: "no relevance judgement".to_string(),
        }
    }
}

/// Scores how relevant each hit is to a query. The output has one slot per hit.
pub trait RelevanceJudge: Send + Sync {
    fn judge(
        &self,
        query: &str,
        hits: &[SearchHit],
    ) -> impl Future<Output = Vec<Option<Verdict>>> + Send;
}

/// Judge that never returns a verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unjudged;

impl RelevanceJudge for Unjudged {
    async fn judge(&self, _query: &str, hits: &[SearchHit]) -> Vec<Option<Verdict>> {
        vec![None; hits.len()]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub base_url: String,
    pub model: String,
    pub max_attempts: usize,
    /// Characters of each hit shown to the model.
    pub preview_chars: usize,
    pub timeout_secs: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            max_attempts: 3,
            preview_chars: 1200,
            timeout_secs: 120,
        }
    }
}

/// LLM judge over Ollama's generate endpoint.
#[derive(Clone)]
pub struct OllamaJudge {
    config: JudgeConfig,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

#[derive(Deserialize)]
struct RawVerdict {
    #[serde(alias = "index")]
    doc_index: usize,
    total_score: f64,
    #[serde(default)]
    judgement: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl OllamaJudge {
    pub fn new(config: JudgeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build judge HTTP client")?;
        let retry = RetryPolicy::new(config.max_attempts.saturating_sub(1), 1000, 4000);
        Ok(Self {
            config,
            client,
            retry,
        })
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.config.base_url.trim_end_matches('/'));

        let request = OllamaRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            format: "json",
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }

    fn build_prompt(&self, query: &str, hits: &[SearchHit]) -> String {
        let documents: Vec<String> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                let preview: String = hit
                    .content
                    .replace('\n', " ")
                    .trim()
                    .chars()
                    .take(self.config.preview_chars)
                    .collect();
                format!("[Document {}]\n{}", i + 1, preview)
            })
            .collect();

        format!(
            r#"You are a financial product advisor. Rate how relevant each document is to the query.

Query: {}

Scoring:
1) keyword_match (0-40): how directly the document matches the query's key terms and intent
2) condition_fit (0-40): how well it fits the stated conditions (spending categories, health conditions)
3) actionability (0-20): how usable it is for an actual recommendation
total_score is the sum of the three (0-100).
judgement: "high" if total_score >= 80, "medium" if 50 <= total_score < 80, otherwise "low".

Documents:
{}

Evaluate every document. Return JSON only:
{{"evaluations": [{{"doc_index": 1, "total_score": 0, "judgement": "low", "reason": "..."}}]}}"#,
            query,
            documents.join("\n\n")
        )
    }
}

/// Parse a judge response into one slot per hit. `doc_index` is 1-based.
pub fn parse_verdicts(raw: &str, hit_count: usize) -> Result<Vec<Option<Verdict>>> {
    let json = match (raw.find(['{', '[']), raw.rfind(['}', ']'])) {
        (Some(start), Some(end)) if end > start => &raw[start..=end],
        _ => anyhow::bail!("No JSON in judge response"),
    };
    let value: Value = serde_json::from_str(json).context("Invalid JSON in judge response")?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("evaluations") {
            Some(Value::Array(items)) => items,
            _ => anyhow::bail!("Judge response has no evaluations list"),
        },
        _ => anyhow::bail!("Unexpected judge response shape"),
    };

    let mut verdicts = vec![None; hit_count];
    let mut found = 0;
    for item in items {
        let Ok(raw) = serde_json::from_value::<RawVerdict>(item) else {
            continue;
        };
        if raw.doc_index == 0 || raw.doc_index > hit_count {
            continue;
        }
        let judgement = raw.judgement.as_deref().and_then(Judgement::parse);
        verdicts[raw.doc_index - 1] = Some(Verdict::new(
            raw.total_score,
            judgement,
            raw.reason.as_deref().unwrap_or_default(),
        ));
        found += 1;
    }

    anyhow::ensure!(found > 0, "Judge response contained no usable evaluations");
    Ok(verdicts)
}

impl RelevanceJudge for OllamaJudge {
    async fn judge(&self, query: &str, hits: &[SearchHit]) -> Vec<Option<Verdict>> {
        if hits.is_empty() || query.trim().is_empty() {
            return vec![None; hits.len()];
        }

        let prompt = self.build_prompt(query, hits);
        let result = self
            .retry
            .retry("judge_relevance", || async {
                let raw = self.generate(&prompt).await?;
                parse_verdicts(&raw, hits.len())
            })
            .await;

        match result {
            Ok(verdicts) => verdicts,
            Err(e) => {
                warn!(operation = "judge_relevance", error = %e, "Relevance judging failed");
                vec![None; hits.len()]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_judgement_from_score() {
        assert_eq!(Judgement::from_score(80), Judgement::High);
        assert_eq!(Judgement::from_score(79), Judgement::Medium);
        assert_eq!(Judgement::from_score(50), Judgement::Medium);
        assert_eq!(Judgement::from_score(49), Judgement::Low);
    }

    #[test]
    fn test_verdict_clamps_and_derives_judgement() {
        let verdict = Verdict::new(140.0, None, "great");
        assert_eq!(verdict.total_score, 100);
        assert_eq!(verdict.judgement, Judgement::High);
        assert_eq!(Verdict::missing().judgement, Judgement::Low);
    }

    #[test]
    fn test_parse_verdicts_fills_slots_by_index() {
        let raw = r#"Sure! {"evaluations": [
            {"doc_index": 2, "total_score": 85, "judgement": "high", "reason": "exact match"},
            {"doc_index": 1, "total_score": 55, "reason": "partial"},
            {"doc_index": 9, "total_score": 99, "judgement": "high", "reason": "out of range"}
        ]}"#;
        let verdicts = parse_verdicts(raw, 3).unwrap();

        assert_eq!(verdicts[0].as_ref().unwrap().judgement, Judgement::Medium);
        assert_eq!(verdicts[1].as_ref().unwrap().total_score, 85);
        assert_eq!(verdicts[1].as_ref().unwrap().reason, "exact match");
        assert!(verdicts[2].is_none());
    }

    #[test]
    fn test_parse_verdicts_accepts_bare_array() {
        let verdicts = parse_verdicts(r#"[{"index": 1, "total_score": 10}]"#, 1).unwrap();
        assert_eq!(verdicts[0].as_ref().unwrap().judgement, Judgement::Low);
    }

    #[test]
    fn test_parse_verdicts_rejects_garbage() {
        assert!(parse_verdicts("no json here", 2).is_err());
        assert!(parse_verdicts("{\"evaluations\": []}", 2).is_err());
        assert!(parse_verdicts("{\"evaluations\": [", 2).is_err());
    }

    #[tokio::test]
    async fn test_unjudged_returns_empty_slots() {
        let hits = vec![
            SearchHit {
                id: "a".to_string(),
                content: "x".to_string(),
                metadata: Default::default(),
                distance: 0.0,
            };
            2
        ];
        assert_eq!(Unjudged.judge("q", &hits).await, vec![None, None]);
    }
}
