//! Summariser implementations.
//!
//! [`HttpSummariser`] talks to the completion endpoint of an inference
//! backend and extracts structured JSON from free-form model replies.
//! [`LocalSummariser`] is the no-backend fallback: it merges text
//! mechanically so the pipeline keeps producing speaker context even when
//! no inference endpoint is configured.

use super::{AdapterError, SpeakerContext, SpeakerSummary, Summariser};
use crate::transcript::SummarizeRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    text: String,
}

pub struct HttpSummariser {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSummariser {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        HttpSummariser {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Summariser for HttpSummariser {
    async fn summarise(
        &self,
        request: &SummarizeRequest,
        prior: Option<&SpeakerContext>,
    ) -> Result<SpeakerSummary, AdapterError> {
        let prior_summary = prior.map(|c| c.summary.as_str()).unwrap_or("(none)");
        let prompt = format!(
            "You maintain a rolling summary of what one meeting participant has said.\n\
             Prior summary: {prior_summary}\n\
             New statements by {}: {}\n\
             Reply with JSON only: {{\"summary\": \"...\", \"topics\": [\"...\"]}}",
            request.speaker_name, request.recent_text
        );
        let reply = self.complete(&prompt).await?;
        match extract_json(&reply).and_then(|v| serde_json::from_value::<SpeakerSummary>(v).ok()) {
            Some(summary) => Ok(summary),
            None => {
                // Model ignored the format; keep the raw reply as the summary.
                warn!(speaker_id = %request.speaker_id, "summariser reply had no parsable JSON");
                Ok(SpeakerSummary {
                    summary: reply.trim().to_owned(),
                    topics: Vec::new(),
                })
            }
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, AdapterError> {
        let url = format!("{}/v1/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&CompletionRequest { prompt })
            .send()
            .await
            .map_err(|e| AdapterError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AdapterError::Inference(format!(
                "completion endpoint returned {}",
                response.status()
            )));
        }
        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Inference(e.to_string()))?;
        Ok(body.text)
    }
}

/// Fallback summariser for deployments without an inference backend.
#[derive(Default)]
pub struct LocalSummariser;

const LOCAL_SUMMARY_BUDGET: usize = 600;

#[async_trait]
impl Summariser for LocalSummariser {
    async fn summarise(
        &self,
        request: &SummarizeRequest,
        prior: Option<&SpeakerContext>,
    ) -> Result<SpeakerSummary, AdapterError> {
        let mut summary = match prior {
            Some(ctx) if !ctx.summary.is_empty() => {
                format!("{} {}", ctx.summary, request.recent_text)
            }
            _ => request.recent_text.clone(),
        };
        if summary.len() > LOCAL_SUMMARY_BUDGET {
            // keep the tail; the newest statements matter most
            let cut = summary.len() - LOCAL_SUMMARY_BUDGET;
            let cut = summary
                .char_indices()
                .map(|(i, _)| i)
                .find(|&i| i >= cut)
                .unwrap_or(0);
            summary = format!("…{}", &summary[cut..]);
        }
        let topics = prior.map(|c| c.topics.clone()).unwrap_or_default();
        Ok(SpeakerSummary { summary, topics })
    }

    async fn complete(&self, _prompt: &str) -> Result<String, AdapterError> {
        Err(AdapterError::Unavailable(
            "no inference backend configured".to_owned(),
        ))
    }
}

/// Pull a JSON object out of a model reply.
///
/// Accepts a bare object, a fenced ```json block, or an object embedded in
/// prose (first `{` to the matching final `}`).
pub fn extract_json(reply: &str) -> Option<serde_json::Value> {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    if let Some(fenced) = trimmed.split("```").nth(1) {
        let body = fenced.trim_start_matches("json").trim();
        if let Ok(value) = serde_json::from_str(body) {
            return Some(value);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request(text: &str) -> SummarizeRequest {
        SummarizeRequest {
            meeting_id: "UUID-A".to_owned(),
            speaker_id: "U1".to_owned(),
            speaker_name: "U1".to_owned(),
            recent_text: text.to_owned(),
            segment_count: 1,
        }
    }

    #[test]
    fn extract_json_accepts_bare_objects() {
        let value = extract_json(r#"{"summary":"s","topics":[]}"#).unwrap();
        assert_eq!(value["summary"], "s");
    }

    #[test]
    fn extract_json_accepts_fenced_blocks() {
        let reply = "Sure! Here is the summary:\n```json\n{\"summary\":\"s\",\"topics\":[\"t\"]}\n```";
        let value = extract_json(reply).unwrap();
        assert_eq!(value["topics"][0], "t");
    }

    #[test]
    fn extract_json_accepts_embedded_objects() {
        let reply = "The result is {\"summary\": \"s\", \"topics\": []} — done.";
        let value = extract_json(reply).unwrap();
        assert_eq!(value["summary"], "s");
    }

    #[test]
    fn extract_json_gives_up_on_prose() {
        assert!(extract_json("no json here at all").is_none());
    }

    #[tokio::test]
    async fn local_summariser_merges_prior_and_new_text() {
        let prior = SpeakerContext {
            meeting_id: "UUID-A".to_owned(),
            speaker_id: "U1".to_owned(),
            speaker_name: "U1".to_owned(),
            summary: "earlier remarks".to_owned(),
            topics: vec!["roadmap".to_owned()],
            last_updated: Utc::now(),
            segment_count: 2,
        };
        let summary = LocalSummariser
            .summarise(&request("new remarks"), Some(&prior))
            .await
            .unwrap();
        assert_eq!(summary.summary, "earlier remarks new remarks");
        assert_eq!(summary.topics, vec!["roadmap"]);
    }

    #[tokio::test]
    async fn local_summariser_bounds_summary_length() {
        let long = "word ".repeat(500);
        let summary = LocalSummariser
            .summarise(&request(&long), None)
            .await
            .unwrap();
        assert!(summary.summary.len() <= LOCAL_SUMMARY_BUDGET + '…'.len_utf8());
    }

    #[tokio::test]
    async fn local_completion_reports_unavailable() {
        let err = LocalSummariser.complete("prompt").await.unwrap_err();
        assert!(matches!(err, AdapterError::Unavailable(_)));
    }
}
