use crate::error::status_is_transient;
use crate::models::{Scheme, UserProfile};
use crate::traits::EligibilityJudge;
use crate::SchemeError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

const SYSTEM_PROMPT: &str = "You assess eligibility for Indian government schemes. \
Use only the scheme text provided. State whether the applicant is eligible, \
not eligible, or whether more information is needed, cite the conditions you \
relied on, and list any documents the applicant must provide.";

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Scheme text beyond this many chars is dropped from the prompt.
    pub max_context_chars: usize,
}

/// [`EligibilityJudge`] over an OpenAI-compatible `/chat/completions` API.
pub struct ChatCompletionJudge {
    client: Client,
    url: Url,
    model: String,
    api_key: Option<String>,
    max_context_chars: usize,
}

impl ChatCompletionJudge {
    pub fn new(config: JudgeConfig) -> Result<Self, SchemeError> {
        let base = config.endpoint.trim_end_matches('/');
        let url = Url::parse(&format!("{base}/chat/completions")).map_err(|error| {
            SchemeError::validation(format!("invalid judge endpoint '{}': {error}", config.endpoint))
        })?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| SchemeError::Judge {
                details: error.to_string(),
                transient: false,
            })?;

        Ok(Self {
            client,
            url,
            model: config.model,
            api_key: config.api_key.filter(|key| !key.trim().is_empty()),
            max_context_chars: config.max_context_chars,
        })
    }
}

pub fn build_user_prompt(
    scheme: &Scheme,
    scheme_text: &str,
    profile: &UserProfile,
    max_context_chars: usize,
) -> String {
    let context: String = scheme_text.chars().take(max_context_chars).collect();
    let profile_json = serde_json::to_string_pretty(profile).unwrap_or_else(|_| "{}".to_string());
    let documents = if scheme.required_documents.is_empty() {
        "not listed".to_string()
    } else {
        scheme.required_documents.join(", ")
    };

    format!(
        "Scheme: {name}\nBenefit: {kind:?}, up to {value} ({description})\nRequired documents: {documents}\n\n\
Scheme text:\n{context}\n\nApplicant profile:\n{profile_json}\n\nIs this applicant eligible?",
        name = scheme.name,
        kind = scheme.benefits.kind,
        value = scheme.benefits.max_value,
        description = scheme.benefits.description,
    )
}

#[async_trait]
impl EligibilityJudge for ChatCompletionJudge {
    async fn judge(
        &self,
        scheme: &Scheme,
        scheme_text: &str,
        profile: &UserProfile,
    ) -> Result<String, SchemeError> {
        let prompt = build_user_prompt(scheme, scheme_text, profile, self.max_context_chars);
        let mut request = self.client.post(self.url.clone()).json(&json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        }));

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|error| SchemeError::Judge {
            details: error.to_string(),
            transient: true,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SchemeError::Judge {
                details: format!("{status}: {body}"),
                transient: status_is_transient(status),
            });
        }

        let parsed: Value = response.json().await.map_err(|error| SchemeError::Judge {
            details: format!("malformed response: {error}"),
            transient: false,
        })?;

        verdict_from_response(&parsed)
    }
}

fn verdict_from_response(parsed: &Value) -> Result<String, SchemeError> {
    parsed
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SchemeError::Judge {
            details: "response has no message content".to_string(),
            transient: false,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Benefits, BenefitsType, SchemeFilters};
    use chrono::Utc;

    fn scheme() -> Scheme {
        Scheme {
            id: "s-1".to_string(),
            name: "PM Kisan".to_string(),
            benefits: Benefits {
                kind: BenefitsType::Financial,
                max_value: 6000.0,
                description: "three instalments".to_string(),
            },
            required_documents: vec!["Aadhaar".to_string(), "Land record".to_string()],
            filters: SchemeFilters::default(),
            original_source_ref: "sha256:00".to_string(),
            text_chunks: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn prompt_contains_scheme_text_and_profile() {
        let profile = UserProfile {
            state: Some("Bihar".to_string()),
            ..UserProfile::default()
        };
        let prompt = build_user_prompt(&scheme(), "Small and marginal farmers.", &profile, 1_000);

        assert!(prompt.contains("PM Kisan"));
        assert!(prompt.contains("Aadhaar, Land record"));
        assert!(prompt.contains("Small and marginal farmers."));
        assert!(prompt.contains("\"state\": \"Bihar\""));
    }

    #[test]
    fn prompt_truncates_long_scheme_text() {
        let text = "z".repeat(50);
        let prompt = build_user_prompt(&scheme(), &text, &UserProfile::default(), 10);
        assert!(prompt.contains(&"z".repeat(10)));
        assert!(!prompt.contains(&"z".repeat(11)));
    }

    #[test]
    fn verdict_is_returned_verbatim() {
        let response = json!({
            "choices": [{ "message": { "role": "assistant", "content": "Eligible. Criteria met." } }]
        });
        assert_eq!(
            verdict_from_response(&response).expect("content present"),
            "Eligible. Criteria met."
        );
        assert!(verdict_from_response(&json!({ "choices": [] })).is_err());
    }
}
