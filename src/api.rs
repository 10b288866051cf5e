use crate::{config::SystemSpecs, error::ApiError, report::AnalysisResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

const USER_AGENT: &str = concat!("loadcheck/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzeRequest {
    pub mod_list: String,
    pub game: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masterlist_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specs: Option<SystemSpecs>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewRequest {
    pub game: String,
    pub mod_list: String,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct PreviewEntry {
    #[serde(default, alias = "name")]
    pub plugin: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub recognized: bool,
    #[serde(default)]
    pub matched: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct PreviewSummary {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub enabled: usize,
    #[serde(default)]
    pub recognized: usize,
    #[serde(default)]
    pub unknown: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct PreviewResponse {
    #[serde(default)]
    pub entries: Vec<PreviewEntry>,
    #[serde(default)]
    pub summary: PreviewSummary,
    #[serde(default)]
    pub normalized_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationsRequest {
    pub game: String,
    pub mod_list: Vec<String>,
    pub mod_list_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specs: Option<SystemSpecs>,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Recommendation {
    #[serde(default, alias = "mod", alias = "title")]
    pub name: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct RecommendationsResponse {
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub context: String,
    pub page_context: String,
    pub game: String,
    pub mod_list: String,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub reply: String,
    #[serde(default)]
    pub recommended_mods: Option<Vec<Recommendation>>,
    #[serde(default)]
    pub top_picks: Option<Vec<Recommendation>>,
}

/// The analyzer backend. Implementations block; callers move them onto worker threads when
/// the UI must stay responsive.
pub trait Backend: Send + Sync {
    fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalysisResult, ApiError>;
    fn preview(&self, request: &PreviewRequest) -> Result<PreviewResponse, ApiError>;
    fn recommendations(
        &self,
        request: &RecommendationsRequest,
    ) -> Result<RecommendationsResponse, ApiError>;
    fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError>;
}

pub struct HttpBackend {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(60))
            .timeout_write(Duration::from_secs(10))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, ApiError> {
        let body = serde_json::to_value(request)?;
        let response = self
            .agent
            .post(&self.endpoint(path))
            .set("User-Agent", USER_AGENT)
            .set("Accept", "application/json")
            .send_json(body)?;
        let raw = response
            .into_string()
            .map_err(|err| ApiError::Decode(err.to_string()))?;
        decode(&raw)
    }
}

impl Backend for HttpBackend {
    fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalysisResult, ApiError> {
        let result: AnalysisResult = self.post_json("/api/analyze", request)?;
        Ok(result.normalized())
    }

    fn preview(&self, request: &PreviewRequest) -> Result<PreviewResponse, ApiError> {
        self.post_json("/api/normalize", request)
    }

    fn recommendations(
        &self,
        request: &RecommendationsRequest,
    ) -> Result<RecommendationsResponse, ApiError> {
        self.post_json("/api/recommendations", request)
    }

    fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        self.post_json("/api/chat", request)
    }
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, ApiError> {
    serde_json::from_str(raw).map_err(|err| ApiError::Decode(err.to_string()))
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slashes() {
        let backend = HttpBackend::new("https://example.test/");
        assert_eq!(
            backend.endpoint("/api/analyze"),
            "https://example.test/api/analyze"
        );
    }

    #[test]
    fn analyze_request_omits_absent_optionals() {
        let request = AnalyzeRequest {
            mod_list: "*Skyrim.esm".to_string(),
            game: "skyrimse".to_string(),
            masterlist_version: Some("v0.21".to_string()),
            game_version: None,
            specs: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "mod_list": "*Skyrim.esm",
                "game": "skyrimse",
                "masterlist_version": "v0.21"
            })
        );
    }

    #[test]
    fn responses_decode_with_missing_fields() {
        let preview: PreviewResponse =
            decode(r#"{"entries":[{"name":"A.esp","recognized":true}],"normalized_text":"*A.esp"}"#)
                .unwrap();
        assert_eq!(preview.entries[0].plugin, "A.esp");
        assert!(preview.entries[0].enabled);
        assert_eq!(preview.summary, PreviewSummary::default());

        let chat: ChatResponse = decode(r#"{"reply":"Install SKSE first."}"#).unwrap();
        assert_eq!(chat.reply, "Install SKSE first.");
        assert!(chat.recommended_mods.is_none());

        let recs: RecommendationsResponse =
            decode(r#"{"recommendations":[{"mod":"SkyUI","reason":"MCM"}]}"#).unwrap();
        assert_eq!(recs.recommendations[0].name, "SkyUI");
        assert!(recs.warnings.is_empty());
    }

    #[test]
    fn unparseable_body_is_a_decode_error() {
        let err = decode::<ChatResponse>("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }
}
