use crate::types::Question;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors that can occur while fetching the question catalog. The engine
/// never surfaces these to the state machine; it substitutes the built-in
/// fallback set instead.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("response parsing failed: {0}")]
    ParseError(String),
}

/// Trait all question sources must implement
#[async_trait]
pub trait QuestionCatalog: Send + Sync {
    /// Fetch the ordered question set for a predefined game
    async fn fetch_questions(&self) -> CatalogResult<Vec<Question>>;

    /// Get the name of this catalog
    fn name(&self) -> &str;
}

/// The built-in question set used whenever the remote catalog is
/// unconfigured or fails
pub fn fallback_questions() -> Vec<Question> {
    [
        ("Wie hoch ist der Mount Everest (in Metern)?", 8848.0, "Meter"),
        (
            "Wie viele Kilometer beträgt die ungefähre Entfernung zwischen Berlin und Moskau?",
            1610.0,
            "Kilometer",
        ),
        (
            "Was war das Erscheinungsjahr des ersten Harry-Potter-Bandes?",
            1997.0,
            "Jahr",
        ),
        ("Wie viele Sekunden hat ein normaler Tag?", 86400.0, "Sekunden"),
    ]
    .into_iter()
    .map(|(prompt, answer, unit)| Question {
        id: ulid::Ulid::new().to_string(),
        prompt: prompt.to_string(),
        answer,
        unit: unit.to_string(),
        created_at: None,
    })
    .collect()
}

/// Configuration for the Airtable-backed catalog
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub api_key: Option<String>,
    pub base_id: Option<String>,
    pub table: String,
    pub timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_id: None,
            table: "Fragen".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl CatalogConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let api_key = std::env::var("AIRTABLE_API_KEY").ok().and_then(|key| {
            let trimmed = key.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });

        let base_id = std::env::var("AIRTABLE_BASE_ID").ok().and_then(|id| {
            let trimmed = id.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });

        let table = std::env::var("AIRTABLE_TABLE")
            .ok()
            .and_then(|table| {
                let trimmed = table.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| "Fragen".to_string());

        Self {
            api_key,
            base_id,
            table,
            timeout: std::env::var("AIRTABLE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(10)),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.base_id.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct AirtableListResponse {
    records: Vec<AirtableRecord>,
}

#[derive(Debug, Deserialize)]
struct AirtableRecord {
    #[serde(default)]
    fields: AirtableFields,
}

/// Column names match the shared question table
#[derive(Debug, Default, Deserialize)]
struct AirtableFields {
    frage: Option<String>,
    antwort: Option<serde_json::Value>,
    einheit: Option<String>,
}

/// Airtable-backed catalog
pub struct AirtableCatalog {
    config: CatalogConfig,
    client: reqwest::Client,
}

impl AirtableCatalog {
    pub fn new(config: CatalogConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build HTTP client");

        Self { config, client }
    }

    fn map_question(index: usize, fields: AirtableFields) -> Option<Question> {
        let prompt = fields.frage?;
        let answer = match fields.antwort? {
            serde_json::Value::Number(n) => n.as_f64()?,
            serde_json::Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        if prompt.trim().is_empty() || !answer.is_finite() {
            tracing::debug!("Skipping malformed catalog record at index {}", index);
            return None;
        }

        Some(Question {
            id: ulid::Ulid::new().to_string(),
            prompt,
            answer,
            unit: fields.einheit.unwrap_or_default(),
            created_at: None,
        })
    }
}

#[async_trait]
impl QuestionCatalog for AirtableCatalog {
    async fn fetch_questions(&self) -> CatalogResult<Vec<Question>> {
        let (api_key, base_id) = match (&self.config.api_key, &self.config.base_id) {
            (Some(key), Some(base)) => (key, base),
            _ => {
                return Err(CatalogError::ConfigError(
                    "AIRTABLE_API_KEY or AIRTABLE_BASE_ID not set".to_string(),
                ))
            }
        };

        let url = format!("https://api.airtable.com/v0/{}/{}", base_id, self.config.table);

        let response = tokio::time::timeout(
            self.config.timeout,
            self.client.get(&url).bearer_auth(api_key).send(),
        )
        .await
        .map_err(|_| CatalogError::Timeout(self.config.timeout))?
        .map_err(|e| CatalogError::ApiError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CatalogError::ApiError(format!(
                "Airtable API returned status: {}",
                response.status()
            )));
        }

        let listing: AirtableListResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::ParseError(e.to_string()))?;

        let questions: Vec<Question> = listing
            .records
            .into_iter()
            .enumerate()
            .filter_map(|(index, record)| Self::map_question(index, record.fields))
            .collect();

        if questions.is_empty() {
            return Err(CatalogError::ParseError(
                "no valid questions in the table (check columns 'frage', 'antwort', 'einheit')"
                    .to_string(),
            ));
        }

        Ok(questions)
    }

    fn name(&self) -> &str {
        "airtable"
    }
}

/// Fixed in-memory catalog for tests and offline play
pub struct StaticCatalog {
    questions: Vec<Question>,
}

impl StaticCatalog {
    pub fn new(questions: Vec<Question>) -> Self {
        Self { questions }
    }

    /// Catalog serving the built-in fallback set
    pub fn builtin() -> Self {
        Self::new(fallback_questions())
    }
}

#[async_trait]
impl QuestionCatalog for StaticCatalog {
    async fn fetch_questions(&self) -> CatalogResult<Vec<Question>> {
        Ok(self.questions.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}
