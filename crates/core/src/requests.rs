use crate::models::{Benefits, BenefitsType, NewScheme, SchemeFilters, UserProfile};
use crate::SchemeError;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// What the upload form hands over: the file plus the scheme metadata.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub file: Option<Vec<u8>>,
    pub file_name: Option<String>,
    pub scheme_name: Option<String>,
    pub benefits_type: BenefitsType,
    pub benefits_value: f64,
    pub benefits_description: String,
    pub required_documents: Vec<String>,
    pub filters: SchemeFilters,
}

#[derive(Debug, Clone)]
pub struct ValidUpload {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
    pub scheme: NewScheme,
}

impl UploadRequest {
    pub fn validate(self) -> Result<ValidUpload, SchemeError> {
        let bytes = self
            .file
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| SchemeError::validation("a PDF file is required"))?;

        let name = self
            .scheme_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| SchemeError::validation("scheme name is required"))?;

        if !self.benefits_value.is_finite() || self.benefits_value < 0.0 {
            return Err(SchemeError::validation(
                "benefits value must be a non-negative number",
            ));
        }

        Ok(ValidUpload {
            bytes,
            file_name: self.file_name,
            scheme: NewScheme {
                name,
                benefits: Benefits {
                    kind: self.benefits_type,
                    max_value: self.benefits_value,
                    description: self.benefits_description.trim().to_string(),
                },
                required_documents: clean_list(self.required_documents),
                filters: SchemeFilters {
                    state: clean_list(self.filters.state),
                    gender: clean_list(self.filters.gender),
                    caste: clean_list(self.filters.caste),
                },
            },
        })
    }
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default, alias = "userProfile")]
    pub user_profile: Option<UserProfile>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.user_profile = Some(profile);
        self
    }

    pub fn validate(&self) -> Result<(), SchemeError> {
        if self.query.trim().is_empty() {
            return Err(SchemeError::validation("query is required"));
        }
        if self.top_k == Some(0) {
            return Err(SchemeError::validation("top_k must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JudgeRequest {
    #[serde(alias = "schemeId")]
    pub scheme_id: String,
    #[serde(default, alias = "userProfile")]
    pub user_profile: UserProfile,
}

impl JudgeRequest {
    pub fn validate(&self) -> Result<(), SchemeError> {
        if self.scheme_id.trim().is_empty() {
            return Err(SchemeError::validation("scheme id is required"));
        }
        Ok(())
    }
}
