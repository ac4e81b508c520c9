//! Azure AI Search grounding settings.

use serde::{Deserialize, Serialize};

/// "On your data" retrieval attached to each completion when enabled.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VectorSearchSettings {
    /// Attach the search data source to completions.
    pub enabled: bool,
    /// Search service endpoint.
    pub endpoint: String,
    /// Search admin or query key.
    pub key: String,
    /// Index name.
    pub index: String,
    /// Semantic ranker configuration.
    pub semantic_config: String,
    /// Embedding model deployment used for vector queries.
    pub embedding_deployment: String,
}

impl Default for VectorSearchSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            key: String::new(),
            index: String::new(),
            semantic_config: "azureml-default".to_string(),
            embedding_deployment: "text-embedding-ada-002".to_string(),
        }
    }
}

impl VectorSearchSettings {
    /// Names of required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("endpoint", &self.endpoint),
            ("key", &self.key),
            ("index", &self.index),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}
