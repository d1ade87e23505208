//! Connection checks and model discovery, used by `studyflow check`.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A model offered by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,

    /// Owner or size hint, when the backend reports one.
    pub detail: Option<String>,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Reachability and model listing for a completion backend.
#[async_trait]
pub trait ProviderUtils: Send + Sync {
    /// Short provider name for display.
    fn provider(&self) -> &'static str;

    /// `Ok(false)` when unreachable; errors are reserved for auth or
    /// configuration problems.
    async fn ping(&self) -> Result<bool>;

    async fn fetch_models(&self) -> Result<Vec<ModelInfo>>;

    /// The model completions are sent to.
    fn current_model(&self) -> &str;
}
