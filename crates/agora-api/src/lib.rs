pub mod auth;
pub mod comments;
mod convert;
pub mod dialogs;
pub mod error;
pub mod members;
pub mod middleware;
pub mod posts;

use error::ApiError;
use serde::Deserialize;
use tracing::error;

/// Offset paging query parameters shared by list endpoints.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

impl PageQuery {
    fn clamped_limit(&self) -> u32 {
        self.limit.min(200)
    }
}

/// Run a storage closure off the async runtime. Every handler funnels
/// its rusqlite work through here.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            Err(ApiError::Internal(anyhow::anyhow!(
                "blocking task failed: {e}"
            )))
        }
    }
}
