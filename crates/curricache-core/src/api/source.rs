use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::models::{Curriculum, ModuleCompletion};

/// Envelope every remote data function answers with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> RemoteResponse<T> {
    /// `success: false` becomes [`ApiError::Remote`], same as a transport error.
    pub fn into_result(self) -> Result<Option<T>, ApiError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(ApiError::Remote(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

/// The remote data functions the cache reads through.
pub trait CurriculumSource: Send + Sync {
    fn fetch_user_curricula<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Curriculum>, ApiError>>;

    /// `Ok(None)` when no curriculum has this id.
    fn fetch_curriculum_by_id<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Curriculum>, ApiError>>;

    fn fetch_all_module_completions<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ModuleCompletion>, ApiError>>;
}
