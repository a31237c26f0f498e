//! Request/response surface over the catalog and the dispatcher.
//!
//! A transport layer (HTTP, CLI) calls these operations and renders the typed
//! views; nothing here knows about routing or templates.

pub mod views;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::core::{SubmitResult, WorkDispatcher};
use crate::domain::{DownloadRequest, RecordId, SettingsOverrides, ValidationError};
use crate::store::{effective_settings, CatalogStore, StoreError};

pub use views::{
    CollectionView, DownloadRecordView, IndexView, ListView, SettingEntry, SettingsView,
    SubmitForm, SubmitResponse,
};

/// Where callers are sent after a successful submission
pub const INDEX_LOCATION: &str = "/";

/// Error reported to the caller, with an HTTP-style status code
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{status}: {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: 404,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: 503,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        // Details stay in the log
        error!("Catalog error: {}", e);
        Self {
            status: 500,
            message: "Internal server error".to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Query and submission operations, constructed once at startup
pub struct Api {
    store: Arc<dyn CatalogStore>,
    dispatcher: Arc<WorkDispatcher>,
    overrides: SettingsOverrides,
    recent_limit: usize,
    downloads_dir: PathBuf,
}

impl Api {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        dispatcher: Arc<WorkDispatcher>,
        overrides: SettingsOverrides,
        recent_limit: usize,
        downloads_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            dispatcher,
            overrides,
            recent_limit,
            downloads_dir,
        }
    }

    /// Overview: format choices, default format, failed, queued and recent
    pub fn index(&self) -> ApiResult<IndexView> {
        let (settings, _) = effective_settings(self.store.as_ref(), &self.overrides)?;

        Ok(IndexView {
            format_options: self.store.get_format_options()?,
            default_format: settings.default_format,
            failed: self.failed()?,
            queue: self.queue()?,
            history: self.recent()?,
        })
    }

    pub fn queue(&self) -> ApiResult<ListView<DownloadRecordView>> {
        Ok(ListView::from_records(self.store.get_queued()?))
    }

    pub fn recent(&self) -> ApiResult<ListView<DownloadRecordView>> {
        self.recent_limited(self.recent_limit)
    }

    pub fn recent_limited(&self, limit: usize) -> ApiResult<ListView<DownloadRecordView>> {
        Ok(ListView::from_records(self.store.get_recent(limit)?))
    }

    pub fn failed(&self) -> ApiResult<ListView<DownloadRecordView>> {
        Ok(ListView::from_records(self.store.get_failed()?))
    }

    pub fn video(&self, id: RecordId) -> ApiResult<DownloadRecordView> {
        self.store
            .get_video(id)?
            .map(DownloadRecordView::from)
            .ok_or_else(|| ApiError::not_found("Could not find the requested video."))
    }

    pub fn video_by_extractor(
        &self,
        extractor: &str,
        online_id: &str,
    ) -> ApiResult<DownloadRecordView> {
        self.store
            .get_video_by_extractor_id(extractor, online_id)?
            .map(DownloadRecordView::from)
            .ok_or_else(|| ApiError::not_found("Could not find the requested video."))
    }

    pub fn collection(&self, id: RecordId) -> ApiResult<CollectionView> {
        self.store
            .get_collection(id)?
            .map(CollectionView::from)
            .ok_or_else(|| ApiError::not_found("Could not find the requested collection."))
    }

    pub fn collection_by_extractor(
        &self,
        extractor: &str,
        online_id: &str,
    ) -> ApiResult<CollectionView> {
        self.store
            .get_collection_by_extractor_id(extractor, online_id)?
            .map(CollectionView::from)
            .ok_or_else(|| ApiError::not_found("Could not find the requested collection."))
    }

    /// Effective settings and which keys the environment overrides
    pub fn settings(&self) -> ApiResult<SettingsView> {
        let (settings, overridden) = effective_settings(self.store.as_ref(), &self.overrides)?;
        let fetch_options = settings.fetch_options(None, &self.downloads_dir);
        Ok(SettingsView::new(&settings, fetch_options, overridden))
    }

    /// Hand a submission to the dispatcher without waiting for the fetch
    pub async fn add_to_queue(&self, form: SubmitForm) -> ApiResult<SubmitResponse> {
        let wants_redirect = form.wants_redirect();
        let request = DownloadRequest::new(form.url.unwrap_or_default(), form.format);
        request.validate()?;

        let id = match self.dispatcher.submit(request).await? {
            SubmitResult::Accepted { id } => id,
            SubmitResult::Rejected { reason } => return Err(ApiError::unavailable(reason)),
        };

        if wants_redirect {
            Ok(SubmitResponse::Redirect {
                location: INDEX_LOCATION.to_string(),
                id,
            })
        } else {
            Ok(SubmitResponse::Queue {
                id,
                queue: self.queue()?,
            })
        }
    }
}
