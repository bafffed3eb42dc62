//! Access to the hosted tables, authentication service and object storage.
//!
//! [`HostedBackend`] talks to the real service over HTTP. [`LocalBackend`]
//! keeps everything on disk and is used for development and tests.

mod hosted;
mod local;

pub use hosted::{HostedBackend, RetryPolicy};
pub use local::LocalBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    MaintenancePhoto, MaintenanceRecord, MaintenanceSetting, NewMaintenancePhoto,
    NewMaintenanceRecord, NewProject, Project, ProjectUpdate, UserName,
};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot error: {0}")]
    Snapshot(String),
    #[error("object path rejected: {0}")]
    InvalidPath(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Http(e.to_string())
        }
    }
}

/// Account returned by the authentication service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Short tag used in logs
    fn backend_tag(&self) -> &'static str;

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, BackendError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, BackendError>;

    async fn list_user_names(&self) -> Result<Vec<UserName>, BackendError>;
    async fn user_name_by_email(&self, email: &str) -> Result<Option<UserName>, BackendError>;
    async fn user_name_by_user(&self, user: &str) -> Result<Option<UserName>, BackendError>;
    async fn create_user_name(&self, entry: &UserName) -> Result<(), BackendError>;

    async fn list_projects(&self) -> Result<Vec<Project>, BackendError>;
    async fn get_project(&self, id: i64) -> Result<Option<Project>, BackendError>;
    async fn create_project(&self, project: &NewProject) -> Result<Project, BackendError>;
    async fn update_project(&self, id: i64, update: &ProjectUpdate)
    -> Result<Project, BackendError>;

    /// Season windows of a project, looked up by project name
    async fn settings_for_project(
        &self,
        project: &str,
    ) -> Result<Vec<MaintenanceSetting>, BackendError>;
    /// Insert or replace the window sharing `(name, year_q)`
    async fn upsert_setting(
        &self,
        setting: &MaintenanceSetting,
    ) -> Result<MaintenanceSetting, BackendError>;
    /// Drop every season window of a project
    async fn delete_settings_for_project(&self, project: &str) -> Result<(), BackendError>;

    async fn create_record(
        &self,
        record: &NewMaintenanceRecord,
    ) -> Result<MaintenanceRecord, BackendError>;
    async fn records_for_project(
        &self,
        project: &str,
    ) -> Result<Vec<MaintenanceRecord>, BackendError>;
    async fn delete_record(&self, id: i64) -> Result<(), BackendError>;

    /// Photos of a project, newest first
    async fn photos_for_project(
        &self,
        project: &str,
    ) -> Result<Vec<MaintenancePhoto>, BackendError>;
    async fn get_photo(&self, id: i64) -> Result<Option<MaintenancePhoto>, BackendError>;
    async fn create_photos(
        &self,
        photos: &[NewMaintenancePhoto],
    ) -> Result<Vec<MaintenancePhoto>, BackendError>;
    async fn delete_photo(&self, id: i64) -> Result<(), BackendError>;

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BackendError>;
    async fn download_object(&self, bucket: &str, path: &str) -> Result<Vec<u8>, BackendError>;
    async fn remove_object(&self, bucket: &str, path: &str) -> Result<(), BackendError>;
    /// URL a browser can load the object from; empty for an empty path
    fn public_url(&self, bucket: &str, path: &str) -> String;
}
