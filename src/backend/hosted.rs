use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

use super::{AuthUser, Backend, BackendError};
use crate::model::{
    MaintenancePhoto, MaintenanceRecord, MaintenanceSetting, NewMaintenancePhoto,
    NewMaintenanceRecord, NewProject, PHOTOS_TABLE, PROJECTS_TABLE, Project, ProjectUpdate,
    RECORDS_TABLE, SETTINGS_TABLE, USER_NAMES_TABLE, UserName,
};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 120,
        }
    }
}

/// Client for the hosted tables (`/rest/v1`), auth (`/auth/v1`) and storage (`/storage/v1`)
pub struct HostedBackend {
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl HostedBackend {
    pub fn new(base_url: &str, api_key: &str, retry: RetryPolicy) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            retry,
            client,
        }
    }

    fn headers(&self) -> Result<HeaderMap, BackendError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|e| BackendError::Http(format!("invalid api key header: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| BackendError::Http(format!("invalid auth header: {e}")))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    fn table_url(&self, table: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}/rest/v1/{}", self.base_url, table)
        } else {
            format!("{}/rest/v1/{}?{}", self.base_url, table, query)
        }
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            bucket,
            encode_path(path)
        )
    }

    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, BackendError> {
        Ok(self.client.request(method, url).headers(self.headers()?))
    }

    /// GET with linear backoff; only transport errors and 5xx are retried
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, BackendError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.request(Method::GET, url)?.send().await {
                Ok(resp) if resp.status().is_server_error() => {
                    if attempt >= self.retry.max_attempts {
                        return Err(status_error(resp).await);
                    }
                    warn!("{} returned {}, retrying", url, resp.status());
                }
                Ok(resp) => return decode(resp).await,
                Err(e) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(e.into());
                    }
                    warn!("GET {} failed ({}), retrying", url, e);
                }
            }
            tokio::time::sleep(Duration::from_millis(
                self.retry.base_backoff_ms.saturating_mul(attempt as u64),
            ))
            .await;
        }
    }

    async fn write_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        prefer: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        debug!("{} {}", method, url);
        let resp = self
            .request(method, url)?
            .header("Prefer", prefer)
            .json(body)
            .send()
            .await?;
        decode(resp).await
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Vec<T>, BackendError> {
        self.get_json(&self.table_url(table, query)).await
    }

    async fn insert_one<B: Serialize, T: DeserializeOwned>(
        &self,
        table: &str,
        row: &B,
    ) -> Result<T, BackendError> {
        let rows: Vec<T> = self
            .write_json(
                Method::POST,
                &self.table_url(table, ""),
                "return=representation",
                &[row],
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode(format!("insert into {table} returned no row")))
    }

    async fn delete_where(&self, table: &str, query: &str) -> Result<(), BackendError> {
        let resp = self
            .request(Method::DELETE, &self.table_url(table, query))?
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(status_error(resp).await)
        }
    }

    async fn auth_request(
        &self,
        url: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthUser, BackendError> {
        let resp = self
            .request(Method::POST, url)?
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let status = resp.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::UNPROCESSABLE_ENTITY
        ) {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            return Err(BackendError::Auth(auth_message(&body)));
        }
        let body: Value = decode(resp).await?;
        parse_auth_user(&body)
    }
}

/// `column=eq.value` filter with the value percent-encoded
fn eq(column: &str, value: &str) -> String {
    format!("{}=eq.{}", column, urlencoding::encode(value))
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

async fn status_error(resp: Response) -> BackendError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => BackendError::NotFound(body),
        StatusCode::CONFLICT => BackendError::Conflict(body),
        _ => BackendError::Status {
            status: status.as_u16(),
            body,
        },
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, BackendError> {
    if !resp.status().is_success() {
        return Err(status_error(resp).await);
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
}

fn auth_message(body: &Value) -> String {
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .unwrap_or("invalid credentials")
        .to_string()
}

/// Sign-up answers with the user at top level when email confirmation is pending,
/// and nested under `user` when a session is issued right away.
fn parse_auth_user(body: &Value) -> Result<AuthUser, BackendError> {
    let user = body.get("user").filter(|u| u.is_object()).unwrap_or(body);
    let id = user.get("id").and_then(Value::as_str);
    let email = user.get("email").and_then(Value::as_str);
    match (id, email) {
        (Some(id), Some(email)) => Ok(AuthUser {
            id: id.to_string(),
            email: email.to_string(),
        }),
        _ => Err(BackendError::Decode("auth response without user".to_string())),
    }
}

/// Upserts must not send a null id, or the store would try to write it
fn without_null_id(setting: &MaintenanceSetting) -> Result<Value, BackendError> {
    let mut value =
        serde_json::to_value(setting).map_err(|e| BackendError::Decode(e.to_string()))?;
    if let Value::Object(map) = &mut value {
        if map.get("id").is_some_and(Value::is_null) {
            map.remove("id");
        }
    }
    Ok(value)
}

#[async_trait]
impl Backend for HostedBackend {
    fn backend_tag(&self) -> &'static str {
        "hosted"
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, BackendError> {
        let url = format!("{}/auth/v1/signup", self.base_url);
        self.auth_request(&url, email, password).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, BackendError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        self.auth_request(&url, email, password).await
    }

    async fn list_user_names(&self) -> Result<Vec<UserName>, BackendError> {
        self.select(USER_NAMES_TABLE, "select=user,email").await
    }

    async fn user_name_by_email(&self, email: &str) -> Result<Option<UserName>, BackendError> {
        let query = format!("select=user,email&{}", eq("email", email));
        let rows: Vec<UserName> = self.select(USER_NAMES_TABLE, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn user_name_by_user(&self, user: &str) -> Result<Option<UserName>, BackendError> {
        let query = format!("select=user,email&{}", eq("user", user));
        let rows: Vec<UserName> = self.select(USER_NAMES_TABLE, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn create_user_name(&self, entry: &UserName) -> Result<(), BackendError> {
        let _: UserName = self.insert_one(USER_NAMES_TABLE, entry).await?;
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<Project>, BackendError> {
        self.select(PROJECTS_TABLE, "select=*&order=id.asc").await
    }

    async fn get_project(&self, id: i64) -> Result<Option<Project>, BackendError> {
        let query = format!("select=*&{}", eq("id", &id.to_string()));
        let rows: Vec<Project> = self.select(PROJECTS_TABLE, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn create_project(&self, project: &NewProject) -> Result<Project, BackendError> {
        self.insert_one(PROJECTS_TABLE, project).await
    }

    async fn update_project(
        &self,
        id: i64,
        update: &ProjectUpdate,
    ) -> Result<Project, BackendError> {
        let url = self.table_url(PROJECTS_TABLE, &eq("id", &id.to_string()));
        let rows: Vec<Project> = self
            .write_json(Method::PATCH, &url, "return=representation", update)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("project {id}")))
    }

    async fn settings_for_project(
        &self,
        project: &str,
    ) -> Result<Vec<MaintenanceSetting>, BackendError> {
        let query = format!("select=*&{}", eq("name", project));
        self.select(SETTINGS_TABLE, &query).await
    }

    async fn upsert_setting(
        &self,
        setting: &MaintenanceSetting,
    ) -> Result<MaintenanceSetting, BackendError> {
        let url = self.table_url(SETTINGS_TABLE, "on_conflict=name,year_q");
        let body = [without_null_id(setting)?];
        let rows: Vec<MaintenanceSetting> = self
            .write_json(
                Method::POST,
                &url,
                "resolution=merge-duplicates,return=representation",
                &body,
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode("upsert returned no row".to_string()))
    }

    async fn delete_settings_for_project(&self, project: &str) -> Result<(), BackendError> {
        self.delete_where(SETTINGS_TABLE, &eq("name", project)).await
    }

    async fn create_record(
        &self,
        record: &NewMaintenanceRecord,
    ) -> Result<MaintenanceRecord, BackendError> {
        self.insert_one(RECORDS_TABLE, record).await
    }

    async fn records_for_project(
        &self,
        project: &str,
    ) -> Result<Vec<MaintenanceRecord>, BackendError> {
        let query = format!("select=*&{}", eq("project", project));
        self.select(RECORDS_TABLE, &query).await
    }

    async fn delete_record(&self, id: i64) -> Result<(), BackendError> {
        self.delete_where(RECORDS_TABLE, &eq("id", &id.to_string()))
            .await
    }

    async fn photos_for_project(
        &self,
        project: &str,
    ) -> Result<Vec<MaintenancePhoto>, BackendError> {
        let query = format!(
            "select=*&{}&order=created_at.desc&limit=10000",
            eq("project", project)
        );
        self.select(PHOTOS_TABLE, &query).await
    }

    async fn get_photo(&self, id: i64) -> Result<Option<MaintenancePhoto>, BackendError> {
        let query = format!("select=*&{}", eq("id", &id.to_string()));
        let rows: Vec<MaintenancePhoto> = self.select(PHOTOS_TABLE, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn create_photos(
        &self,
        photos: &[NewMaintenancePhoto],
    ) -> Result<Vec<MaintenancePhoto>, BackendError> {
        if photos.is_empty() {
            return Ok(Vec::new());
        }
        self.write_json(
            Method::POST,
            &self.table_url(PHOTOS_TABLE, ""),
            "return=representation",
            photos,
        )
        .await
    }

    async fn delete_photo(&self, id: i64) -> Result<(), BackendError> {
        self.delete_where(PHOTOS_TABLE, &eq("id", &id.to_string()))
            .await
    }

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BackendError> {
        let resp = self
            .request(Method::POST, &self.object_url(bucket, path))?
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(status_error(resp).await)
        }
    }

    async fn download_object(&self, bucket: &str, path: &str) -> Result<Vec<u8>, BackendError> {
        let url = self.object_url(bucket, path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.request(Method::GET, &url)?.send().await {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(resp.bytes().await?.to_vec());
                }
                Ok(resp) if !resp.status().is_server_error() => {
                    return Err(status_error(resp).await);
                }
                Ok(resp) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(status_error(resp).await);
                    }
                }
                Err(e) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(e.into());
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(
                self.retry.base_backoff_ms.saturating_mul(attempt as u64),
            ))
            .await;
        }
    }

    async fn remove_object(&self, bucket: &str, path: &str) -> Result<(), BackendError> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, bucket);
        let resp = self
            .request(Method::DELETE, &url)?
            .json(&json!({ "prefixes": [path] }))
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(status_error(resp).await)
        }
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        if path.is_empty() {
            return String::new();
        }
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            bucket,
            encode_path(path)
        )
    }
}
