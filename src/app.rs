use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::backend::{Backend, HostedBackend, LocalBackend, RetryPolicy};
use crate::config::{BackendChoice, Config};
use crate::downloader;
use crate::eligibility::{
    AvailableOptions, MaintenanceOption, Selection, SubmittedKeys, available_options, is_open,
};
use crate::error::{AppError, StatusResponse};
use crate::grouping::{Group, group_by_location_prefix, group_by_thing};
use crate::login::{self, Session, SessionStore};
use crate::model::{
    MaintenancePhoto, MaintenanceRecord, MaintenanceSetting, NewMaintenancePhoto,
    NewMaintenanceRecord, PHOTO_BUCKET, PROJECT_PHOTO_BUCKET, Project, ProjectUpdate,
    catalog_from,
};
use crate::photos;
use crate::template::{self, TemplatePreview};

/// Largest accepted request body (photo batches)
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// URL prefix of the local storage tree
pub const LOCAL_STORAGE_PREFIX: &str = "/storage";

pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub config: Config,
    pub sessions: SessionStore,
    /// Served at [`LOCAL_STORAGE_PREFIX`] when objects live on local disk
    pub storage_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(backend: Arc<dyn Backend>, config: Config) -> Self {
        AppState {
            backend,
            config,
            sessions: SessionStore::default(),
            storage_dir: None,
        }
    }

    /// Build the state from validated settings
    ///
    /// # Errors
    /// * Configuration problems (placeholder or half-set service settings)
    /// * An unreadable local snapshot
    pub fn from_config(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        match config.validate()? {
            BackendChoice::Hosted { url, key } => {
                info!("using hosted backend at {}", url);
                let backend = HostedBackend::new(&url, &key, RetryPolicy::default());
                Ok(AppState::new(Arc::new(backend), config))
            }
            BackendChoice::Local { data_dir } => {
                let backend = LocalBackend::open(&data_dir, LOCAL_STORAGE_PREFIX)?;
                let storage_dir = backend.storage_dir();
                let mut state = AppState::new(Arc::new(backend), config);
                state.storage_dir = Some(storage_dir);
                Ok(state)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateProjectForm {
    #[serde(default)]
    base_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeasonForm {
    #[serde(default)]
    year_q: Option<String>,
    #[serde(default)]
    time_start: Option<chrono::NaiveDate>,
    #[serde(default)]
    time_finish: Option<chrono::NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct RecordForm {
    #[serde(default)]
    floor: String,
    #[serde(default)]
    thing: String,
    #[serde(default)]
    location: String,
}

#[derive(Debug, Deserialize)]
struct GroupQuery {
    by: Option<String>,
}

#[derive(Debug, Serialize)]
struct OptionsResponse {
    #[serde(flatten)]
    options: AvailableOptions,
    selection: Selection,
    /// Whether the full selection names an open inspection point
    submittable: bool,
}

#[derive(Debug, Serialize)]
struct PhotoView {
    #[serde(flatten)]
    photo: MaintenancePhoto,
    url: String,
}

#[derive(Debug, Serialize)]
struct ProjectView {
    #[serde(flatten)]
    project: Project,
    photo_url: String,
}

/// Build the router with every route of the API
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/me", get(login::handle_me))
        .route("/api/me/username", post(login::handle_set_username))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/template", get(template_preview))
        .route("/api/projects/:id", get(get_project).put(update_project))
        .route(
            "/api/projects/:id/season",
            get(list_season).put(upsert_season).delete(reset_season),
        )
        .route("/api/projects/:id/records", get(list_records).post(create_record))
        .route("/api/projects/:id/records/grouped", get(grouped_records))
        .route("/api/projects/:id/records/:record_id", delete(delete_record))
        .route("/api/projects/:id/options", get(options))
        .route("/api/projects/:id/photos", get(list_photos).post(submit_photos))
        .route("/api/projects/:id/photos/:photo_id", delete(delete_photo))
        .route("/api/projects/:id/export.xlsx", get(export_xlsx))
        .route("/api/projects/:id/export.csv", get(export_csv))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            login::require_auth,
        ));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/api/register", post(login::handle_register))
        .route("/api/login", post(login::handle_login))
        .route("/api/logout", post(login::handle_logout))
        .route("/api/users", get(login::list_users))
        .merge(protected);

    if let Some(dir) = &state.storage_dir {
        app = app.nest_service(LOCAL_STORAGE_PREFIX, ServeDir::new(dir));
    }
    if let Some(dir) = &state.config.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(middleware::from_fn(log_requests))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let address = config.address();
    let state = Arc::new(AppState::from_config(config)?);
    info!("backend: {}", state.backend.backend_tag());

    let app = router(state);

    // Start server
    let listener = TcpListener::bind(&address).await?;
    info!("Listening on http://{}", address);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    info!(
        "{} {} {} {}ms",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "backend": state.backend.backend_tag(),
    }))
}

async fn find_project(state: &AppState, id: i64) -> Result<Project, AppError> {
    state
        .backend
        .get_project(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("project {}", id)))
}

fn project_view(backend: &dyn Backend, project: Project) -> ProjectView {
    let photo_url = backend.public_url(
        PROJECT_PHOTO_BUCKET,
        project.photo_path.as_deref().unwrap_or_default(),
    );
    ProjectView { project, photo_url }
}

fn photo_view(backend: &dyn Backend, photo: MaintenancePhoto) -> PhotoView {
    let url = backend.public_url(PHOTO_BUCKET, photo.photo_path.as_deref().unwrap_or_default());
    PhotoView { photo, url }
}

async fn list_projects(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ProjectView>>, AppError> {
    let backend = state.backend.as_ref();
    let projects = backend.list_projects().await?;
    Ok(Json(
        projects
            .into_iter()
            .map(|p| project_view(backend, p))
            .collect(),
    ))
}

async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(form): Json<CreateProjectForm>,
) -> Result<(StatusCode, Json<ProjectView>), AppError> {
    let backend = state.backend.as_ref();
    let project = template::create_project_from_template(
        backend,
        state.config.template_project_id,
        form.base_name.as_deref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(project_view(backend, project))))
}

async fn template_preview(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TemplatePreview>, AppError> {
    let preview =
        template::preview_template(state.backend.as_ref(), state.config.template_project_id)
            .await?;
    Ok(Json(preview))
}

async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ProjectView>, AppError> {
    let project = find_project(&state, id).await?;
    Ok(Json(project_view(state.backend.as_ref(), project)))
}

async fn update_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(update): Json<ProjectUpdate>,
) -> Result<Json<ProjectView>, AppError> {
    if update.name.trim().is_empty() {
        return Err(AppError::BadRequest("project name is required".to_string()));
    }
    find_project(&state, id).await?;
    let project = state.backend.update_project(id, &update).await?;
    info!("updated project {}", project.name);
    Ok(Json(project_view(state.backend.as_ref(), project)))
}

async fn list_season(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<MaintenanceSetting>>, AppError> {
    let project = find_project(&state, id).await?;
    Ok(Json(state.backend.settings_for_project(&project.name).await?))
}

async fn upsert_season(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(form): Json<SeasonForm>,
) -> Result<Json<MaintenanceSetting>, AppError> {
    let project = find_project(&state, id).await?;
    let setting = MaintenanceSetting {
        id: None,
        name: project.name,
        year_q: form.year_q.filter(|q| !q.trim().is_empty()),
        time_start: form.time_start,
        time_finish: form.time_finish,
    };
    setting.validate()?;
    Ok(Json(state.backend.upsert_setting(&setting).await?))
}

/// Drop every season window of the project
async fn reset_season(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<StatusResponse>, AppError> {
    let project = find_project(&state, id).await?;
    state
        .backend
        .delete_settings_for_project(&project.name)
        .await?;
    info!("season windows of {} reset", project.name);
    Ok(Json(StatusResponse::ok(format!(
        "season windows of {} removed",
        project.name
    ))))
}

async fn list_records(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<MaintenanceRecord>>, AppError> {
    let project = find_project(&state, id).await?;
    Ok(Json(state.backend.records_for_project(&project.name).await?))
}

async fn create_record(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
    Json(form): Json<RecordForm>,
) -> Result<(StatusCode, Json<MaintenanceRecord>), AppError> {
    let project = find_project(&state, id).await?;
    let author = login::display_name(state.backend.as_ref(), &session.email).await;
    let record = NewMaintenanceRecord::for_project(
        &project,
        &form.floor,
        &form.thing,
        &form.location,
        Utc::now().date_naive(),
        &author,
    )?;
    let created = state.backend.create_record(&record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_record(
    State(state): State<Arc<AppState>>,
    Path((id, record_id)): Path<(i64, i64)>,
) -> Result<Json<StatusResponse>, AppError> {
    let project = find_project(&state, id).await?;
    let records = state.backend.records_for_project(&project.name).await?;
    if !records.iter().any(|r| r.id == record_id) {
        return Err(AppError::NotFound(format!("record {}", record_id)));
    }
    state.backend.delete_record(record_id).await?;
    Ok(Json(StatusResponse::ok(format!("deleted record {}", record_id))))
}

async fn grouped_records(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<GroupQuery>,
) -> Result<Json<Vec<Group<MaintenanceRecord>>>, AppError> {
    let project = find_project(&state, id).await?;
    let records = state.backend.records_for_project(&project.name).await?;
    let groups = match query.by.as_deref().unwrap_or("location") {
        "location" => group_by_location_prefix(records),
        "thing" => group_by_thing(records),
        other => {
            return Err(AppError::BadRequest(format!(
                "cannot group by {}; use location or thing",
                other
            )));
        }
    };
    Ok(Json(groups))
}

/// Catalog and submitted set of a project; a failed fetch counts as empty
async fn eligibility_inputs(
    backend: &dyn Backend,
    project: &str,
) -> (Vec<MaintenanceOption>, SubmittedKeys) {
    let catalog = match backend.records_for_project(project).await {
        Ok(records) => catalog_from(&records),
        Err(e) => {
            warn!("catalog of {} unavailable: {}", project, e);
            Vec::new()
        }
    };
    let submitted = match backend.photos_for_project(project).await {
        Ok(photos) => SubmittedKeys::from_options(&catalog_from(&photos)),
        Err(e) => {
            warn!("submissions of {} unavailable: {}", project, e);
            SubmittedKeys::new()
        }
    };
    (catalog, submitted)
}

async fn options(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<Selection>,
) -> Result<Json<OptionsResponse>, AppError> {
    let project = find_project(&state, id).await?;
    let (catalog, submitted) = eligibility_inputs(state.backend.as_ref(), &project.name).await;

    // Re-apply the choice top-down so stale descendants are dropped
    let mut selection = Selection::new();
    selection.select_floor(query.floor.filter(|f| !f.is_empty()));
    selection.select_thing(query.thing.filter(|t| !t.is_empty()));
    selection.select_location(query.location.filter(|l| !l.is_empty()));

    let options = available_options(&catalog, &submitted, &selection);
    let submittable = match (&selection.floor, &selection.thing, &selection.location) {
        (Some(floor), Some(thing), Some(location)) => {
            is_open(&catalog, &submitted, floor, thing, location)
        }
        _ => false,
    };

    Ok(Json(OptionsResponse {
        options,
        selection,
        submittable,
    }))
}

async fn list_photos(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<PhotoView>>, AppError> {
    let project = find_project(&state, id).await?;
    let backend = state.backend.as_ref();
    let photos = backend.photos_for_project(&project.name).await?;
    Ok(Json(
        photos.into_iter().map(|p| photo_view(backend, p)).collect(),
    ))
}

/// Accept a photo batch for one inspection point
///
/// Text fields `floor`, `thing` and `location` name the point; every file
/// field is a photo. The point must be in the catalog and not yet submitted.
async fn submit_photos(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Vec<PhotoView>>), AppError> {
    let project = find_project(&state, id).await?;
    let backend = state.backend.as_ref();

    let mut floor = String::new();
    let mut thing = String::new();
    let mut location = String::new();
    let mut uploads = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if let Some(file_name) = field.file_name().map(str::to_string) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            // An empty file input still sends a nameless, empty part
            if file_name.is_empty() && bytes.is_empty() {
                continue;
            }
            uploads.push(photos::validate_upload(&file_name, bytes.to_vec())?);
            continue;
        }
        let value = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        match name.as_str() {
            "floor" => floor = value.trim().to_string(),
            "thing" => thing = value.trim().to_string(),
            "location" => location = value.trim().to_string(),
            _ => {}
        }
    }

    if floor.is_empty() || thing.is_empty() || location.is_empty() {
        return Err(AppError::BadRequest(
            "floor, thing and location are required".to_string(),
        ));
    }
    if uploads.is_empty() {
        return Err(AppError::BadRequest("no photos uploaded".to_string()));
    }

    let records = backend.records_for_project(&project.name).await?;
    let submitted = backend.photos_for_project(&project.name).await?;
    let submitted = SubmittedKeys::from_options(&catalog_from(&submitted));
    if !is_open(&catalog_from(&records), &submitted, &floor, &thing, &location) {
        return Err(AppError::Conflict(format!(
            "{} / {} / {} is not open for submission",
            floor, thing, location
        )));
    }

    let millis = Utc::now().timestamp_millis();
    let author = login::display_name(backend, &session.email).await;
    let mut stored: Vec<String> = Vec::new();
    let mut rows = Vec::new();

    for (i, upload) in uploads.into_iter().enumerate() {
        let path = photos::object_path(&project.name, millis, i, &upload.extension);
        if let Err(e) = backend
            .upload_object(PHOTO_BUCKET, &path, upload.bytes, upload.content_type)
            .await
        {
            discard_objects(backend, &stored).await;
            return Err(e.into());
        }
        stored.push(path.clone());
        rows.push(NewMaintenancePhoto {
            project: project.name.clone(),
            floor: floor.clone(),
            thing: thing.clone(),
            location: location.clone(),
            photo_path: path,
            photo_name: upload.file_name,
            maintenance_time: Some(Utc::now().to_rfc3339()),
            maintenance_user: Some(author.clone()),
        });
    }

    let created = match backend.create_photos(&rows).await {
        Ok(created) => created,
        Err(e) => {
            discard_objects(backend, &stored).await;
            return Err(e.into());
        }
    };
    info!(
        "{} submitted {} photo(s) for {}|{}|{} in {}",
        session.email,
        created.len(),
        floor,
        thing,
        location,
        project.name
    );

    Ok((
        StatusCode::CREATED,
        Json(
            created
                .into_iter()
                .map(|p| photo_view(backend, p))
                .collect(),
        ),
    ))
}

async fn discard_objects(backend: &dyn Backend, paths: &[String]) {
    for path in paths {
        if let Err(e) = backend.remove_object(PHOTO_BUCKET, path).await {
            warn!("could not remove orphaned object {}: {}", path, e);
        }
    }
}

async fn delete_photo(
    State(state): State<Arc<AppState>>,
    Path((id, photo_id)): Path<(i64, i64)>,
) -> Result<Json<StatusResponse>, AppError> {
    let project = find_project(&state, id).await?;
    let photo = state
        .backend
        .get_photo(photo_id)
        .await?
        .filter(|p| p.project == project.name)
        .ok_or_else(|| AppError::NotFound(format!("photo {}", photo_id)))?;

    state.backend.delete_photo(photo.id).await?;
    if let Some(path) = photo.photo_path.as_deref().filter(|p| !p.is_empty()) {
        if let Err(e) = state.backend.remove_object(PHOTO_BUCKET, path).await {
            warn!("photo {} deleted but object {} kept: {}", photo.id, path, e);
        }
    }
    Ok(Json(StatusResponse::ok(format!("deleted photo {}", photo_id))))
}

async fn export_xlsx(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let project = find_project(&state, id).await?;
    let export = downloader::export_project(state.backend.as_ref(), &project).await?;
    info!("exported {} ({} bytes)", export.file_name, export.bytes.len());

    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&export.file_name)
    );
    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string(),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export.bytes,
    )
        .into_response())
}

async fn export_csv(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let project = find_project(&state, id).await?;
    let csv = downloader::export_project_csv(state.backend.as_ref(), &project).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        csv,
    )
        .into_response())
}
