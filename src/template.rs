use chrono::Utc;
use log::{info, warn};
use rand::Rng;
use serde::Serialize;

use crate::backend::{Backend, BackendError};
use crate::model::{MaintenanceSetting, NewProject, PROJECT_PHOTO_BUCKET, Project};
use crate::photos;

pub const DEFAULT_BASE_NAME: &str = "新專案";
pub const DEFAULT_UNIT: &str = "預設單位";
pub const DEFAULT_DIRECTIONS: &str = "預設說明";

const SUFFIX_LEN: usize = 6;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// What a new project will inherit from the template
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplatePreview {
    pub name: String,
    pub unit: Option<String>,
    pub directions: Option<String>,
    pub settings_count: usize,
    pub has_photo: bool,
}

/// Name and storage identifier of a project created at `millis`
///
/// # Examples
/// ```
/// use maintenance::template::project_identity;
///
/// let (name, identifier) = project_identity("Tower", 1700000000000, "a1b2c3");
/// assert_eq!(name, "Tower_1700000000000");
/// assert_eq!(identifier, "1700000000000_a1b2c3");
/// ```
pub fn project_identity(base: &str, millis: i64, suffix: &str) -> (String, String) {
    (
        format!("{}_{}", base, millis),
        format!("{}_{}", millis, suffix),
    )
}

/// Six random base-36 characters
pub fn random_suffix<R: Rng>(rng: &mut R) -> String {
    (0..SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

async fn load_template(
    backend: &dyn Backend,
    template_id: i64,
) -> Result<(Project, Vec<MaintenanceSetting>), BackendError> {
    let template = backend
        .get_project(template_id)
        .await?
        .ok_or_else(|| BackendError::NotFound(format!("template project {}", template_id)))?;
    let settings = backend.settings_for_project(&template.name).await?;
    Ok((template, settings))
}

pub async fn preview_template(
    backend: &dyn Backend,
    template_id: i64,
) -> Result<TemplatePreview, BackendError> {
    let (template, settings) = load_template(backend, template_id).await?;
    Ok(TemplatePreview {
        has_photo: template.photo_path.as_deref().is_some_and(|p| !p.is_empty()),
        name: template.name,
        unit: template.unit,
        directions: template.directions,
        settings_count: settings.len(),
    })
}

/// Create a project by copying the template project
///
/// The cover photo and the season windows are copied on a best-effort basis:
/// failures are logged and the project is still created.
///
/// # Arguments
/// * `backend` - Where the template lives and the copy goes
/// * `template_id` - Id of the project to copy
/// * `base_name` - Prefix of the new name, [`DEFAULT_BASE_NAME`] when None or blank
///
/// # Errors
/// * `BackendError::NotFound` when the template project does not exist
pub async fn create_project_from_template(
    backend: &dyn Backend,
    template_id: i64,
    base_name: Option<&str>,
) -> Result<Project, BackendError> {
    let (template, settings) = load_template(backend, template_id).await?;

    let base = base_name
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or(DEFAULT_BASE_NAME);
    let suffix = random_suffix(&mut rand::thread_rng());
    let (name, identifier) = project_identity(base, Utc::now().timestamp_millis(), &suffix);

    let photo_path = match template.photo_path.as_deref().filter(|p| !p.is_empty()) {
        Some(source) => copy_cover_photo(backend, source, &identifier).await,
        None => None,
    };

    let unit = format!(
        "{}_{}",
        template.unit.as_deref().filter(|u| !u.is_empty()).unwrap_or(DEFAULT_UNIT),
        identifier
    );
    let directions = template
        .directions
        .clone()
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIONS.to_string());

    let project = backend
        .create_project(&NewProject {
            name: name.clone(),
            unit: Some(unit),
            directions: Some(directions),
            photo_path,
        })
        .await?;

    for setting in settings {
        let copy = MaintenanceSetting {
            id: None,
            name: name.clone(),
            ..setting
        };
        if let Err(e) = backend.upsert_setting(&copy).await {
            warn!("season window {:?} not copied to {}: {}", copy.year_q, name, e);
        }
    }

    info!("created project {} from template {}", project.name, template.name);
    Ok(project)
}

async fn copy_cover_photo(backend: &dyn Backend, source: &str, identifier: &str) -> Option<String> {
    let extension = source
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && !ext.contains('/'))
        .unwrap_or("jpg");
    let target = format!("{}.{}", identifier, extension);

    let bytes = match backend.download_object(PROJECT_PHOTO_BUCKET, source).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("cover photo {} could not be downloaded: {}", source, e);
            return None;
        }
    };
    let content_type = image::guess_format(&bytes)
        .map(photos::content_type)
        .unwrap_or("application/octet-stream");

    match backend
        .upload_object(PROJECT_PHOTO_BUCKET, &target, bytes, content_type)
        .await
    {
        Ok(()) => Some(target),
        Err(e) => {
            warn!("cover photo copy to {} failed: {}", target, e);
            None
        }
    }
}
