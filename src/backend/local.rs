use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, create_dir_all};
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use uuid::Uuid;

use super::{AuthUser, Backend, BackendError};
use crate::model::{
    MaintenancePhoto, MaintenanceRecord, MaintenanceSetting, NewMaintenancePhoto,
    NewMaintenanceRecord, NewProject, Project, ProjectUpdate, UserName,
};
use crate::saving;

const SNAPSHOT_FILE: &str = "tables.bin.gz";
const STORAGE_DIR: &str = "storage";
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalUser {
    id: String,
    email: String,
    password_hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    next_id: i64,
    users: Vec<LocalUser>,
    user_names: Vec<UserName>,
    projects: Vec<Project>,
    settings: Vec<MaintenanceSetting>,
    records: Vec<MaintenanceRecord>,
    photos: Vec<MaintenancePhoto>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// File-backed stand-in for the hosted service.
///
/// Tables live in memory and are written to `<root>/tables.bin.gz` after every
/// change; objects are plain files under `<root>/storage/<bucket>/`.
pub struct LocalBackend {
    root: PathBuf,
    public_base: String,
    tables: RwLock<Tables>,
}

impl LocalBackend {
    /// Open (or create) a local store
    ///
    /// # Arguments
    /// * `root` - Directory holding the snapshot and the storage tree
    /// * `public_base` - URL prefix under which the storage tree is served
    ///
    /// # Returns
    /// * `Result<LocalBackend, BackendError>` - The store, or an error if the snapshot is unreadable
    pub fn open(root: impl Into<PathBuf>, public_base: &str) -> Result<Self, BackendError> {
        let root = root.into();
        create_dir_all(root.join(STORAGE_DIR))?;
        let tables: Tables = saving::load_or_default(&root.join(SNAPSHOT_FILE))
            .map_err(|e| BackendError::Snapshot(e.to_string()))?;
        info!(
            "local store at {} ({} projects)",
            root.display(),
            tables.projects.len()
        );
        Ok(LocalBackend {
            root,
            public_base: public_base.trim_end_matches('/').to_string(),
            tables: RwLock::new(tables),
        })
    }

    /// Directory served at the public storage prefix
    pub fn storage_dir(&self) -> PathBuf {
        self.root.join(STORAGE_DIR)
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, BackendError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| BackendError::Snapshot("table lock poisoned".to_string()))?;
        Ok(f(&*tables))
    }

    /// Apply a change to a staged copy of the tables
    ///
    /// The copy replaces the live tables only once its snapshot is on disk, so
    /// a failing `f` or a failed save leaves the store as it was.
    fn write<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<R, BackendError>,
    ) -> Result<R, BackendError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| BackendError::Snapshot("table lock poisoned".to_string()))?;
        let mut staged = tables.clone();
        let result = f(&mut staged)?;
        saving::save_snapshot(&staged, &self.root.join(SNAPSHOT_FILE))
            .map_err(|e| BackendError::Snapshot(e.to_string()))?;
        *tables = staged;
        Ok(result)
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf, BackendError> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe || bucket.is_empty() || bucket.contains(['/', '\\', '.']) {
            return Err(BackendError::InvalidPath(format!("{bucket}/{path}")));
        }
        Ok(self.storage_dir().join(bucket).join(relative))
    }
}

fn hash_password(password: &str) -> Result<String, BackendError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    match argon2.hash_password(password.as_bytes(), &salt) {
        Ok(hash) => Ok(hash.to_string()),
        Err(_) => Err(BackendError::Auth("password hashing failed".to_string())),
    }
}

fn verify_password(password: &str, hash: &str) -> Result<bool, BackendError> {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(hash) => hash,
        Err(_) => return Err(BackendError::Auth("invalid password hash format".to_string())),
    };

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false),
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn backend_tag(&self) -> &'static str {
        "local"
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, BackendError> {
        if !email.contains('@') {
            return Err(BackendError::Auth("invalid email address".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(BackendError::Auth(format!(
                "password should be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let password_hash = hash_password(password)?;
        self.write(|tables| {
            if tables.users.iter().any(|u| u.email.eq_ignore_ascii_case(email)) {
                return Err(BackendError::Conflict(format!("user {email}")));
            }
            let user = LocalUser {
                id: Uuid::new_v4().to_string(),
                email: email.to_string(),
                password_hash,
            };
            let auth = AuthUser {
                id: user.id.clone(),
                email: user.email.clone(),
            };
            tables.users.push(user);
            Ok(auth)
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, BackendError> {
        let user = self.read(|tables| {
            tables
                .users
                .iter()
                .find(|u| u.email.eq_ignore_ascii_case(email))
                .cloned()
        })?;
        let invalid = || BackendError::Auth("invalid login credentials".to_string());
        let user = user.ok_or_else(invalid)?;
        if verify_password(password, &user.password_hash)? {
            Ok(AuthUser {
                id: user.id,
                email: user.email,
            })
        } else {
            Err(invalid())
        }
    }

    async fn list_user_names(&self) -> Result<Vec<UserName>, BackendError> {
        self.read(|tables| tables.user_names.clone())
    }

    async fn user_name_by_email(&self, email: &str) -> Result<Option<UserName>, BackendError> {
        self.read(|tables| tables.user_names.iter().find(|u| u.email == email).cloned())
    }

    async fn user_name_by_user(&self, user: &str) -> Result<Option<UserName>, BackendError> {
        self.read(|tables| tables.user_names.iter().find(|u| u.user == user).cloned())
    }

    async fn create_user_name(&self, entry: &UserName) -> Result<(), BackendError> {
        self.write(|tables| {
            if tables.user_names.iter().any(|u| u.user == entry.user) {
                return Err(BackendError::Conflict(format!("user name {}", entry.user)));
            }
            tables.user_names.push(entry.clone());
            Ok(())
        })
    }

    async fn list_projects(&self) -> Result<Vec<Project>, BackendError> {
        self.read(|tables| tables.projects.clone())
    }

    async fn get_project(&self, id: i64) -> Result<Option<Project>, BackendError> {
        self.read(|tables| tables.projects.iter().find(|p| p.id == id).cloned())
    }

    async fn create_project(&self, project: &NewProject) -> Result<Project, BackendError> {
        self.write(|tables| {
            if tables.projects.iter().any(|p| p.name == project.name) {
                return Err(BackendError::Conflict(format!("project {}", project.name)));
            }
            let created = Project {
                id: tables.allocate_id(),
                name: project.name.clone(),
                unit: project.unit.clone(),
                directions: project.directions.clone(),
                photo_path: project.photo_path.clone(),
            };
            tables.projects.push(created.clone());
            Ok(created)
        })
    }

    async fn update_project(
        &self,
        id: i64,
        update: &ProjectUpdate,
    ) -> Result<Project, BackendError> {
        self.write(|tables| {
            let project = tables
                .projects
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| BackendError::NotFound(format!("project {id}")))?;
            project.name = update.name.clone();
            project.unit = update.unit.clone();
            project.directions = update.directions.clone();
            Ok(project.clone())
        })
    }

    async fn settings_for_project(
        &self,
        project: &str,
    ) -> Result<Vec<MaintenanceSetting>, BackendError> {
        self.read(|tables| {
            tables
                .settings
                .iter()
                .filter(|s| s.name == project)
                .cloned()
                .collect()
        })
    }

    async fn upsert_setting(
        &self,
        setting: &MaintenanceSetting,
    ) -> Result<MaintenanceSetting, BackendError> {
        self.write(|tables| {
            let key = setting.conflict_key();
            if let Some(existing) = tables
                .settings
                .iter_mut()
                .find(|s| s.conflict_key() == key)
            {
                let id = existing.id;
                *existing = setting.clone();
                existing.id = id;
                return Ok(existing.clone());
            }
            let mut created = setting.clone();
            created.id = Some(tables.allocate_id());
            tables.settings.push(created.clone());
            Ok(created)
        })
    }

    async fn delete_settings_for_project(&self, project: &str) -> Result<(), BackendError> {
        self.write(|tables| {
            tables.settings.retain(|s| s.name != project);
            Ok(())
        })
    }

    async fn create_record(
        &self,
        record: &NewMaintenanceRecord,
    ) -> Result<MaintenanceRecord, BackendError> {
        self.write(|tables| {
            let created = MaintenanceRecord {
                id: tables.allocate_id(),
                thing: Some(record.thing.clone()),
                location: Some(record.location.clone()),
                floor: Some(record.floor.clone()),
                created_on: Some(record.created_on),
                created_by: Some(record.created_by.clone()),
                project: record.project.clone(),
                company: record.company.clone(),
                direction: record.direction.clone(),
            };
            tables.records.push(created.clone());
            Ok(created)
        })
    }

    async fn records_for_project(
        &self,
        project: &str,
    ) -> Result<Vec<MaintenanceRecord>, BackendError> {
        self.read(|tables| {
            tables
                .records
                .iter()
                .filter(|r| r.project == project)
                .cloned()
                .collect()
        })
    }

    async fn delete_record(&self, id: i64) -> Result<(), BackendError> {
        self.write(|tables| {
            tables.records.retain(|r| r.id != id);
            Ok(())
        })
    }

    async fn photos_for_project(
        &self,
        project: &str,
    ) -> Result<Vec<MaintenancePhoto>, BackendError> {
        let mut photos: Vec<MaintenancePhoto> = self.read(|tables| {
            tables
                .photos
                .iter()
                .filter(|p| p.project == project)
                .cloned()
                .collect()
        })?;
        photos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(photos)
    }

    async fn get_photo(&self, id: i64) -> Result<Option<MaintenancePhoto>, BackendError> {
        self.read(|tables| tables.photos.iter().find(|p| p.id == id).cloned())
    }

    async fn create_photos(
        &self,
        photos: &[NewMaintenancePhoto],
    ) -> Result<Vec<MaintenancePhoto>, BackendError> {
        self.write(|tables| {
            let now = Utc::now();
            let created: Vec<MaintenancePhoto> = photos
                .iter()
                .map(|p| MaintenancePhoto {
                    id: tables.allocate_id(),
                    project: p.project.clone(),
                    floor: Some(p.floor.clone()),
                    thing: Some(p.thing.clone()),
                    location: Some(p.location.clone()),
                    photo_path: Some(p.photo_path.clone()),
                    photo_name: Some(p.photo_name.clone()),
                    maintenance_time: p.maintenance_time.clone(),
                    maintenance_user: p.maintenance_user.clone(),
                    created_at: Some(now),
                })
                .collect();
            tables.photos.extend(created.iter().cloned());
            Ok(created)
        })
    }

    async fn delete_photo(&self, id: i64) -> Result<(), BackendError> {
        self.write(|tables| {
            tables.photos.retain(|p| p.id != id);
            Ok(())
        })
    }

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), BackendError> {
        let target = self.object_path(bucket, path)?;
        if target.exists() {
            return Err(BackendError::Conflict(format!("object {bucket}/{path}")));
        }
        if let Some(parent) = target.parent() {
            create_dir_all(parent)?;
        }
        fs::write(&target, bytes)?;
        Ok(())
    }

    async fn download_object(&self, bucket: &str, path: &str) -> Result<Vec<u8>, BackendError> {
        let target = self.object_path(bucket, path)?;
        match fs::read(&target) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackendError::NotFound(format!("object {bucket}/{path}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_object(&self, bucket: &str, path: &str) -> Result<(), BackendError> {
        let target = self.object_path(bucket, path)?;
        match fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        if path.is_empty() {
            return String::new();
        }
        let encoded: Vec<String> = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}/{}", self.public_base, bucket, encoded.join("/"))
    }
}
