use chrono::NaiveDate;
use maintenance::backend::{Backend, BackendError, LocalBackend};
use maintenance::model::{
    MaintenanceSetting, NewMaintenancePhoto, NewMaintenanceRecord, NewProject, Project,
    ProjectUpdate, UserName,
};

fn open(dir: &tempfile::TempDir) -> LocalBackend {
    LocalBackend::open(dir.path(), "/storage").unwrap()
}

fn new_project(name: &str) -> NewProject {
    NewProject {
        name: name.to_string(),
        unit: Some("ACME".to_string()),
        directions: None,
        photo_path: None,
    }
}

fn photo(project: &str, location: &str) -> NewMaintenancePhoto {
    NewMaintenancePhoto {
        project: project.to_string(),
        floor: "1F".to_string(),
        thing: "Elevator".to_string(),
        location: location.to_string(),
        photo_path: format!("{}/1_{}.png", project, location),
        photo_name: format!("{}.png", location),
        maintenance_time: None,
        maintenance_user: Some("amy".to_string()),
    }
}

#[tokio::test]
async fn accounts_sign_up_and_in() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&dir);

    let user = backend.sign_up("amy@example.com", "secret1").await.unwrap();
    let signed_in = backend.sign_in("amy@example.com", "secret1").await.unwrap();
    assert_eq!(user, signed_in);

    assert!(matches!(
        backend.sign_in("amy@example.com", "wrong-password").await,
        Err(BackendError::Auth(_))
    ));
    assert!(matches!(
        backend.sign_up("amy@example.com", "another1").await,
        Err(BackendError::Conflict(_))
    ));
    assert!(matches!(
        backend.sign_up("bob@example.com", "123").await,
        Err(BackendError::Auth(_))
    ));
}

#[tokio::test]
async fn settings_upsert_on_name_and_quarter() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&dir);
    let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap();

    let first = backend
        .upsert_setting(&MaintenanceSetting {
            id: None,
            name: "Tower".to_string(),
            year_q: Some("2024Q1".to_string()),
            time_start: Some(day(1)),
            time_finish: Some(day(10)),
        })
        .await
        .unwrap();
    let second = backend
        .upsert_setting(&MaintenanceSetting {
            id: None,
            name: "Tower".to_string(),
            year_q: Some("2024Q1".to_string()),
            time_start: Some(day(2)),
            time_finish: Some(day(20)),
        })
        .await
        .unwrap();

    assert!(first.id.is_some());
    assert_eq!(first.id, second.id);
    let settings = backend.settings_for_project("Tower").await.unwrap();
    assert_eq!(settings.len(), 1);
    assert_eq!(settings[0].time_finish, Some(day(20)));
}

#[tokio::test]
async fn tables_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let created: Project = {
        let backend = open(&dir);
        let project = backend.create_project(&new_project("Tower")).await.unwrap();
        backend
            .create_user_name(&UserName {
                user: "amy".to_string(),
                email: "amy@example.com".to_string(),
            })
            .await
            .unwrap();
        project
    };

    let backend = open(&dir);
    assert_eq!(backend.get_project(created.id).await.unwrap(), Some(created.clone()));
    assert!(backend.user_name_by_user("amy").await.unwrap().is_some());

    let next = backend.create_project(&new_project("Mall")).await.unwrap();
    assert!(next.id > created.id);
}

#[tokio::test]
async fn projects_update_and_reject_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&dir);
    let project = backend.create_project(&new_project("Tower")).await.unwrap();

    assert!(matches!(
        backend.create_project(&new_project("Tower")).await,
        Err(BackendError::Conflict(_))
    ));

    let updated = backend
        .update_project(
            project.id,
            &ProjectUpdate {
                name: "Tower B".to_string(),
                unit: Some("Lift Co".to_string()),
                directions: Some("Check doors".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Tower B");
    assert_eq!(updated.photo_path, None);

    assert!(matches!(
        backend
            .update_project(
                999,
                &ProjectUpdate {
                    name: "x".to_string(),
                    unit: None,
                    directions: None
                }
            )
            .await,
        Err(BackendError::NotFound(_))
    ));
}

#[tokio::test]
async fn records_and_photos_are_scoped_to_their_project() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&dir);
    let tower = backend.create_project(&new_project("Tower")).await.unwrap();
    let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

    let record = NewMaintenanceRecord::for_project(&tower, "1F", "Elevator", "A", day, "amy")
        .unwrap();
    let created = backend.create_record(&record).await.unwrap();
    assert_eq!(created.company.as_deref(), Some("ACME"));
    assert_eq!(backend.records_for_project("Tower").await.unwrap().len(), 1);
    assert!(backend.records_for_project("Mall").await.unwrap().is_empty());

    backend.create_photos(&[photo("Tower", "A")]).await.unwrap();
    backend.create_photos(&[photo("Tower", "B")]).await.unwrap();
    backend.create_photos(&[photo("Mall", "C")]).await.unwrap();

    let photos = backend.photos_for_project("Tower").await.unwrap();
    let locations: Vec<&str> = photos
        .iter()
        .map(|p| p.location.as_deref().unwrap())
        .collect();
    assert_eq!(locations, vec!["B", "A"]);

    backend.delete_photo(photos[0].id).await.unwrap();
    assert!(backend.get_photo(photos[0].id).await.unwrap().is_none());
    backend.delete_record(created.id).await.unwrap();
    assert!(backend.records_for_project("Tower").await.unwrap().is_empty());
}

#[tokio::test]
async fn objects_round_trip_and_paths_stay_inside_storage() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&dir);

    backend
        .upload_object("photos", "Tower/1_0.png", b"png bytes".to_vec(), "image/png")
        .await
        .unwrap();
    assert_eq!(
        backend.download_object("photos", "Tower/1_0.png").await.unwrap(),
        b"png bytes".to_vec()
    );
    assert!(matches!(
        backend
            .upload_object("photos", "Tower/1_0.png", Vec::new(), "image/png")
            .await,
        Err(BackendError::Conflict(_))
    ));

    assert!(matches!(
        backend
            .upload_object("photos", "../escape.png", Vec::new(), "image/png")
            .await,
        Err(BackendError::InvalidPath(_))
    ));
    assert!(matches!(
        backend.download_object("photos", "/etc/passwd").await,
        Err(BackendError::InvalidPath(_))
    ));
    assert!(matches!(
        backend
            .upload_object("../photos", "x.png", Vec::new(), "image/png")
            .await,
        Err(BackendError::InvalidPath(_))
    ));
    assert!(!dir.path().join("escape.png").exists());

    backend.remove_object("photos", "Tower/1_0.png").await.unwrap();
    backend.remove_object("photos", "Tower/1_0.png").await.unwrap();
    assert!(matches!(
        backend.download_object("photos", "Tower/1_0.png").await,
        Err(BackendError::NotFound(_))
    ));

    assert_eq!(
        backend.public_url("photos", "Tower A/1_0.png"),
        "/storage/photos/Tower%20A/1_0.png"
    );
    assert_eq!(backend.public_url("photos", ""), "");
}

#[tokio::test]
async fn failed_snapshot_leaves_tables_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&dir);
    let tower = backend.create_project(&new_project("Tower")).await.unwrap();

    // A directory where the snapshot's temporary file goes makes every save fail
    std::fs::create_dir(dir.path().join("tables.bin.tmp")).unwrap();
    assert!(matches!(
        backend.create_project(&new_project("Mall")).await,
        Err(BackendError::Snapshot(_))
    ));
    assert!(backend.create_photos(&[photo("Tower", "A")]).await.is_err());

    assert_eq!(backend.list_projects().await.unwrap(), vec![tower.clone()]);
    assert!(backend.photos_for_project("Tower").await.unwrap().is_empty());

    std::fs::remove_dir(dir.path().join("tables.bin.tmp")).unwrap();
    let mall = backend.create_project(&new_project("Mall")).await.unwrap();
    assert_eq!(mall.id, tower.id + 1);
}

#[tokio::test]
async fn season_reset_only_touches_its_project() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&dir);
    for (name, quarter) in [("Tower", "2024Q1"), ("Tower", "2024Q2"), ("Mall", "2024Q1")] {
        backend
            .upsert_setting(&MaintenanceSetting {
                id: None,
                name: name.to_string(),
                year_q: Some(quarter.to_string()),
                time_start: None,
                time_finish: None,
            })
            .await
            .unwrap();
    }

    backend.delete_settings_for_project("Tower").await.unwrap();
    assert!(backend.settings_for_project("Tower").await.unwrap().is_empty());
    assert_eq!(backend.settings_for_project("Mall").await.unwrap().len(), 1);

    let reopened = open(&dir);
    assert!(reopened.settings_for_project("Tower").await.unwrap().is_empty());
}
