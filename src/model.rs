use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::eligibility::MaintenanceOption;

/// Table holding project cards
pub const PROJECTS_TABLE: &str = "home_project_card";
/// Table mapping display names to account emails
pub const USER_NAMES_TABLE: &str = "user_names";
/// Table holding season windows per project
pub const SETTINGS_TABLE: &str = "maintainance_setting";
/// Table holding the inspection points of each project
pub const RECORDS_TABLE: &str = "maintainance_data";
/// Table holding submitted inspection photos
pub const PHOTOS_TABLE: &str = "maintainance_photo";

/// Bucket for submitted inspection photos
pub const PHOTO_BUCKET: &str = "maintainance-data-photo";
/// Bucket for project cover photos
pub const PROJECT_PHOTO_BUCKET: &str = "home-project-card-photo";

/// A maintenance site as stored in the project card table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub directions: Option<String>,
    #[serde(default)]
    pub photo_path: Option<String>,
}

/// Insert payload for a project card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub unit: Option<String>,
    pub directions: Option<String>,
    pub photo_path: Option<String>,
}

/// Editable project information (name, inspection unit, directions)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectUpdate {
    pub name: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub directions: Option<String>,
}

/// Display name registered for an account email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserName {
    pub user: String,
    pub email: String,
}

impl UserName {
    /// Names that look like emails are not offered for login autocomplete
    pub fn is_plain_name(&self) -> bool {
        !self.user.is_empty() && !self.user.contains('@')
    }
}

/// A season window for a project.
///
/// `name` is the project name; `(name, year_q)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceSetting {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub year_q: Option<String>,
    #[serde(default)]
    pub time_start: Option<NaiveDate>,
    #[serde(default)]
    pub time_finish: Option<NaiveDate>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("window must finish after it starts ({start} >= {finish})")]
    WindowOrder { start: NaiveDate, finish: NaiveDate },
}

impl MaintenanceSetting {
    /// Check that a window with both dates finishes strictly after it starts
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Missing("name"));
        }
        if let (Some(start), Some(finish)) = (self.time_start, self.time_finish) {
            if start >= finish {
                return Err(ValidationError::WindowOrder { start, finish });
            }
        }
        Ok(())
    }

    /// Upsert conflict key
    pub fn conflict_key(&self) -> (&str, Option<&str>) {
        (self.name.as_str(), self.year_q.as_deref())
    }

    /// Whether the window covers a given day (open-ended sides always match)
    pub fn covers(&self, day: NaiveDate) -> bool {
        self.time_start.is_none_or(|start| start <= day)
            && self.time_finish.is_none_or(|finish| day <= finish)
    }
}

/// An inspection point defined for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub id: i64,
    #[serde(default)]
    pub thing: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub floor: Option<String>,
    #[serde(rename = "creat_at", default)]
    pub created_on: Option<NaiveDate>,
    #[serde(rename = "creat_user", default)]
    pub created_by: Option<String>,
    pub project: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
}

/// Insert payload for an inspection point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMaintenanceRecord {
    pub thing: String,
    pub location: String,
    pub floor: String,
    #[serde(rename = "creat_at")]
    pub created_on: NaiveDate,
    #[serde(rename = "creat_user")]
    pub created_by: String,
    pub project: String,
    pub company: Option<String>,
    pub direction: Option<String>,
}

impl NewMaintenanceRecord {
    /// Build a record for a project, copying its unit and directions
    pub fn for_project(
        project: &Project,
        floor: &str,
        thing: &str,
        location: &str,
        created_on: NaiveDate,
        created_by: &str,
    ) -> Result<Self, ValidationError> {
        for (field, value) in [("floor", floor), ("thing", thing), ("location", location)] {
            if value.trim().is_empty() {
                return Err(ValidationError::Missing(field));
            }
        }
        Ok(NewMaintenanceRecord {
            thing: thing.trim().to_string(),
            location: location.trim().to_string(),
            floor: floor.trim().to_string(),
            created_on,
            created_by: created_by.to_string(),
            project: project.name.clone(),
            company: project.unit.clone(),
            direction: project.directions.clone(),
        })
    }
}

/// A submitted inspection photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenancePhoto {
    pub id: i64,
    pub project: String,
    #[serde(default)]
    pub floor: Option<String>,
    #[serde(default)]
    pub thing: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub photo_path: Option<String>,
    #[serde(default)]
    pub photo_name: Option<String>,
    #[serde(rename = "maintainance_time", default)]
    pub maintenance_time: Option<String>,
    #[serde(rename = "maintainance_user", default)]
    pub maintenance_user: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Insert payload for a submitted photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMaintenancePhoto {
    pub project: String,
    pub floor: String,
    pub thing: String,
    pub location: String,
    pub photo_path: String,
    pub photo_name: String,
    #[serde(rename = "maintainance_time")]
    pub maintenance_time: Option<String>,
    #[serde(rename = "maintainance_user")]
    pub maintenance_user: Option<String>,
}

/// Anything carrying a floor/thing/location triple
pub trait InspectionPoint {
    fn floor(&self) -> Option<&str>;
    fn thing(&self) -> Option<&str>;
    fn location(&self) -> Option<&str>;

    fn as_option(&self) -> Option<MaintenanceOption> {
        MaintenanceOption::from_parts(self.floor(), self.thing(), self.location())
    }
}

impl InspectionPoint for MaintenanceRecord {
    fn floor(&self) -> Option<&str> {
        self.floor.as_deref()
    }
    fn thing(&self) -> Option<&str> {
        self.thing.as_deref()
    }
    fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

impl InspectionPoint for MaintenancePhoto {
    fn floor(&self) -> Option<&str> {
        self.floor.as_deref()
    }
    fn thing(&self) -> Option<&str> {
        self.thing.as_deref()
    }
    fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

/// Reduce rows to the catalog of complete inspection points
pub fn catalog_from<T: InspectionPoint>(rows: &[T]) -> Vec<MaintenanceOption> {
    rows.iter().filter_map(InspectionPoint::as_option).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn window_must_finish_after_start() {
        let mut setting = MaintenanceSetting {
            id: None,
            name: "Tower".to_string(),
            year_q: Some("2024Q1".to_string()),
            time_start: Some(day("2024-01-10")),
            time_finish: Some(day("2024-01-10")),
        };
        assert!(matches!(
            setting.validate(),
            Err(ValidationError::WindowOrder { .. })
        ));
        setting.time_finish = Some(day("2024-03-31"));
        assert_eq!(setting.validate(), Ok(()));
        assert!(setting.covers(day("2024-02-01")));
        assert!(!setting.covers(day("2024-04-01")));
    }

    #[test]
    fn record_columns_use_store_names() {
        let json = r#"{"id":3,"thing":"Pump","location":"B1 1-2","floor":"B1",
            "creat_at":"2024-05-01","creat_user":"amy","project":"Tower",
            "company":null,"direction":"check seals"}"#;
        let record: MaintenanceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.created_on, Some(day("2024-05-01")));
        assert_eq!(record.created_by.as_deref(), Some("amy"));

        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("creat_user").is_some());
    }

    #[test]
    fn new_record_requires_all_parts() {
        let project = Project {
            id: 1,
            name: "Tower".to_string(),
            unit: Some("ACL".to_string()),
            directions: None,
            photo_path: None,
        };
        let err = NewMaintenanceRecord::for_project(&project, "1F", " ", "A", day("2024-01-01"), "amy")
            .unwrap_err();
        assert_eq!(err, ValidationError::Missing("thing"));

        let record =
            NewMaintenanceRecord::for_project(&project, "1F", "Pump", "A", day("2024-01-01"), "amy")
                .unwrap();
        assert_eq!(record.company.as_deref(), Some("ACL"));
    }

    #[test]
    fn catalog_skips_incomplete_rows() {
        let photo = |floor: Option<&str>| MaintenancePhoto {
            id: 1,
            project: "Tower".to_string(),
            floor: floor.map(str::to_string),
            thing: Some("Pump".to_string()),
            location: Some("A".to_string()),
            photo_path: None,
            photo_name: None,
            maintenance_time: None,
            maintenance_user: None,
            created_at: None,
        };
        let catalog = catalog_from(&[photo(Some("1F")), photo(None)]);
        assert_eq!(catalog, vec![MaintenanceOption::new("1F", "Pump", "A")]);
    }
}
