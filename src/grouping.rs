use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

use crate::model::InspectionPoint;

/// Label used for rows whose grouping field is empty
pub const UNCATEGORIZED: &str = "未分類";

lazy_static! {
    static ref LOCATION_NUMBER: Regex = Regex::new(r"(\d+)-(\d+)").unwrap();
}

/// A named group of rows, in the order they were added
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group<T> {
    pub name: String,
    pub items: Vec<T>,
}

/// Group rows by a key, keeping groups in order of first appearance
pub fn group_by<T, F>(rows: impl IntoIterator<Item = T>, key: F) -> Vec<Group<T>>
where
    F: Fn(&T) -> String,
{
    let mut groups: Vec<Group<T>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let name = key(&row);
        match index.get(&name) {
            Some(&i) => groups[i].items.push(row),
            None => {
                index.insert(name.clone(), groups.len());
                groups.push(Group {
                    name,
                    items: vec![row],
                });
            }
        }
    }

    groups
}

/// Group rows by inspected item
///
/// Rows with no item land in the [`UNCATEGORIZED`] group.
pub fn group_by_thing<T: InspectionPoint>(rows: impl IntoIterator<Item = T>) -> Vec<Group<T>> {
    group_by(rows, |row| label_or_uncategorized(row.thing()))
}

/// Group rows by the first word of their location and sort each group by location number
///
/// # Arguments
/// * `rows` - Rows to group
///
/// # Returns
/// * `Vec<Group<T>>` - Groups in order of first appearance, each stably sorted
///   by [`location_number`]
pub fn group_by_location_prefix<T: InspectionPoint>(
    rows: impl IntoIterator<Item = T>,
) -> Vec<Group<T>> {
    let mut groups = group_by(rows, |row| {
        let prefix = row
            .location()
            .and_then(|location| location.split(' ').next());
        label_or_uncategorized(prefix)
    });

    for group in &mut groups {
        group
            .items
            .sort_by_key(|row| location_number(row.location().unwrap_or_default()));
    }

    groups
}

/// Sort weight of a location: `N-M` anywhere in the text gives `N * 100 + M`, otherwise 0
///
/// # Examples
/// ```
/// use maintenance::grouping::location_number;
///
/// assert_eq!(location_number("B1 3-12"), 312);
/// assert_eq!(location_number("lobby"), 0);
/// ```
pub fn location_number(location: &str) -> u64 {
    LOCATION_NUMBER
        .captures(location)
        .and_then(|caps| {
            let major: u64 = caps[1].parse().ok()?;
            let minor: u64 = caps[2].parse().ok()?;
            Some(major.saturating_mul(100).saturating_add(minor))
        })
        .unwrap_or(0)
}

fn label_or_uncategorized(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNCATEGORIZED.to_string(),
    }
}
