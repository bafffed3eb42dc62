use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Separator used to build composite keys (`floor|thing|location`).
pub const KEY_SEPARATOR: char = '|';

/// A single inspection point from a project's catalog.
///
/// Entries come straight from the store, so any of the three fields may be
/// empty. Empty entries are never offered as choices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaintenanceOption {
    pub floor: String,
    pub thing: String,
    pub location: String,
}

impl MaintenanceOption {
    pub fn new(floor: &str, thing: &str, location: &str) -> Self {
        MaintenanceOption {
            floor: floor.to_string(),
            thing: thing.to_string(),
            location: location.to_string(),
        }
    }

    /// Build an option from nullable store columns
    ///
    /// # Returns
    /// * `Option<MaintenanceOption>` - None when any of the three parts is missing or blank
    pub fn from_parts(
        floor: Option<&str>,
        thing: Option<&str>,
        location: Option<&str>,
    ) -> Option<Self> {
        let option = MaintenanceOption::new(floor?, thing?, location?);
        if option.is_complete() { Some(option) } else { None }
    }

    pub fn is_complete(&self) -> bool {
        !self.floor.is_empty() && !self.thing.is_empty() && !self.location.is_empty()
    }

    /// Composite key used to test submission membership
    pub fn key(&self) -> String {
        composite_key(&self.floor, &self.thing, &self.location)
    }
}

/// Build the `floor|thing|location` key for a combination
///
/// # Examples
/// ```
/// use maintenance::eligibility::composite_key;
///
/// assert_eq!(composite_key("1F", "Elevator", "A"), "1F|Elevator|A");
/// ```
pub fn composite_key(floor: &str, thing: &str, location: &str) -> String {
    format!(
        "{}{}{}{}{}",
        floor, KEY_SEPARATOR, thing, KEY_SEPARATOR, location
    )
}

/// Set of composite keys that already have a submitted record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmittedKeys {
    keys: HashSet<String>,
}

impl SubmittedKeys {
    pub fn new() -> Self {
        SubmittedKeys::default()
    }

    /// Reduce submitted rows to their composite keys
    pub fn from_options<'a, I>(submitted: I) -> Self
    where
        I: IntoIterator<Item = &'a MaintenanceOption>,
    {
        SubmittedKeys {
            keys: submitted.into_iter().map(MaintenanceOption::key).collect(),
        }
    }

    /// Record a successful submission. Returns false if it was already present.
    pub fn insert(&mut self, key: String) -> bool {
        self.keys.insert(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn contains_option(&self, option: &MaintenanceOption) -> bool {
        self.keys.contains(&option.key())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for SubmittedKeys {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        SubmittedKeys {
            keys: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// The user's in-progress choice.
///
/// The `select_*` methods keep descendants consistent: picking a floor clears
/// thing and location, picking a thing clears location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub floor: Option<String>,
    #[serde(default)]
    pub thing: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl Selection {
    pub fn new() -> Self {
        Selection::default()
    }

    pub fn select_floor(&mut self, floor: Option<String>) {
        if self.floor != floor {
            self.thing = None;
            self.location = None;
        }
        self.floor = floor;
    }

    pub fn select_thing(&mut self, thing: Option<String>) {
        if self.thing != thing {
            self.location = None;
        }
        self.thing = thing;
    }

    pub fn select_location(&mut self, location: Option<String>) {
        self.location = location;
    }

    fn floor(&self) -> Option<&str> {
        self.floor.as_deref().filter(|f| !f.is_empty())
    }

    fn thing(&self) -> Option<&str> {
        self.thing.as_deref().filter(|t| !t.is_empty())
    }
}

/// Option lists offered for the next submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableOptions {
    pub floors: Vec<String>,
    pub things: Vec<String>,
    pub locations: Vec<String>,
}

impl AvailableOptions {
    pub fn is_empty(&self) -> bool {
        self.floors.is_empty() && self.things.is_empty() && self.locations.is_empty()
    }
}

/// Compute the floors, things and locations that still lead to an unsubmitted
/// inspection point.
///
/// Lists keep the order in which values first appear in `catalog`. Things are
/// only computed once a floor is selected, locations once floor and thing are.
///
/// # Arguments
/// * `catalog` - Every inspection point defined for the project
/// * `submitted` - Keys of points that already have a submission
/// * `selection` - The current partial choice
///
/// # Returns
/// * `AvailableOptions` - De-duplicated option lists; all empty for an empty catalog
///
/// # Examples
/// ```
/// use maintenance::eligibility::{available_options, MaintenanceOption, Selection, SubmittedKeys};
///
/// let catalog = vec![
///     MaintenanceOption::new("1F", "Elevator", "A"),
///     MaintenanceOption::new("1F", "Elevator", "B"),
/// ];
/// let submitted: SubmittedKeys = ["1F|Elevator|A"].into_iter().collect();
/// let mut selection = Selection::new();
/// selection.select_floor(Some("1F".to_string()));
/// selection.select_thing(Some("Elevator".to_string()));
///
/// let options = available_options(&catalog, &submitted, &selection);
/// assert_eq!(options.locations, vec!["B"]);
/// ```
pub fn available_options(
    catalog: &[MaintenanceOption],
    submitted: &SubmittedKeys,
    selection: &Selection,
) -> AvailableOptions {
    // Open leaves, indexed by their floor and by their floor+thing prefix
    let mut open_floors: HashSet<&str> = HashSet::new();
    let mut open_things: HashSet<(&str, &str)> = HashSet::new();
    for option in catalog {
        if option.is_complete() && !submitted.contains_option(option) {
            open_floors.insert(option.floor.as_str());
            open_things.insert((option.floor.as_str(), option.thing.as_str()));
        }
    }

    let mut result = AvailableOptions::default();
    let mut seen_floors: HashSet<&str> = HashSet::new();
    let mut seen_things: HashSet<&str> = HashSet::new();
    let mut seen_locations: HashSet<&str> = HashSet::new();
    let floor = selection.floor();
    let thing = selection.thing();

    for option in catalog.iter().filter(|o| o.is_complete()) {
        if seen_floors.insert(option.floor.as_str()) && open_floors.contains(option.floor.as_str())
        {
            result.floors.push(option.floor.clone());
        }

        if Some(option.floor.as_str()) != floor {
            continue;
        }

        if seen_things.insert(option.thing.as_str())
            && open_things.contains(&(option.floor.as_str(), option.thing.as_str()))
        {
            result.things.push(option.thing.clone());
        }

        if Some(option.thing.as_str()) == thing
            && !submitted.contains_option(option)
            && seen_locations.insert(option.location.as_str())
        {
            result.locations.push(option.location.clone());
        }
    }

    result
}

/// Whether a complete combination is a catalog entry that has not been submitted yet
pub fn is_open(
    catalog: &[MaintenanceOption],
    submitted: &SubmittedKeys,
    floor: &str,
    thing: &str,
    location: &str,
) -> bool {
    let key = composite_key(floor, thing, location);
    !submitted.contains(&key)
        && catalog
            .iter()
            .any(|o| o.is_complete() && o.floor == floor && o.thing == thing && o.location == location)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<MaintenanceOption> {
        vec![
            MaintenanceOption::new("1F", "Elevator", "A"),
            MaintenanceOption::new("1F", "Elevator", "B"),
            MaintenanceOption::new("2F", "Generator", "C"),
        ]
    }

    fn selection(floor: Option<&str>, thing: Option<&str>) -> Selection {
        let mut selection = Selection::new();
        selection.select_floor(floor.map(str::to_string));
        selection.select_thing(thing.map(str::to_string));
        selection
    }

    fn keys(list: &[&str]) -> SubmittedKeys {
        list.iter().copied().collect()
    }

    #[test]
    fn partially_submitted_thing_keeps_remaining_location() {
        let options = available_options(
            &catalog(),
            &keys(&["1F|Elevator|A"]),
            &selection(Some("1F"), Some("Elevator")),
        );
        assert_eq!(options.locations, vec!["B"]);
        assert_eq!(options.things, vec!["Elevator"]);
        assert_eq!(options.floors, vec!["1F", "2F"]);
    }

    #[test]
    fn fully_submitted_floor_is_excluded() {
        let options = available_options(
            &catalog(),
            &keys(&["1F|Elevator|A", "1F|Elevator|B"]),
            &selection(Some("1F"), None),
        );
        assert!(options.things.is_empty());
        assert!(options.locations.is_empty());
        assert_eq!(options.floors, vec!["2F"]);
    }

    #[test]
    fn empty_catalog_yields_nothing() {
        let options = available_options(
            &[],
            &keys(&["1F|Elevator|A"]),
            &selection(Some("1F"), Some("Elevator")),
        );
        assert!(options.is_empty());
    }

    #[test]
    fn unset_floor_hides_things_and_locations() {
        let options = available_options(&catalog(), &SubmittedKeys::new(), &Selection::new());
        assert_eq!(options.floors, vec!["1F", "2F"]);
        assert!(options.things.is_empty());
        assert!(options.locations.is_empty());
    }

    #[test]
    fn thing_without_floor_is_ignored() {
        let mut sel = Selection::new();
        sel.thing = Some("Elevator".to_string());
        let options = available_options(&catalog(), &SubmittedKeys::new(), &sel);
        assert!(options.things.is_empty());
        assert!(options.locations.is_empty());
    }

    #[test]
    fn unknown_pair_has_no_locations() {
        let options = available_options(
            &catalog(),
            &SubmittedKeys::new(),
            &selection(Some("2F"), Some("Elevator")),
        );
        assert!(options.locations.is_empty());
        assert_eq!(options.things, vec!["Generator"]);
    }

    #[test]
    fn incomplete_entries_are_never_offered() {
        let catalog = vec![
            MaintenanceOption::new("", "Pump", "X"),
            MaintenanceOption::new("3F", "", "Y"),
            MaintenanceOption::new("3F", "Pump", ""),
            MaintenanceOption::new("4F", "Pump", "Z"),
        ];
        let options = available_options(
            &catalog,
            &SubmittedKeys::new(),
            &selection(Some("3F"), Some("Pump")),
        );
        assert_eq!(options.floors, vec!["4F"]);
        assert!(options.things.is_empty());
        assert!(options.locations.is_empty());
    }

    #[test]
    fn order_follows_first_catalog_occurrence() {
        let catalog = vec![
            MaintenanceOption::new("1F", "Pump", "A"),
            MaintenanceOption::new("2F", "Fan", "B"),
            MaintenanceOption::new("1F", "Pump", "C"),
            MaintenanceOption::new("1F", "Fan", "D"),
            MaintenanceOption::new("1F", "Pump", "A"),
        ];
        // 1F first appears on a submitted entry but still ranks first
        let options = available_options(
            &catalog,
            &keys(&["1F|Pump|A"]),
            &selection(Some("1F"), Some("Pump")),
        );
        assert_eq!(options.floors, vec!["1F", "2F"]);
        assert_eq!(options.things, vec!["Pump", "Fan"]);
        assert_eq!(options.locations, vec!["C"]);
    }

    #[test]
    fn idempotent_for_identical_inputs() {
        let submitted = keys(&["1F|Elevator|A"]);
        let sel = selection(Some("1F"), Some("Elevator"));
        let first = available_options(&catalog(), &submitted, &sel);
        let second = available_options(&catalog(), &submitted, &sel);
        assert_eq!(first, second);
    }

    #[test]
    fn adding_submissions_never_grows_lists() {
        let catalog = catalog();
        let sel = selection(Some("1F"), Some("Elevator"));
        let mut submitted = SubmittedKeys::new();
        let mut previous = available_options(&catalog, &submitted, &sel);
        for option in &catalog {
            submitted.insert(option.key());
            let next = available_options(&catalog, &submitted, &sel);
            assert!(next.floors.len() <= previous.floors.len());
            assert!(next.things.len() <= previous.things.len());
            assert!(next.locations.len() <= previous.locations.len());
            previous = next;
        }
        assert!(previous.is_empty());
    }

    #[test]
    fn returned_locations_are_open_catalog_members() {
        let catalog = catalog();
        let submitted = keys(&["1F|Elevator|B"]);
        let options =
            available_options(&catalog, &submitted, &selection(Some("1F"), Some("Elevator")));
        for location in &options.locations {
            let option = MaintenanceOption::new("1F", "Elevator", location);
            assert!(catalog.contains(&option));
            assert!(!submitted.contains_option(&option));
        }
    }

    #[test]
    fn changing_floor_clears_descendants() {
        let mut sel = selection(Some("1F"), Some("Elevator"));
        sel.select_location(Some("A".to_string()));
        sel.select_floor(Some("2F".to_string()));
        assert_eq!(sel.thing, None);
        assert_eq!(sel.location, None);

        let mut sel = selection(Some("1F"), Some("Elevator"));
        sel.select_location(Some("A".to_string()));
        sel.select_thing(Some("Pump".to_string()));
        assert_eq!(sel.floor.as_deref(), Some("1F"));
        assert_eq!(sel.location, None);
    }

    #[test]
    fn reselecting_same_floor_keeps_descendants() {
        let mut sel = selection(Some("1F"), Some("Elevator"));
        sel.select_floor(Some("1F".to_string()));
        assert_eq!(sel.thing.as_deref(), Some("Elevator"));
    }

    #[test]
    fn open_check_rejects_submitted_and_unknown() {
        let submitted = keys(&["1F|Elevator|A"]);
        assert!(!is_open(&catalog(), &submitted, "1F", "Elevator", "A"));
        assert!(is_open(&catalog(), &submitted, "1F", "Elevator", "B"));
        assert!(!is_open(&catalog(), &submitted, "9F", "Elevator", "B"));
    }

    #[test]
    fn from_parts_drops_missing_fields() {
        assert!(MaintenanceOption::from_parts(Some("1F"), None, Some("A")).is_none());
        assert!(MaintenanceOption::from_parts(Some("1F"), Some(""), Some("A")).is_none());
        assert_eq!(
            MaintenanceOption::from_parts(Some("1F"), Some("Pump"), Some("A")),
            Some(MaintenanceOption::new("1F", "Pump", "A"))
        );
    }
}
