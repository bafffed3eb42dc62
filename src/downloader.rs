use log::{debug, warn};
use rust_xlsxwriter::{Format, FormatAlign, Image, Workbook, Worksheet, XlsxError};
use std::collections::HashSet;
use thiserror::Error;

use crate::backend::{Backend, BackendError};
use crate::grouping::{Group, UNCATEGORIZED, group_by_thing};
use crate::model::{InspectionPoint, MaintenancePhoto, PHOTO_BUCKET, Project};
use crate::photos;

/// Items placed side by side on one worksheet row
pub const SLOTS_PER_ROW: usize = 5;
/// Widths of the index, photo and location columns of a slot
pub const SLOT_WIDTHS: [f64; 3] = [8.0, 15.0, 20.0];
/// Width of the empty column between two slots
pub const SPACER_WIDTH: f64 = 5.0;
pub const PLAIN_ROW_HEIGHT: f64 = 20.0;
pub const PHOTO_ROW_HEIGHT: f64 = 80.0;
/// Written in the photo cell when a photo could not be fetched or decoded
pub const MISSING_PHOTO_TEXT: &str = "無法載入圖片";
/// Longest worksheet name a workbook accepts
pub const MAX_SHEET_NAME: usize = 31;

const FORBIDDEN_SHEET_CHARS: [char; 7] = ['/', '\\', '?', '*', ':', '[', ']'];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no maintenance photos to export")]
    NoData,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("could not build workbook: {0}")]
    Xlsx(#[from] XlsxError),
}

/// One submitted photo, ready to be laid out
#[derive(Debug, Clone, PartialEq)]
pub struct ExportItem {
    pub thing: String,
    pub location: String,
    pub photo_url: String,
    /// PNG thumbnail; None when the photo could not be fetched
    pub thumbnail: Option<Vec<u8>>,
}

impl InspectionPoint for ExportItem {
    fn floor(&self) -> Option<&str> {
        None
    }
    fn thing(&self) -> Option<&str> {
        Some(&self.thing)
    }
    fn location(&self) -> Option<&str> {
        Some(&self.location)
    }
}

/// A finished export
#[derive(Debug, Clone)]
pub struct Export {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Cell coordinates of one item on its worksheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPosition {
    pub row: u32,
    pub index_col: u16,
    pub photo_col: u16,
    pub location_col: u16,
}

/// Position of the `i`-th item (zero-based) of a worksheet
///
/// Items go five per row; chunk `r` lands on row `2r + 1`, leaving a blank
/// row above each chunk.
///
/// # Examples
/// ```
/// use maintenance::downloader::slot_position;
///
/// let pos = slot_position(6);
/// assert_eq!((pos.row, pos.index_col, pos.photo_col, pos.location_col), (3, 4, 5, 6));
/// ```
pub fn slot_position(i: usize) -> SlotPosition {
    let chunk = (i / SLOTS_PER_ROW) as u32;
    let slot = (i % SLOTS_PER_ROW) as u16;
    let base = slot * (SLOT_WIDTHS.len() as u16 + 1);
    SlotPosition {
        row: chunk * 2 + 1,
        index_col: base,
        photo_col: base + 1,
        location_col: base + 2,
    }
}

/// Widths of every column used by a worksheet, spacers included
pub fn column_widths() -> Vec<f64> {
    let mut widths = Vec::new();
    for slot in 0..SLOTS_PER_ROW {
        widths.extend_from_slice(&SLOT_WIDTHS);
        if slot + 1 < SLOTS_PER_ROW {
            widths.push(SPACER_WIDTH);
        }
    }
    widths
}

/// Height of each data row: taller when any item on it carries a photo
pub fn row_heights(items: &[ExportItem]) -> Vec<(u32, f64)> {
    items
        .chunks(SLOTS_PER_ROW)
        .enumerate()
        .map(|(r, chunk)| {
            let height = if chunk.iter().any(|item| item.thumbnail.is_some()) {
                PHOTO_ROW_HEIGHT
            } else {
                PLAIN_ROW_HEIGHT
            };
            (r as u32 * 2 + 1, height)
        })
        .collect()
}

/// Turn a group label into a worksheet name the workbook will accept
///
/// Forbidden characters are dropped, the name is cut to [`MAX_SHEET_NAME`]
/// characters, and a ` (n)` suffix is added when an earlier sheet already
/// took the name. `used` remembers the names handed out so far.
///
/// # Examples
/// ```
/// use std::collections::HashSet;
/// use maintenance::downloader::sanitize_sheet_name;
///
/// let mut used = HashSet::new();
/// assert_eq!(sanitize_sheet_name("Pump [B1]", &mut used), "Pump B1");
/// assert_eq!(sanitize_sheet_name("Pump B1", &mut used), "Pump B1 (2)");
/// ```
pub fn sanitize_sheet_name(raw: &str, used: &mut HashSet<String>) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !FORBIDDEN_SHEET_CHARS.contains(c))
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'').trim();
    let base = if cleaned.is_empty() {
        UNCATEGORIZED.to_string()
    } else {
        truncate_chars(cleaned, MAX_SHEET_NAME)
    };

    let mut candidate = base.clone();
    let mut n = 2;
    while used.contains(&candidate.to_lowercase()) {
        let suffix = format!(" ({})", n);
        let room = MAX_SHEET_NAME - suffix.chars().count();
        candidate = format!("{}{}", truncate_chars(&base, room).trim_end(), suffix);
        n += 1;
    }
    used.insert(candidate.to_lowercase());
    candidate
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Text for the photo cell of an item, if any
///
/// Only an item that points at a photo which could not be placed gets
/// [`MISSING_PHOTO_TEXT`]; an item without a photo leaves the cell blank.
pub fn photo_cell_text(item: &ExportItem, embedded: bool) -> Option<&'static str> {
    (!embedded && !item.photo_url.is_empty()).then_some(MISSING_PHOTO_TEXT)
}

/// Name of the downloaded workbook
pub fn export_file_name(project_name: &str) -> String {
    format!("{}_季保養.xlsx", project_name)
}

/// Build the workbook: one worksheet per group
///
/// # Arguments
/// * `groups` - Items grouped by inspected thing, in sheet order
///
/// # Returns
/// * `Result<Vec<u8>, XlsxError>` - XLSX file content as bytes or an error
pub fn write_workbook(groups: &[Group<ExportItem>]) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let centered = Format::new()
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter);
    let mut used = HashSet::new();

    for group in groups {
        let mut worksheet = Worksheet::new();
        let name = sanitize_sheet_name(&group.name, &mut used);
        worksheet.set_name(&name)?;

        for (col, width) in column_widths().into_iter().enumerate() {
            worksheet.set_column_width(col as u16, width)?;
        }

        for (i, item) in group.items.iter().enumerate() {
            let pos = slot_position(i);
            worksheet.write_number_with_format(pos.row, pos.index_col, (i + 1) as f64, &centered)?;

            let embedded = match &item.thumbnail {
                Some(bytes) => match Image::new_from_buffer(bytes) {
                    Ok(image) => {
                        worksheet.insert_image(pos.row, pos.photo_col, &image)?;
                        true
                    }
                    Err(e) => {
                        warn!("thumbnail for {} rejected: {}", item.photo_url, e);
                        false
                    }
                },
                None => false,
            };
            if let Some(text) = photo_cell_text(item, embedded) {
                worksheet.write_string_with_format(pos.row, pos.photo_col, text, &centered)?;
            }

            worksheet.write_string_with_format(
                pos.row,
                pos.location_col,
                &item.location,
                &centered,
            )?;
        }

        for (row, height) in row_heights(&group.items) {
            worksheet.set_row_height(row, height)?;
        }

        workbook.push_worksheet(worksheet);
    }

    workbook.save_to_buffer()
}

/// CSV preview of an export: `thing,photo_url,location`, one line per item
///
/// Values containing commas, quotes or newlines are quoted.
pub fn to_csv(groups: &[Group<ExportItem>]) -> String {
    let mut csv_content = String::from("thing,photo_url,location\n");

    for group in groups {
        for item in &group.items {
            let fields = [
                group.name.as_str(),
                item.photo_url.as_str(),
                item.location.as_str(),
            ];
            for (i, value) in fields.iter().enumerate() {
                if i > 0 {
                    csv_content.push(',');
                }
                csv_content.push_str(&escape_csv(value));
            }
            csv_content.push('\n');
        }
    }

    csv_content
}

fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r')
    {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Fetch every photo of a project and turn it into an export item
///
/// Downloads run one after another; a photo that cannot be fetched or
/// decoded keeps its place without a thumbnail.
pub async fn collect_items(
    backend: &dyn Backend,
    photos: &[MaintenancePhoto],
    with_thumbnails: bool,
) -> Vec<ExportItem> {
    let mut items = Vec::with_capacity(photos.len());

    for photo in photos {
        let path = photo.photo_path.as_deref().unwrap_or_default();
        let thumbnail = if with_thumbnails && !path.is_empty() {
            match backend.download_object(PHOTO_BUCKET, path).await {
                Ok(bytes) => match photos::thumbnail_png(&bytes) {
                    Ok(thumb) => Some(thumb),
                    Err(e) => {
                        warn!("photo {} could not be decoded: {}", path, e);
                        None
                    }
                },
                Err(e) => {
                    warn!("photo {} could not be downloaded: {}", path, e);
                    None
                }
            }
        } else {
            None
        };

        items.push(ExportItem {
            thing: photo.thing.clone().unwrap_or_default(),
            location: photo.location.clone().unwrap_or_default(),
            photo_url: backend.public_url(PHOTO_BUCKET, path),
            thumbnail,
        });
    }

    items
}

async fn grouped_items(
    backend: &dyn Backend,
    project: &Project,
    with_thumbnails: bool,
) -> Result<Vec<Group<ExportItem>>, ExportError> {
    let photos = backend.photos_for_project(&project.name).await?;
    if photos.is_empty() {
        return Err(ExportError::NoData);
    }
    debug!("exporting {} photos of {}", photos.len(), project.name);
    let items = collect_items(backend, &photos, with_thumbnails).await;
    Ok(group_by_thing(items))
}

/// Build the seasonal workbook of a project
///
/// # Errors
/// * `ExportError::NoData` when the project has no submitted photos
pub async fn export_project(
    backend: &dyn Backend,
    project: &Project,
) -> Result<Export, ExportError> {
    let groups = grouped_items(backend, project, true).await?;
    let bytes = write_workbook(&groups)?;
    Ok(Export {
        file_name: export_file_name(&project.name),
        bytes,
    })
}

/// CSV preview of the seasonal export of a project
pub async fn export_project_csv(
    backend: &dyn Backend,
    project: &Project,
) -> Result<String, ExportError> {
    let groups = grouped_items(backend, project, false).await?;
    Ok(to_csv(&groups))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(thing: &str, location: &str, with_photo: bool) -> ExportItem {
        ExportItem {
            thing: thing.to_string(),
            location: location.to_string(),
            photo_url: "https://files/photo.png".to_string(),
            thumbnail: with_photo.then(|| photos::thumbnail_png(&tiny_png()).unwrap()),
        }
    }

    fn tiny_png() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(8, 8));
        let mut buffer = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buffer, image::ImageOutputFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn nineteen_columns_with_spacers() {
        let widths = column_widths();
        assert_eq!(widths.len(), 19);
        assert_eq!(&widths[..5], &[8.0, 15.0, 20.0, 5.0, 8.0]);
        assert_eq!(widths[18], 20.0);
    }

    #[test]
    fn items_fill_every_other_row() {
        assert_eq!(
            slot_position(0),
            SlotPosition {
                row: 1,
                index_col: 0,
                photo_col: 1,
                location_col: 2
            }
        );
        assert_eq!(slot_position(4).index_col, 16);
        assert_eq!(slot_position(5).row, 3);
        assert_eq!(slot_position(5).index_col, 0);
        assert_eq!(slot_position(11).row, 5);
    }

    #[test]
    fn rows_with_photos_are_taller() {
        let mut items: Vec<ExportItem> = (0..5)
            .map(|i| item("Pump", &i.to_string(), false))
            .collect();
        items.push(item("Pump", "5", true));
        assert_eq!(
            row_heights(&items),
            vec![(1, PLAIN_ROW_HEIGHT), (3, PHOTO_ROW_HEIGHT)]
        );
    }

    #[test]
    fn sheet_names_are_cleaned_and_unique() {
        let mut used = HashSet::new();
        assert_eq!(sanitize_sheet_name("a/b:c", &mut used), "abc");
        assert_eq!(sanitize_sheet_name("[]", &mut used), UNCATEGORIZED);
        assert_eq!(sanitize_sheet_name("", &mut used), format!("{} (2)", UNCATEGORIZED));
        assert_eq!(sanitize_sheet_name("ABC", &mut used), "ABC (2)");

        let long = "x".repeat(40);
        let first = sanitize_sheet_name(&long, &mut used);
        let second = sanitize_sheet_name(&long, &mut used);
        assert_eq!(first.chars().count(), MAX_SHEET_NAME);
        assert_eq!(second.chars().count(), MAX_SHEET_NAME);
        assert!(second.ends_with(" (2)"));
    }

    #[test]
    fn csv_quotes_awkward_values() {
        let groups = vec![Group {
            name: "Fire, alarm".to_string(),
            items: vec![item("Fire, alarm", "Hall \"A\"", false)],
        }];
        assert_eq!(
            to_csv(&groups),
            "thing,photo_url,location\n\"Fire, alarm\",https://files/photo.png,\"Hall \"\"A\"\"\"\n"
        );
    }

    #[test]
    fn workbook_builds_with_and_without_photos() {
        let groups = group_by_thing(vec![
            item("Pump", "B1 1-1", true),
            item("Pump", "B1 1-2", false),
            item("Fan/Duct", "RF", true),
        ]);
        let bytes = write_workbook(&groups).unwrap();
        // xlsx files are zip archives
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn missing_text_only_for_photos_that_failed() {
        let failed = item("Pump", "B1 1-1", false);
        assert_eq!(photo_cell_text(&failed, false), Some(MISSING_PHOTO_TEXT));
        assert_eq!(photo_cell_text(&failed, true), None);

        let no_photo = ExportItem {
            photo_url: String::new(),
            ..failed
        };
        assert_eq!(photo_cell_text(&no_photo, false), None);
    }

    #[test]
    fn file_name_carries_project() {
        assert_eq!(export_file_name("Tower"), "Tower_季保養.xlsx");
    }
}
