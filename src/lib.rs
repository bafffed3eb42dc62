/*!
# Seasonal Maintenance Tracker

Backend for recording seasonal building maintenance: which inspection points a
project has, which of them already have photos this season, and a workbook of
the submitted photos at the end of the season.

## Overview

Each project (a maintenance site) defines a catalog of inspection points, each
a floor / item ("thing") / location triple. Field staff submit photos against
those points. The eligibility filter decides which floors, things and
locations are still worth offering: only values that lead to at least one
inspection point without a submission.

## Architecture

### Core (no optional dependencies)
- **eligibility**: the submission-eligibility filter and the in-progress selection
- **model**: rows of the hosted tables and their validation
- **grouping**: grouping of rows by thing or by location prefix
- **saving**: gzip'd bincode snapshots used by the local store

### Web layer (feature `web`)
- **backend**: the `Backend` trait, the HTTP client for the hosted service and a
  file-backed local store
- **photos**: upload validation, storage paths and thumbnails
- **downloader**: workbook and CSV export
- **login**: registration, login, sessions and the auth middleware
- **template**: creating projects by copying a template project
- **config**: command line and environment settings
- **error**: HTTP error mapping
- **app**: routing and middleware

## REST API Endpoints

- `/api/login`, `/api/register`, `/api/logout` - Account handling
- `/api/projects/{id}/options` - Eligibility filter for the selection UI
- `/api/projects/{id}/photos` - Submit and list photos
- `/api/projects/{id}/export.xlsx` - Seasonal workbook
*/

pub mod eligibility;
pub mod grouping;
pub mod model;
pub mod saving;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod backend;
#[cfg(feature = "web")]
pub mod config;
#[cfg(feature = "web")]
pub mod downloader;
#[cfg(feature = "web")]
pub mod error;
#[cfg(feature = "web")]
pub mod login;
#[cfg(feature = "web")]
pub mod photos;
#[cfg(feature = "web")]
pub mod template;

/// Re-export the filter so callers need a single import
pub use eligibility::{
    AvailableOptions, MaintenanceOption, Selection, SubmittedKeys, available_options,
    composite_key, is_open,
};
