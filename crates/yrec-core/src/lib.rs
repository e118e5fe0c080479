//! YREC Core Library
//!
//! Reading YREC `.track` output, regrouping it into subgiant, EEP and
//! isochrone sequences, and fixing file paths inside namelists.

pub mod error;
pub mod namelist;
pub mod telemetry;
pub mod track;

pub use error::{ClassifyError, IngestError, NamelistError, Result};

pub use namelist::{parse_namelist, rewrite as rewrite_namelist, FixReport, NamelistResolver};

pub use track::classify::{
    extract_subgiants, group_by_age, group_by_mass, load_catalog, mass_label, subgiant_rows,
    AgePrecision, TrackCatalog, TrackGroups, TrackLoadPlan, SUBGIANT_X_CEN_MAX,
};
pub use track::ingest::{parse_track, TrackReader, VersionMarkerReader, VERSION_MARKER};
pub use track::loader::{
    bundle_name, LoadedTrack, LoadedTracks, SkippedFile, TrackBundles, TrackLoader,
};
pub use track::table::{Track, Value, AGE_COLUMN, CORE_HYDROGEN_COLUMN, MASS_COLUMN};

pub use telemetry::{default_directives, init_tracing, level_for};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
