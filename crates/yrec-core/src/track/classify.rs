//! Regrouping loaded tracks into subgiant, EEP and isochrone sequences.
//!
//! Every derivation reads the raw [`TrackBundles`] and builds fresh tables;
//! none of them mutates its input, so they can run in any order.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ClassifyError, Result};
use crate::track::ingest::TrackReader;
use crate::track::loader::{TrackBundles, TrackLoader};
use crate::track::table::{Track, AGE_COLUMN, CORE_HYDROGEN_COLUMN, MASS_COLUMN};

/// Core hydrogen fraction at or below which a model counts as post-main-sequence.
pub const SUBGIANT_X_CEN_MAX: f64 = 1e-4;

/// Suffix marking a derived subgiant bundle.
pub const SUBGIANT_SUFFIX: &str = "_sgb";

pub const MASS_UNIT: &str = "Msun";
pub const AGE_UNIT: &str = "Gyr";

/// Label -> sequence of tables.
pub type TrackGroups = BTreeMap<String, Vec<Track>>;

/// Decimal places used to round ages before isochrone grouping.
///
/// Built once, before any grouping starts, so every file in an invocation is
/// grouped with the same precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgePrecision(u32);

impl AgePrecision {
    pub const DEFAULT: AgePrecision = AgePrecision(2);
    pub const MIN: i64 = 1;
    /// Beyond this an f64 age has no decimal places left to round.
    pub const MAX: i64 = 15;

    /// Accept `requested`, or fall back to [`AgePrecision::DEFAULT`] with a
    /// warning when it is below [`AgePrecision::MIN`]. Requests above
    /// [`AgePrecision::MAX`] are capped, also with a warning.
    pub fn corrected(requested: i64) -> Self {
        if requested < Self::MIN {
            warn!(
                requested,
                fallback = Self::DEFAULT.0,
                "Invalid iso_round value; defaulting to 2"
            );
            return Self::DEFAULT;
        }
        if requested > Self::MAX {
            warn!(
                requested,
                capped = Self::MAX,
                "iso_round exceeds f64 precision; capping"
            );
            return Self(Self::MAX as u32);
        }
        Self(requested as u32)
    }

    pub fn places(self) -> u32 {
        self.0
    }

    /// Round half to even at this precision.
    pub fn round(self, value: f64) -> f64 {
        let scale = 10f64.powi(self.0 as i32);
        (value * scale).round_ties_even() / scale
    }

    pub fn label(self, age: f64) -> String {
        format!("{:.*}{AGE_UNIT}", self.0 as usize, age)
    }
}

impl Default for AgePrecision {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Label for a mass group, e.g. `1.00Msun`.
pub fn mass_label(mass: f64) -> String {
    format!("{mass:.2}{MASS_UNIT}")
}

/// Select the post-main-sequence rows of every track.
///
/// The output has one key per source bundle (`<bundle>_sgb`). Tracks with no
/// qualifying rows are dropped with a warning, so a key may map to fewer
/// tracks than its source, or to none.
pub fn extract_subgiants(bundles: &TrackBundles) -> TrackGroups {
    let mut out = TrackGroups::new();

    for (name, tracks) in bundles {
        let key = format!("{name}{SUBGIANT_SUFFIX}");
        let entry = out.entry(key).or_default();

        for loaded in tracks {
            let Some(sg) = subgiant_rows(&loaded.track) else {
                warn!(
                    file = %loaded.file_name,
                    bundle = %name,
                    column = CORE_HYDROGEN_COLUMN,
                    "Track has no core hydrogen column; skipping subgiant selection"
                );
                continue;
            };
            if sg.is_empty() {
                warn!(
                    file = %loaded.file_name,
                    bundle = %name,
                    "Subgiant selection empty"
                );
                continue;
            }
            entry.push(sg);
        }
    }

    out
}

/// Rows with `X_cen <= 1e-4`, or `None` if the column is missing.
pub fn subgiant_rows(track: &Track) -> Option<Track> {
    let idx = track.column_index(CORE_HYDROGEN_COLUMN)?;
    Some(track.filter_rows(|row| {
        row[idx]
            .as_f64()
            .is_some_and(|x| x <= SUBGIANT_X_CEN_MAX)
    }))
}

/// Pool rows by exact stellar mass across every bundle (EEP sequences).
pub fn group_by_mass(bundles: &TrackBundles) -> TrackGroups {
    let mut out = TrackGroups::new();

    for loaded in bundles.values().flatten() {
        let Some(masses) = loaded.track.numeric_column(MASS_COLUMN) else {
            debug!(file = %loaded.file_name, "No Mass column; skipping EEP grouping");
            continue;
        };
        for (mass, indices) in partition(&masses, &loaded.file_name, |m| m) {
            out.entry(mass_label(mass))
                .or_default()
                .push(loaded.track.select_rows(&indices));
        }
    }

    out
}

/// Pool rows by rounded age across every bundle (isochrones).
pub fn group_by_age(bundles: &TrackBundles, precision: AgePrecision) -> TrackGroups {
    let mut out = TrackGroups::new();

    for loaded in bundles.values().flatten() {
        let Some(ages) = loaded.track.numeric_column(AGE_COLUMN) else {
            debug!(file = %loaded.file_name, "No Age(Gyr) column; skipping isochrone grouping");
            continue;
        };
        for (age, indices) in partition(&ages, &loaded.file_name, |a| precision.round(a)) {
            out.entry(precision.label(age))
                .or_default()
                .push(loaded.track.select_rows(&indices));
        }
    }

    out
}

/// Split row indices by `key(value)`, ascending by key, rows in source order.
///
/// Rows without a finite numeric value have no group and are left out.
fn partition<K>(values: &[Option<f64>], file: &str, key: K) -> Vec<(f64, Vec<usize>)>
where
    K: Fn(f64) -> f64,
{
    let mut groups: Vec<(f64, Vec<usize>)> = Vec::new();
    let mut dropped = 0usize;

    for (row, value) in values.iter().enumerate() {
        let Some(k) = value.filter(|v| v.is_finite()).map(&key) else {
            dropped += 1;
            continue;
        };
        // Fold -0.0 into 0.0 so both land in one group.
        let k = if k == 0.0 { 0.0 } else { k };
        match groups.binary_search_by(|(g, _)| g.total_cmp(&k)) {
            Ok(pos) => groups[pos].1.push(row),
            Err(pos) => groups.insert(pos, (k, vec![row])),
        }
    }

    if dropped > 0 {
        debug!(file = %file, dropped, "Rows without a numeric group key");
    }
    groups
}

/// Which outputs to build, mirroring the loader's keyword options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackLoadPlan {
    pub recursive: bool,
    pub load_all_tracks: bool,
    pub load_subgiants: bool,
    pub load_eeps: bool,
    pub load_isochrones: bool,
    /// Requested isochrone rounding; corrected through [`AgePrecision::corrected`].
    pub iso_round: i64,
}

impl Default for TrackLoadPlan {
    fn default() -> Self {
        Self {
            recursive: true,
            load_all_tracks: true,
            load_subgiants: true,
            load_eeps: true,
            load_isochrones: true,
            iso_round: 2,
        }
    }
}

impl TrackLoadPlan {
    /// Every derivation needs the raw tracks.
    pub fn validate(&self) -> Result<()> {
        if self.load_all_tracks {
            return Ok(());
        }
        let requested = [
            (self.load_subgiants, "load_subgiants"),
            (self.load_isochrones, "load_isochrones"),
            (self.load_eeps, "load_eeps"),
        ];
        match requested.iter().find(|(on, _)| *on) {
            Some(&(_, derivation)) => Err(ClassifyError::RawTracksRequired { derivation }),
            None => Ok(()),
        }
    }
}

/// Everything produced by one [`load_catalog`] call. A field is `Some` iff
/// the plan asked for it.
#[derive(Debug, Default, Serialize)]
pub struct TrackCatalog {
    pub star_lists: Option<TrackBundles>,
    pub skipped: Vec<crate::track::loader::SkippedFile>,
    pub subgiant_star_lists: Option<TrackGroups>,
    pub eep_lists: Option<TrackGroups>,
    pub isochrone_lists: Option<TrackGroups>,
}

/// Load tracks from `dirs` and build the derivations requested by `plan`.
///
/// The plan is validated before any file is read.
pub fn load_catalog<R: TrackReader>(
    dirs: &[PathBuf],
    plan: &TrackLoadPlan,
    reader: R,
) -> Result<TrackCatalog> {
    plan.validate()?;

    let mut catalog = TrackCatalog::default();
    if !plan.load_all_tracks {
        return Ok(catalog);
    }

    let loaded = TrackLoader::new(reader)
        .recursive(plan.recursive)
        .load(dirs);
    let bundles = loaded.bundles;
    catalog.skipped = loaded.skipped;

    if plan.load_subgiants {
        catalog.subgiant_star_lists = Some(extract_subgiants(&bundles));
    }
    if plan.load_isochrones {
        let precision = AgePrecision::corrected(plan.iso_round);
        catalog.isochrone_lists = Some(group_by_age(&bundles, precision));
    }
    if plan.load_eeps {
        catalog.eep_lists = Some(group_by_mass(&bundles));
    }

    info!(
        bundles = bundles.len(),
        subgiant_bundles = catalog.subgiant_star_lists.as_ref().map_or(0, |m| m.len()),
        eep_groups = catalog.eep_lists.as_ref().map_or(0, |m| m.len()),
        isochrones = catalog.isochrone_lists.as_ref().map_or(0, |m| m.len()),
        "Track classification finished"
    );

    catalog.star_lists = Some(bundles);
    Ok(catalog)
}
