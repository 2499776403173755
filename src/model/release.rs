//! Release candidates and next-release selection.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::version::Version;

/// Applicability flag value marking an installable release.
pub const APPLICABLE: &str = "APPLICABLE";

/// Per-component target version from a release bill of materials.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BomComponent {
    pub name: String,
    pub version: String,
}

/// Bundle reference attached to a release.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseBundle {
    pub bundle_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_type: Option<String>,
}

/// A candidate release as returned by the future-releases endpoint.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub version: String,
    #[serde(default)]
    pub applicability_status: Option<String>,
    #[serde(default)]
    pub is_applicable: bool,
    #[serde(default, rename = "minCompatibleVcfVersion")]
    pub min_compatible_version: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub bom: Vec<BomComponent>,
    #[serde(default, alias = "upgradeBundles")]
    pub patch_bundles: Vec<ReleaseBundle>,
}

impl Release {
    /// Bundle ids to download for this release, deduplicated in order.
    pub fn bundle_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for bundle in &self.patch_bundles {
            if !ids.contains(&bundle.bundle_id) {
                ids.push(bundle.bundle_id.clone());
            }
        }
        ids
    }

    /// Whether the remote flags this release as installable.
    pub fn is_flagged_applicable(&self) -> bool {
        self.is_applicable && self.applicability_status.as_deref() == Some(APPLICABLE)
    }

    /// Check the full applicability rule against the current version:
    /// flagged applicable and `min_compatible <= current < version`.
    ///
    /// A missing floor places no lower bound. Unparsable versions make the
    /// release inapplicable.
    pub fn is_applicable_to(&self, current: &Version) -> bool {
        if !self.is_flagged_applicable() {
            return false;
        }

        let Ok(target) = Version::parse(&self.version) else {
            warn!("Skipping release with invalid version {:?}", self.version);
            return false;
        };
        if *current >= target {
            return false;
        }

        match self.min_compatible_version.as_deref() {
            None => true,
            Some(floor) => match Version::parse(floor) {
                Ok(floor) => floor <= *current,
                Err(_) => {
                    warn!(
                        "Skipping release {} with invalid minimum compatible version {:?}",
                        self.version, floor
                    );
                    false
                }
            },
        }
    }
}

/// Select the immediately next applicable release.
///
/// Upgrades proceed one step at a time, so the lowest applicable version wins.
/// If two releases share a version the first encountered is kept.
pub fn select_next_release<'a>(current: &Version, releases: &'a [Release]) -> Option<&'a Release> {
    let mut best: Option<(Version, &Release)> = None;

    for release in releases.iter().filter(|r| r.is_applicable_to(current)) {
        let Ok(version) = Version::parse(&release.version) else {
            continue;
        };
        let replace = match &best {
            Some((best_version, best_release)) if version == *best_version => {
                warn!(
                    "Duplicate release version {} (keeping first, ignoring {:?})",
                    best_release.version, release.release_date
                );
                false
            }
            Some((best_version, _)) => version < *best_version,
            None => true,
        };
        if replace {
            best = Some((version, release));
        }
    }

    best.map(|(_, release)| release)
}

#[cfg(test)]
pub(crate) fn release(version: &str, min: &str) -> Release {
    Release {
        version: version.to_string(),
        applicability_status: Some(APPLICABLE.to_string()),
        is_applicable: true,
        min_compatible_version: Some(min.to_string()),
        release_date: Some("2024-07-23".to_string()),
        description: None,
        bom: vec![],
        patch_bundles: vec![],
    }
}
