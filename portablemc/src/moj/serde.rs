//! JSON schema of the Mojang version manifest.

use chrono::{DateTime, FixedOffset};

use crate::base::serde::{Channel, FileSource};


#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifest {
    /// Identifiers of the most recent version of each channel.
    pub latest: LatestPointers,
    /// Every published version, most recent first.
    pub versions: Vec<ManifestEntry>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct LatestPointers {
    pub release: Option<String>,
    pub snapshot: Option<String>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub channel: Channel,
    pub time: DateTime<FixedOffset>,
    pub release_time: DateTime<FixedOffset>,
    /// Download of the descriptor itself.
    #[serde(flatten)]
    pub source: FileSource,
    /// Used by the official launcher, carried through but unused here.
    pub compliance_level: Option<u32>,
}
