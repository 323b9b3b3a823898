//! JSON schemas of the Forge and NeoForge installer files.

use std::collections::HashMap;

use crate::maven::Gav;
use crate::base;


/// The `install_profile.json` entry of an installer JAR, whose schema tells the
/// installer generation apart.
#[derive(serde::Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum InstallProfile {
    V2(ProfileV2),
    V1(ProfileV1),
}

/// Modern scheme (loader >= 1.12.2-14.23.5.2851): the version descriptor lives in
/// a separate entry and processors materialize the loader artifacts.
#[derive(serde::Deserialize, Debug, Clone)]
pub struct ProfileV2 {
    /// Entry of the version descriptor inside the installer.
    pub json: String,
    /// Coordinate of a loader artifact embedded under `maven/`, present in the
    /// earlier installers of this scheme (<= 1.16.5).
    #[serde(default)]
    pub path: Option<Gav>,
    /// Subprocess steps to run, in order.
    #[serde(default)]
    pub processors: Vec<Processor>,
    /// Libraries to materialize before running the processors.
    #[serde(default)]
    pub libraries: Vec<base::serde::LibraryEntry>,
    /// Named values resolved against `{}` placeholders of the processor arguments.
    #[serde(default)]
    pub data: HashMap<String, SidedValue>,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct SidedValue {
    pub client: String,
    pub server: String,
}

/// One processor: a JAR run as a subprocess with a classpath and arguments.
#[derive(serde::Deserialize, Debug, Clone)]
pub struct Processor {
    pub jar: Gav,
    /// Sides the processor applies to, absent means all of them.
    #[serde(default)]
    pub sides: Option<Vec<Side>>,
    #[serde(default)]
    pub classpath: Vec<Gav>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Declared outputs: a path expression mapped to its expected SHA-1 expression.
    #[serde(default)]
    pub outputs: HashMap<String, String>,
}

#[derive(serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Client,
    Server,
}

/// Legacy scheme (loader <= 1.12.2-14.23.5.2847): the version descriptor is
/// embedded as `versionInfo` and the universal JAR is carried in the installer.
#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProfileV1 {
    pub install: InstallV1,
    pub version_info: base::serde::Descriptor,
}

#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InstallV1 {
    /// The game version the loader targets.
    pub minecraft: String,
    /// Coordinate of the embedded universal JAR.
    pub path: Gav,
    /// Entry of the embedded universal JAR inside the installer.
    pub file_path: String,
}

/// The `promotions_slim.json` document of the Forge file server, mapping
/// `<game>-recommended` and `<game>-latest` aliases to loader version numbers.
#[derive(serde::Deserialize, Debug, Clone)]
pub struct Promotions {
    pub promos: HashMap<String, String>,
}
