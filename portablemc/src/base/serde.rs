//! JSON schemas of the version descriptors, asset indexes and runtime manifests.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, FixedOffset};

use crate::codec::{CompiledRegex, Sha1Hash};
use crate::maven::Gav;


/// A version descriptor, the per-version metadata record stored at
/// `versions/<id>/<id>.json`. A descriptor may name a parent with `inheritsFrom`,
/// the chain is then flattened into one effective record before installation.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Identifier of the version, matching its directory name.
    pub id: String,
    /// Release channel of the version.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    /// Last modification time, tolerated missing or with a missing timezone.
    #[serde(default, deserialize_with = "lenient_date_opt", skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<FixedOffset>>,
    /// First release time, same tolerance as `time`.
    #[serde(default, deserialize_with = "lenient_date_opt", skip_serializing_if = "Option::is_none")]
    pub release_time: Option<DateTime<FixedOffset>>,
    /// Identifier of the parent version this one inherits from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherits_from: Option<String>,
    /// Used by the official launcher, carried through but unused here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_launcher_version: Option<u32>,
    /// Used by the official launcher, carried through but unused here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_level: Option<u32>,
    /// The Java runtime required to run this version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub java_version: Option<JavaRequirement>,
    /// The asset index to install and reference at launch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_index: Option<AssetIndexReference>,
    /// Legacy asset index identifier, without download information.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<String>,
    /// Entry point archives by name, the `client` one matters here.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub downloads: HashMap<String, FileSource>,
    /// Libraries to install, in class path order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<LibraryEntry>,
    /// Fully qualified name of the class to invoke.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_class: Option<String>,
    /// Legacy single-string program arguments, whitespace separated.
    #[serde(rename = "minecraftArguments", skip_serializing_if = "Option::is_none")]
    pub legacy_arguments: Option<String>,
    /// Modern rule-gated JVM and program arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<ArgumentLists>,
    /// Logging configurations by side, the `client` one matters here.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub logging: HashMap<String, LoggingConfig>,
}

/// The release channel of a version.
#[derive(serde::Deserialize, serde::Serialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Release,
    Snapshot,
    OldBeta,
    OldAlpha,
}

impl Channel {

    /// The wire name, as substituted for the `version_type` placeholder.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Release => "release",
            Channel::Snapshot => "snapshot",
            Channel::OldBeta => "old_beta",
            Channel::OldAlpha => "old_alpha",
        }
    }

}

/// The Java runtime a version asks for: a named component and a major version.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JavaRequirement {
    pub component: Option<String>,
    pub major_version: u32,
}

/// Reference to an asset index, with the download of the index file itself.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AssetIndexReference {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u32>,
    #[serde(flatten)]
    pub source: FileSource,
}

/// A remote file with its optional verification data.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct FileSource {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1: Option<Sha1Hash>,
}

/// One library of a descriptor.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    /// Maven coordinate of the library.
    pub name: Gav,
    /// Explicit downloads, for the main artifact and/or native classifiers.
    #[serde(default, skip_serializing_if = "LibraryDownloads::is_empty")]
    pub downloads: LibraryDownloads,
    /// Per-OS native classifier templates, `${arch}` expands to the bit-ness.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natives: Option<HashMap<String, String>>,
    /// Rules gating the inclusion of this library.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,
    /// Filters applied when extracting the native classifier archive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractionRules>,
    /// A maven repository base URL the artifact can be derived from when no
    /// explicit download is provided, used by mod loaders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LibraryDownloads {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactSource>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub classifiers: HashMap<String, ArtifactSource>,
}

impl LibraryDownloads {
    fn is_empty(&self) -> bool {
        self.artifact.is_none() && self.classifiers.is_empty()
    }
}

/// A library artifact download, with its optional location below the libraries
/// directory.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(flatten)]
    pub source: FileSource,
}

/// Exclusion list applied when extracting a native classifier archive, entries
/// whose path starts with an excluded prefix are skipped.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct ExtractionRules {
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// The modern argument lists of a descriptor.
#[derive(serde::Deserialize, serde::Serialize, Debug, Default, Clone)]
pub struct ArgumentLists {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub game: Vec<ArgumentEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jvm: Vec<ArgumentEntry>,
}

/// One argument fragment: a literal, or a rule-gated literal or list of literals.
/// Any other shape fails deserialization and makes the whole descriptor malformed.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum ArgumentEntry {
    Literal(String),
    Gated(GatedArgument),
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GatedArgument {
    pub value: OneOrMany<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// A logging configuration: the JVM argument template and the config file it
/// references through the `${path}` placeholder.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(rename = "type", default)]
    pub kind: LoggingKind,
    pub argument: String,
    pub file: LoggingFile,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingKind {
    #[default]
    #[serde(rename = "log4j2-xml")]
    Log4j2Xml,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct LoggingFile {
    pub id: String,
    #[serde(flatten)]
    pub source: FileSource,
}

/// A selection rule: an action applied when every present predicate matches.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub action: RuleAction,
    #[serde(default)]
    pub os: OsPredicate,
    #[serde(default)]
    pub features: HashMap<String, bool>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Disallow,
}

/// The OS predicate of a rule: an exact name, an architecture name and a regular
/// expression over the OS version.
#[derive(serde::Deserialize, serde::Serialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OsPredicate {
    pub name: Option<String>,
    pub arch: Option<String>,
    pub version: Option<CompiledRegex>,
}

// ---------------- //
//   Asset index    //
// ---------------- //

/// An asset index file: a mapping from logical paths to content-addressed objects,
/// plus the policy bits selecting the legacy layouts.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct AssetIndex {
    /// Mirror the objects under `assets/virtual/<id>/` (1.6 to 1.7.2 era).
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
    /// Mirror the objects under the work directory `resources/` (pre-1.6 era).
    #[serde(default)]
    pub map_to_resources: bool,
    /// Logical path to object mapping.
    pub objects: HashMap<String, AssetObject>,
}

/// A content-addressed asset object.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct AssetObject {
    pub hash: Sha1Hash,
    pub size: u32,
}

// ---------------------- //
//   Runtime manifests    //
// ---------------------- //

/// The all-platforms index of Mojang-provided Java runtimes, keyed by platform
/// then by component name.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(transparent)]
pub struct RuntimeIndex {
    pub platforms: HashMap<String, RuntimePlatform>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(transparent)]
pub struct RuntimePlatform {
    pub components: HashMap<String, RuntimeVariants>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(transparent)]
pub struct RuntimeVariants {
    pub variants: Vec<RuntimeVariant>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct RuntimeVariant {
    pub availability: RuntimeAvailability,
    pub manifest: FileSource,
    pub version: RuntimeVersion,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct RuntimeAvailability {
    pub group: u32,
    pub progress: u32,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct RuntimeVersion {
    pub name: String,
    pub released: DateTime<FixedOffset>,
}

/// The per-variant manifest listing every file of a runtime distribution.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct RuntimeManifest {
    pub files: HashMap<String, RuntimeFile>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum RuntimeFile {
    Directory,
    File {
        #[serde(default)]
        executable: bool,
        downloads: RuntimeFileDownloads,
    },
    Link {
        target: String,
    },
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct RuntimeFileDownloads {
    pub raw: FileSource,
    pub lzma: Option<FileSource>,
}

/// RFC 3339 parsing that tolerates a missing timezone, as produced by some loader
/// installers (NeoForge writes times like `2024-12-09T23:22:49.408008176`).
fn lenient_date_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: serde::Deserializer<'de>,
{

    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {

        type Value = Option<DateTime<FixedOffset>>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an RFC 3339 date and time string")
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
            match DateTime::parse_from_rfc3339(v) {
                Ok(date) => Ok(Some(date)),
                Err(_) => {
                    // Retry as if UTC was intended.
                    DateTime::parse_from_rfc3339(&format!("{v}Z"))
                        .map(Some)
                        .map_err(E::custom)
                }
            }
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2: serde::Deserializer<'de>>(self, deserializer: D2) -> Result<Self::Value, D2::Error> {
            deserializer.deserialize_str(self)
        }

    }

    deserializer.deserialize_option(Visitor)

}
