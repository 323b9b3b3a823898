//! Declarative definition of the command line, parsed with clap.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use portablemc::maven::Gav;
use portablemc::{fabric, forge};


/// Install and launch any version of the game, including the popular mod loaders.
#[derive(Debug, Parser)]
#[command(name = "portablemc", version, disable_help_subcommand = true, max_term_width = 120)]
pub struct CliArgs {
    #[command(subcommand)]
    pub cmd: CliCmd,
    /// Increase verbosity, repeatable.
    #[arg(short, env = "PMC_VERBOSE", action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Output format of the launcher.
    #[arg(long, env = "PMC_OUTPUT", default_value = "human")]
    pub output: CliOutput,
    /// Root directory holding versions, libraries, assets and runtimes.
    ///
    /// Defaults to the conventional game directory of the platform (for example
    /// '~/.minecraft' on Linux); commands abort when neither this option nor a
    /// platform default is available.
    #[arg(long, env = "PMC_MAIN_DIR", value_name = "PATH")]
    pub main_dir: Option<PathBuf>,
    /// Directory the game runs in, where saves and options land.
    ///
    /// Defaults to the main directory.
    #[arg(long, env = "PMC_WORK_DIR", value_name = "PATH")]
    pub work_dir: Option<PathBuf>,
    /// Idle network read timeout, in seconds.
    #[arg(long, env = "PMC_TIMEOUT", value_name = "SECONDS")]
    pub timeout: Option<f32>,
}

#[derive(Debug, Subcommand)]
pub enum CliCmd {
    Start(StartArgs),
    Search(SearchArgs),
    Show(ShowArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum CliOutput {
    /// Lines meant for a person, colored when the terminal supports it. Verbosity
    /// reveals more of them; the exact wording is not a stable interface.
    Human,
    /// Same as 'human' with colors forced on.
    HumanColor,
    /// One tab-separated record per line, the first field being a stable tag; tabs
    /// and line returns inside values are escaped as '\t' and '\n'. Always
    /// verbose. A failing command emits at least one record tagged 'error_*'.
    Machine,
}

// ------------- //
//     start     //
// ------------- //

/// Install a version and launch it.
///
/// The version argument selects both the installer kind and the version, see its
/// own help. Everything missing is downloaded and verified first, so the first
/// launch of a version installs it.
#[derive(Debug, Args)]
pub struct StartArgs {
    /// What to launch, as [<kind>:]<version-spec>.
    ///
    /// Kinds and their version specs:
    ///
    /// - mojang (the default kind): 'release' (default), 'snapshot', or any version
    /// id from the Mojang manifest or the local versions directory. Versions known
    /// by the manifest are kept up to date, see --exclude-fetch.
    ///
    /// - standard: a local version id, used exactly as installed, no manifest
    /// access and no fixes.
    ///
    /// - fabric, quilt, legacyfabric, babric:
    /// [<game-version>][:<loader-version>], where either version can be empty,
    /// 'stable' (default) or 'unstable' to pick from the loader API listings.
    ///
    /// - forge, neoforge: [<game-version>][:stable|unstable] to target the latest
    /// loader of a game version, or ::<loader-version> for an explicit one (Forge
    /// also understands the <game>-recommended and <game>-latest aliases).
    #[arg(default_value = "release")]
    pub version: StartVersion,
    /// Install only, do not launch.
    #[arg(long)]
    pub dry: bool,
    /// Grey out the multiplayer button (>= 1.16).
    #[arg(long)]
    pub disable_multiplayer: bool,
    /// Disable the in-game chat (>= 1.16).
    #[arg(long)]
    pub disable_chat: bool,
    /// Run the demo mode.
    #[arg(long)]
    pub demo: bool,
    /// Initial window size, as <width>x<height>.
    #[arg(long)]
    pub resolution: Option<StartResolution>,
    /// Override every LWJGL library to this version (>= 3.2.3).
    ///
    /// Also brings in natives missing from the original version (ARM notably).
    /// Not guaranteed to work on every game version.
    #[arg(long, value_name = "VERSION")]
    pub lwjgl: Option<String>,
    /// Never validate nor fetch this version against the Mojang manifest,
    /// repeatable; '*' disables manifest access entirely.
    #[arg(long, value_name = "VERSION")]
    pub exclude_fetch: Vec<String>,
    /// Drop the libraries matching this filter, repeatable.
    ///
    /// The filter syntax is <group>:<artifact>[:[<version>][:<classifier-prefix>]]
    /// where group, artifact and version accept the '*' wildcard. Typically used
    /// together with --include-bin to substitute natives.
    #[arg(long, value_name = "FILTER")]
    pub exclude_lib: Vec<GavPattern>,
    /// Add this file to the natives directory, repeatable.
    ///
    /// Shared objects are linked (or copied) in with their version suffix
    /// stripped, so '/usr/lib/libfoo.so.1.2' appears as 'libfoo.so'.
    #[arg(long, value_name = "PATH")]
    pub include_bin: Vec<PathBuf>,
    /// Path of the Java executable to launch with, bypassing --jvm-policy.
    ///
    /// With the forge and neoforge kinds this executable also runs the installer
    /// processors.
    #[arg(long, value_name = "PATH")]
    pub jvm: Option<PathBuf>,
    /// How the Java runtime is found or installed.
    #[arg(long, value_name = "POLICY", conflicts_with = "jvm", default_value = "system-mojang")]
    pub jvm_policy: StartJvmPolicy,
    /// Verify the SHA-1 of every present asset, not only its size.
    #[arg(long)]
    pub strict_assets_check: bool,
    /// Verify the SHA-1 of every present library and of the client archive.
    #[arg(long)]
    pub strict_libraries_check: bool,
    /// Verify the SHA-1 of every present runtime file.
    #[arg(long)]
    pub strict_jvm_check: bool,
    /// Player name of the offline session, the uuid is derived from it.
    #[arg(short = 'u', long, value_name = "NAME")]
    pub username: Option<String>,
    /// Player uuid of the offline session.
    #[arg(short = 'i', long)]
    pub uuid: Option<Uuid>,
    /// Open this singleplayer world right after launch.
    #[arg(long, value_name = "NAME", conflicts_with_all = ["join_server", "join_realms"])]
    pub join_world: Option<String>,
    /// Join this server right after launch (legacy arguments before 1.20).
    #[arg(short = 's', long, value_name = "HOST")]
    pub join_server: Option<String>,
    /// Port used with --join-server.
    #[arg(short = 'p', long, value_name = "PORT", requires = "join_server", default_value_t = 25565)]
    pub join_server_port: u16,
    /// Join this realm right after launch (>= 1.20).
    #[arg(long, value_name = "ID", conflicts_with = "join_server")]
    pub join_realms: Option<String>,
}

/// The parsed version argument of the start command.
#[derive(Debug, Clone)]
pub enum StartVersion {
    /// A local version used as-is through the base installer.
    Standard {
        version: String,
    },
    /// An explicit Mojang version.
    Mojang {
        version: String,
    },
    /// The latest Mojang release.
    MojangRelease,
    /// The latest Mojang snapshot.
    MojangSnapshot,
    /// A Fabric-family loader over a game version.
    Fabric {
        loader: fabric::Loader,
        game_version: fabric::GameVersion,
        loader_version: fabric::LoaderVersion,
    },
    /// A Forge-family loader at an explicit loader version.
    Forge {
        loader: forge::Loader,
        version: String,
    },
    /// The latest Forge-family loader of a game version.
    ForgeLatest {
        loader: forge::Loader,
        /// None targets the latest Mojang release.
        game_version: Option<String>,
        stable: bool,
    },
}

impl FromStr for StartVersion {

    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {

        let (kind, spec) = s.split_once(':').unwrap_or(("mojang", s));
        let parts = spec.split(':').collect::<Vec<_>>();

        let arity = match kind {
            "standard" | "mojang" => 1,
            "fabric" | "quilt" | "legacyfabric" | "babric" => 2,
            "forge" | "neoforge" => 2,
            _ => return Err(format!("unknown installer kind: {kind}")),
        };

        if parts.len() > arity {
            return Err(format!("too many ':' parameters for the {kind} kind"));
        }

        Ok(match kind {
            "standard" => {
                if parts[0].is_empty() {
                    return Err("the standard kind requires a version".to_string());
                }
                Self::Standard { version: parts[0].to_string() }
            }
            "mojang" => match parts[0] {
                "" | "release" => Self::MojangRelease,
                "snapshot" => Self::MojangSnapshot,
                version => Self::Mojang { version: version.to_string() },
            },
            "fabric" | "quilt" | "legacyfabric" | "babric" => Self::Fabric {
                loader: match kind {
                    "fabric" => fabric::Loader::Fabric,
                    "quilt" => fabric::Loader::Quilt,
                    "legacyfabric" => fabric::Loader::LegacyFabric,
                    _ => fabric::Loader::Babric,
                },
                game_version: match parts[0] {
                    "" | "stable" => fabric::GameVersion::Stable,
                    "unstable" => fabric::GameVersion::Unstable,
                    name => fabric::GameVersion::Name(name.to_string()),
                },
                loader_version: match parts.get(1).copied() {
                    None | Some("" | "stable") => fabric::LoaderVersion::Stable,
                    Some("unstable") => fabric::LoaderVersion::Unstable,
                    Some(name) => fabric::LoaderVersion::Name(name.to_string()),
                },
            },
            "forge" | "neoforge" => {

                let loader = if kind == "forge" { forge::Loader::Forge } else { forge::Loader::NeoForge };

                match parts.get(1).copied() {
                    None | Some("" | "stable" | "unstable") => Self::ForgeLatest {
                        loader,
                        game_version: match parts[0] {
                            "" | "release" => None,
                            name => Some(name.to_string()),
                        },
                        stable: parts.get(1).copied() != Some("unstable"),
                    },
                    Some(version) => {
                        if !parts[0].is_empty() {
                            return Err("leave the first parameter empty when giving a full loader version".to_string());
                        }
                        Self::Forge { loader, version: version.to_string() }
                    }
                }

            }
            _ => unreachable!(),
        })

    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum StartJvmPolicy {
    /// Probe the runtimes installed on the system and use the first compatible
    /// one, failing when there is none.
    System,
    /// Install the Mojang-provided runtime matching the version, failing when the
    /// platform or component is not covered.
    Mojang,
    /// Try the system first, install from Mojang as a fallback.
    SystemMojang,
    /// Install from Mojang first, probe the system as a fallback.
    MojangSystem,
}

/// The window size of the --resolution option.
#[derive(Debug, Clone, Copy)]
pub struct StartResolution {
    pub width: u16,
    pub height: u16,
}

impl FromStr for StartResolution {

    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s.split_once('x')
            .ok_or("expected <width>x<height>")?;
        Ok(Self {
            width: width.parse().map_err(|e| format!("invalid width: {e}"))?,
            height: height.parse().map_err(|e| format!("invalid height: {e}"))?,
        })
    }

}

/// A library exclusion filter matched against coordinates.
#[derive(Debug, Clone)]
pub struct GavPattern {
    group: String,
    artifact: String,
    version: Option<String>,
    classifier_prefix: Option<String>,
}

impl GavPattern {

    pub fn matches(&self, gav: &Gav) -> bool {

        fn part_matches(pattern: &str, part: &str) -> bool {
            pattern == "*" || pattern == part
        }

        if !part_matches(&self.group, gav.group()) {
            return false;
        }

        if !part_matches(&self.artifact, gav.artifact()) {
            return false;
        }

        if let Some(version) = self.version.as_deref() {
            if !version.is_empty() && !part_matches(version, gav.version()) {
                return false;
            }
        }

        if let Some(prefix) = self.classifier_prefix.as_deref() {
            if !gav.classifier().unwrap_or("").starts_with(prefix) {
                return false;
            }
        }

        true

    }

}

impl FromStr for GavPattern {

    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {

        const SYNTAX: &str = "expected <group>:<artifact>[:[<version>][:<classifier-prefix>]]";

        let mut parts = s.split(':');
        let group = parts.next().filter(|p| !p.is_empty()).ok_or(SYNTAX)?;
        let artifact = parts.next().filter(|p| !p.is_empty()).ok_or(SYNTAX)?;
        let version = parts.next().map(str::to_string);
        let classifier_prefix = parts.next().map(str::to_string);

        if parts.next().is_some() {
            return Err(SYNTAX.to_string());
        }

        Ok(Self {
            group: group.to_string(),
            artifact: artifact.to_string(),
            version,
            classifier_prefix,
        })

    }

}

// ------------- //
//    search     //
// ------------- //

/// List versions, of Mojang or of the mod loaders.
///
/// The listed set is selected with --kind, and the positional filters keep only
/// the versions containing one of them.
#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Which versions to list.
    #[arg(short, long, default_value = "mojang")]
    pub kind: SearchKind,
    /// Substring filters, a version matching any of them is listed.
    pub filter: Vec<String>,
}

impl SearchArgs {

    /// True when the name passes the filters (or there is none).
    pub fn matches(&self, name: &str) -> bool {
        self.filter.is_empty() || self.filter.iter().any(|f| name.contains(f))
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum SearchKind {
    /// Versions published by Mojang.
    Mojang,
    /// Versions installed in the local versions directory.
    Local,
    /// Fabric loader versions.
    Fabric,
    /// Quilt loader versions.
    Quilt,
    /// LegacyFabric loader versions.
    Legacyfabric,
    /// Babric loader versions.
    Babric,
    /// Forge loader versions.
    Forge,
    /// NeoForge loader versions.
    Neoforge,
}

// ------------- //
//     show      //
// ------------- //

/// Show diagnostic information.
#[derive(Debug, Args)]
pub struct ShowArgs {
    #[command(subcommand)]
    pub what: ShowWhat,
}

#[derive(Debug, Subcommand)]
pub enum ShowWhat {
    /// Version, platform and directories of the launcher itself.
    About,
}

#[cfg(test)]
mod tests {

    use std::str::FromStr;
    use portablemc::maven::Gav;
    use super::GavPattern;

    #[test]
    fn gav_patterns() {

        let gav = Gav::from_str("org.lwjgl:lwjgl:3.3.1:natives-linux").unwrap();

        for accepted in [
            "org.lwjgl:lwjgl",
            "*:lwjgl",
            "org.lwjgl:*",
            "org.lwjgl:lwjgl:3.3.1",
            "org.lwjgl:lwjgl:*",
            "org.lwjgl:lwjgl:",
            "org.lwjgl:lwjgl::natives",
            "org.lwjgl:lwjgl:3.3.1:natives-linux",
        ] {
            assert!(GavPattern::from_str(accepted).unwrap().matches(&gav), "{accepted} should match");
        }

        for rejected in [
            "org.lwjgl:lwjgl-glfw",
            "org.lwjgl:lwjgl:3.2.3",
            "org.lwjgl:lwjgl::natives-windows",
        ] {
            assert!(!GavPattern::from_str(rejected).unwrap().matches(&gav), "{rejected} should not match");
        }

        for invalid in ["", "org.lwjgl", ":lwjgl", "a:b:c:d:e"] {
            assert!(GavPattern::from_str(invalid).is_err(), "{invalid} should be invalid");
        }

    }

}
