//! Implementation of the commands, and the shared event-to-log mapping.

mod start;
mod search;

pub use search::search;
pub use start::start;

use std::process::ExitCode;
use std::path::{Path, PathBuf};
use std::io;

use portablemc::{base, download, moj, fabric, forge};

use crate::output::{Output, DownloadTracker};
use crate::parse::ShowWhat;
use crate::format::{self, Hex};


/// Generic failure exit code, installs included.
pub const EXIT_FAILURE: u8 = 1;
/// The requested game or loader version does not exist.
pub const EXIT_VERSION_NOT_FOUND: u8 = 10;
/// The game itself terminated with a failure.
pub const EXIT_GAME_FAILURE: u8 = 11;


/// State shared by every command.
#[derive(Debug)]
pub struct Cli {
    pub out: Output,
    pub main_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
}

impl Cli {

    /// The effective main directory, logging an error when neither the option nor
    /// a platform default is available.
    pub fn main_dir(&mut self) -> Option<PathBuf> {

        let dir = self.main_dir.clone()
            .or_else(|| base::default_main_dir().map(Path::to_path_buf));

        if dir.is_none() {
            self.out.log("error_missing_main_dir")
                .error("No default main directory on this platform, give one with --main-dir");
        }

        dir

    }

}

pub fn show(cli: &mut Cli, what: &ShowWhat) -> ExitCode {
    match what {
        ShowWhat::About => {

            cli.out.log("about_version")
                .arg(env!("CARGO_PKG_VERSION"))
                .success(format_args!("Version: {}", env!("CARGO_PKG_VERSION")));

            cli.out.log("about_os")
                .arg(std::env::consts::OS)
                .arg(std::env::consts::ARCH)
                .success(format_args!("OS: {} ({})", std::env::consts::OS, std::env::consts::ARCH));

            let main_dir = cli.main_dir.clone()
                .or_else(|| base::default_main_dir().map(Path::to_path_buf));

            if let Some(main_dir) = main_dir {
                cli.out.log("about_main_dir")
                    .arg(main_dir.display())
                    .success(format_args!("Main directory: {}", main_dir.display()));
            }

            ExitCode::SUCCESS

        }
    }
}

/// The handler turning every event of every installer layer into log lines.
#[derive(Debug)]
pub struct LogHandler<'a> {
    out: &'a mut Output,
    tracker: DownloadTracker,
    /// Stable tag prefix of the loader currently installing, for loader events.
    api_id: &'static str,
    /// Display name of that loader.
    api_name: &'static str,
}

impl<'a> LogHandler<'a> {

    pub fn new(out: &'a mut Output) -> Self {
        Self {
            out,
            tracker: DownloadTracker::new(),
            api_id: "",
            api_name: "",
        }
    }

    pub fn set_fabric_loader(&mut self, loader: fabric::Loader) {
        let (api_id, api_name) = fabric_id_name(loader);
        self.api_id = api_id;
        self.api_name = api_name;
    }

    pub fn set_forge_loader(&mut self, loader: forge::Loader) {
        let (api_id, api_name) = forge_id_name(loader);
        self.api_id = api_id;
        self.api_name = api_name;
    }

}

impl download::Handler for LogHandler<'_> {
    fn on_progress(&mut self, progress: download::Progress) {

        let download::Progress { count, total_count, bytes, total_bytes } = progress;

        let Some(metrics) = self.tracker.handle(count, total_count, bytes, total_bytes) else {
            return;
        };

        let (speed, speed_unit) = format::si_unit(metrics.speed);
        let (size, size_unit) = format::si_unit(bytes as f32);

        let mut log = self.out.log("download");
        log.arg(format_args!("{count}/{total_count}"));
        log.arg(format_args!("{bytes}/{total_bytes}"));
        log.arg(format_args!("{}", metrics.elapsed.as_secs_f32()));
        log.arg(format_args!("{}", metrics.speed));

        if count == total_count {
            log.pending(format_args!("Downloaded {size:.0} {size_unit}B at {speed:.1} {speed_unit}B/s ({count})"));
        } else {
            let percent = (bytes as f32 / total_bytes as f32).min(1.0) * 100.0;
            log.pending(format_args!("Downloading {speed:.1} {speed_unit}B/s {percent:.1}% ({count}/{total_count})"));
        }

    }
}

impl base::Handler for LogHandler<'_> {

    fn on_event(&mut self, event: base::Event) {
        match event {
            base::Event::FilterFeatures { .. } => {}
            base::Event::LoadedFeatures { features } => {
                let mut listing = features.iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                if listing.is_empty() {
                    listing.push_str("(none)");
                }
                self.out.log("loaded_features")
                    .args(features.iter())
                    .info(format_args!("Features: {listing}"));
            }
            base::Event::LoadHierarchy { root_version } => {
                self.out.log("load_hierarchy")
                    .arg(root_version)
                    .info(format_args!("Loading versions from {root_version}"));
            }
            base::Event::LoadedHierarchy { hierarchy } => {
                let listing = hierarchy.iter()
                    .map(|version| version.name())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                self.out.log("loaded_hierarchy")
                    .args(hierarchy.iter().map(|version| version.name()))
                    .info(format_args!("Versions: {listing}"));
            }
            base::Event::LoadVersion { version, .. } => {
                self.out.log("load_version")
                    .arg(version)
                    .pending(format_args!("Loading version {version}"));
            }
            base::Event::NeedVersion { .. } => {}
            base::Event::LoadedVersion { version, .. } => {
                self.out.log("loaded_version")
                    .arg(version)
                    .info(format_args!("Loaded version {version}"));
            }
            base::Event::LoadClient => {
                self.out.log("load_client")
                    .pending("Loading client");
            }
            base::Event::LoadedClient { file } => {
                self.out.log("loaded_client")
                    .arg(file.display())
                    .info("Loaded client");
            }
            base::Event::LoadLibraries => {
                self.out.log("load_libraries")
                    .pending("Loading libraries");
            }
            base::Event::FilterLibraries { .. } => {}
            base::Event::LoadedLibraries { libraries } => {
                self.out.log("loaded_libraries")
                    .args(libraries.iter().map(|library| &library.name))
                    .info(format_args!("Loaded {} libraries", libraries.len()));
            }
            base::Event::FilterLibrariesFiles { .. } => {}
            base::Event::LoadedLibrariesFiles { class_files, natives_files } => {
                self.out.log("loaded_libraries_files")
                    .arg(class_files.len())
                    .arg(natives_files.len())
                    .info(format_args!("Resolved {} class path entries and {} natives", class_files.len(), natives_files.len()));
            }
            base::Event::NoLogger => {
                self.out.log("no_logger")
                    .info("No logging config");
            }
            base::Event::LoadLogger { id } => {
                self.out.log("load_logger")
                    .arg(id)
                    .pending(format_args!("Loading logging config {id}"));
            }
            base::Event::LoadedLogger { id } => {
                self.out.log("loaded_logger")
                    .arg(id)
                    .info(format_args!("Loaded logging config {id}"));
            }
            base::Event::NoAssets => {
                self.out.log("no_assets")
                    .info("No assets");
            }
            base::Event::LoadAssets { id } => {
                self.out.log("load_assets")
                    .arg(id)
                    .pending(format_args!("Loading assets {id}"));
            }
            base::Event::LoadedAssets { id, count } => {
                self.out.log("loaded_assets")
                    .arg(id)
                    .arg(count)
                    .info(format_args!("Loaded {count} assets from {id}"));
            }
            base::Event::VerifiedAssets { id, count } => {
                self.out.log("verified_assets")
                    .arg(id)
                    .arg(count)
                    .info(format_args!("Verified {count} assets from {id}"));
            }
            base::Event::LoadJvm { major_version } => {
                self.out.log("load_jvm")
                    .arg(major_version)
                    .pending(format_args!("Loading a major {major_version} Java runtime"));
            }
            base::Event::FoundJvmSystemVersion { file, version, compatible } => {
                let verdict = if compatible { "Found" } else { "Rejected" };
                self.out.log("found_jvm_system_version")
                    .arg(file.display())
                    .arg(version)
                    .arg(compatible)
                    .info(format_args!("{verdict} system runtime {version} ({})", file.display()));
            }
            base::Event::WarnJvmUnsupportedDynamicCrt => {
                self.out.log("warn_jvm_unsupported_dynamic_crt")
                    .warning("No Mojang runtime without a dynamic C runtime (musl)");
            }
            base::Event::WarnJvmUnsupportedPlatform => {
                self.out.log("warn_jvm_unsupported_platform")
                    .warning("No Mojang runtime for this platform");
            }
            base::Event::WarnJvmMissingDistribution => {
                self.out.log("warn_jvm_missing_distribution")
                    .warning("No Mojang runtime distribution matches this version");
            }
            base::Event::LoadedJvm { file, version, compatible } => {
                let mut log = self.out.log("loaded_jvm");
                log.arg(file.display());
                log.args(version);
                log.arg(compatible);
                log.info(format_args!("Loaded Java runtime {} ({})", version.unwrap_or("unknown version"), file.display()));
                if !compatible {
                    log.warning("This runtime is likely unable to run the game");
                }
            }
            base::Event::DownloadResources { .. } => {
                self.out.log("download_resources")
                    .pending("Downloading");
            }
            base::Event::DownloadProgress { count, total_count, bytes, total_bytes } => {
                download::Handler::on_progress(self, download::Progress { count, total_count, bytes, total_bytes });
            }
            base::Event::DownloadedResources => {
                self.out.log("downloaded_resources")
                    .success("Downloaded");
            }
            base::Event::ExtractedBinaries { dir } => {
                self.out.log("extracted_binaries")
                    .arg(dir.display())
                    .info(format_args!("Natives placed in {}", dir.display()));
            }
            _ => {}
        }
    }

}

impl moj::Handler for LogHandler<'_> {

    fn on_event(&mut self, event: moj::Event) {
        match event {
            moj::Event::Base(event) => {
                base::Handler::on_event(self, event);
            }
            moj::Event::InvalidatedVersion { version } => {
                self.out.log("invalidated_version")
                    .arg(version)
                    .info(format_args!("Version {version} is stale, fetching it again"));
            }
            moj::Event::FetchVersion { version } => {
                self.out.log("fetch_version")
                    .arg(version)
                    .pending(format_args!("Fetching version {version}"));
            }
            moj::Event::FetchedVersion { version } => {
                self.out.log("fetched_version")
                    .arg(version)
                    .success(format_args!("Fetched version {version}"));
            }
            moj::Event::FixedLegacyQuickPlay => {
                self.out.log("fixed_legacy_quick_play")
                    .info("Fix: quick play through the legacy server arguments");
            }
            moj::Event::FixedLegacyProxy { host, port } => {
                self.out.log("fixed_legacy_proxy")
                    .arg(host)
                    .arg(port)
                    .info(format_args!("Fix: legacy online services through {host}:{port}"));
            }
            moj::Event::FixedLegacyMergeSort => {
                self.out.log("fixed_legacy_merge_sort")
                    .info("Fix: legacy merge sort");
            }
            moj::Event::FixedLegacyResolution => {
                self.out.log("fixed_legacy_resolution")
                    .info("Fix: window size through the legacy arguments");
            }
            moj::Event::FixedBrokenAuthlib => {
                self.out.log("fixed_broken_authlib")
                    .info("Fix: broken authlib 2.1.28 replaced by 2.2.30");
            }
            moj::Event::WarnUnsupportedQuickPlay => {
                self.out.log("warn_unsupported_quick_play")
                    .warning("This version cannot quick play");
            }
            moj::Event::WarnUnsupportedResolution => {
                self.out.log("warn_unsupported_resolution")
                    .warning("This version cannot set the window size");
            }
            _ => {}
        }
    }

}

impl fabric::Handler for LogHandler<'_> {

    fn on_event(&mut self, event: fabric::Event) {

        let api_id = self.api_id;
        let api_name = self.api_name;

        match event {
            fabric::Event::Mojang(event) => {
                moj::Handler::on_event(self, event);
            }
            fabric::Event::FetchVersion { game_version, loader_version } => {
                self.out.log(format_args!("{api_id}_fetch_version"))
                    .arg(game_version)
                    .arg(loader_version)
                    .pending(format_args!("Fetching {api_name} {loader_version} for {game_version}"));
            }
            fabric::Event::FetchedVersion { game_version, loader_version } => {
                self.out.log(format_args!("{api_id}_fetched_version"))
                    .arg(game_version)
                    .arg(loader_version)
                    .success(format_args!("Fetched {api_name} {loader_version} for {game_version}"));
            }
            _ => {}
        }

    }

}

impl forge::Handler for LogHandler<'_> {

    fn on_event(&mut self, event: forge::Event) {

        let api_id = self.api_id;
        let api_name = self.api_name;

        match event {
            forge::Event::Mojang(event) => {
                moj::Handler::on_event(self, event);
            }
            forge::Event::InstallingGame => {
                self.out.log(format_args!("{api_id}_installing_game"))
                    .info("Installing the game version the loader builds on");
            }
            forge::Event::Installing { tmp_dir, reason } => {
                let reason_code = match reason {
                    forge::InstallReason::MissingVersionMetadata => "missing_version_metadata",
                    forge::InstallReason::MissingCoreLibrary => "missing_core_library",
                };
                self.out.log(format_args!("{api_id}_installing"))
                    .arg(reason_code)
                    .arg(tmp_dir.display())
                    .info(format_args!("Running the {api_name} installer ({reason_code})"));
            }
            forge::Event::FetchInstaller { version } => {
                self.out.log(format_args!("{api_id}_fetch_installer"))
                    .arg(version)
                    .pending(format_args!("Fetching the {api_name} installer {version}"));
            }
            forge::Event::FetchedInstaller { version } => {
                self.out.log(format_args!("{api_id}_fetched_installer"))
                    .arg(version)
                    .success(format_args!("Fetched the {api_name} installer {version}"));
            }
            forge::Event::FetchInstallerLibraries => {
                self.out.log(format_args!("{api_id}_fetch_installer_libraries"))
                    .pending("Fetching the installer libraries");
            }
            forge::Event::FetchedInstallerLibraries => {
                self.out.log(format_args!("{api_id}_fetched_installer_libraries"))
                    .success("Fetched the installer libraries");
            }
            forge::Event::RunInstallerProcessor { name, task } => {

                let fallback = name.to_string();
                let title: &str = match (name.artifact(), task) {
                    ("installertools", Some("MCP_DATA")) => "Generating MCP data",
                    ("installertools", Some("DOWNLOAD_MOJMAPS")) => "Downloading Mojang mappings",
                    ("installertools", Some("MERGE_MAPPING")) => "Merging mappings",
                    ("jarsplitter", _) => "Splitting the client",
                    ("ForgeAutoRenamingTool", _) => "Renaming the client (Forge)",
                    ("AutoRenamingTool", _) if name.group() == "net.neoforged" => "Renaming the client (NeoForge)",
                    ("vignette", _) => "Renaming the client (Vignette)",
                    ("SpecialSource", _) => "Renaming the client (SpecialSource)",
                    ("binarypatcher", _) => "Patching the client",
                    _ => &fallback,
                };

                self.out.log(format_args!("{api_id}_installer_processor"))
                    .arg(&fallback)
                    .args(task)
                    .pending(title)
                    .info(format_args!("{fallback} ({})", task.unwrap_or("no task")));

            }
            forge::Event::Installed => {
                self.out.log(format_args!("{api_id}_installed"))
                    .success("Loader installed");
            }
            _ => {}
        }

    }

}

/// Log a base error and return the exit code suited to it.
pub fn log_base_error(cli: &mut Cli, error: &base::Error) -> u8 {

    use base::Error;

    match error {
        Error::HierarchyLoop { version } => {
            cli.out.log("error_hierarchy_loop")
                .arg(version)
                .error(format_args!("Version {version} inherits from itself (directly or not)"));
            EXIT_FAILURE
        }
        Error::VersionNotFound { version } => {
            cli.out.log("error_version_not_found")
                .arg(version)
                .error(format_args!("Version {version} not found"));
            EXIT_VERSION_NOT_FOUND
        }
        Error::AssetsNotFound { id } => {
            cli.out.log("error_assets_not_found")
                .arg(id)
                .error(format_args!("The required assets index {id} is not installed and has no download"));
            EXIT_FAILURE
        }
        Error::ClientNotFound {  } => {
            cli.out.log("error_client_not_found")
                .error("The client archive is not installed and has no download");
            EXIT_FAILURE
        }
        Error::LibraryNotFound { name } => {
            cli.out.log("error_library_not_found")
                .arg(name)
                .error(format_args!("Library {name} is not installed and has no download"));
            EXIT_FAILURE
        }
        Error::JvmNotFound { major_version } => {
            let mut log = cli.out.log("error_jvm_not_found");
            log.arg(major_version);
            log.error(format_args!("No Java runtime of major version {major_version} found"));
            log.additional("Verbose mode details why the probed runtimes were rejected");
            if *major_version <= 8 {
                log.additional("Major version 8 and older require an exact version match");
            }
            EXIT_FAILURE
        }
        Error::MainClassNotFound {  } => {
            cli.out.log("error_main_class_not_found")
                .error("The version names no main class");
            EXIT_FAILURE
        }
        Error::DownloadResourcesCancelled {  } => {
            cli.out.log("error_download_cancelled")
                .error("Download cancelled");
            EXIT_FAILURE
        }
        Error::Download { failures } => {
            log_download_failures(cli, failures);
            EXIT_FAILURE
        }
        Error::Internal { error, origin } => {
            cli.out.log("error_base")
                .arg(origin)
                .error(format_args!("Failure at: {origin}"));
            log_any_error(cli, &**error);
            EXIT_FAILURE
        }
        _ => EXIT_FAILURE,
    }

}

/// Log a Mojang error and return the exit code suited to it.
pub fn log_mojang_error(cli: &mut Cli, error: &moj::Error) -> u8 {
    match error {
        moj::Error::Base(error) => log_base_error(cli, error),
        moj::Error::LwjglFixNotFound { version } => {
            cli.out.log("error_lwjgl_fix_not_found")
                .arg(version)
                .error(format_args!("Cannot override LWJGL to {version}"))
                .additional("The version may be too old (< 3.2.3) or lack natives for this platform");
            EXIT_FAILURE
        }
        _ => EXIT_FAILURE,
    }
}

pub fn log_fabric_error(cli: &mut Cli, error: &fabric::Error, loader: fabric::Loader) -> u8 {

    use fabric::Error;

    let (api_id, api_name) = fabric_id_name(loader);

    match *error {
        Error::Mojang(ref error) => log_mojang_error(cli, error),
        Error::LatestVersionNotFound { ref game_version, stable } => {

            let channel = if stable { "stable" } else { "unstable" };
            let mut log = cli.out.log(format_args!("error_{api_id}_latest_version_not_found"));
            log.arg(channel);
            log.args(game_version.as_ref());

            match game_version {
                Some(game_version) =>
                    log.error(format_args!("{api_name} has no {channel} loader for {game_version}")),
                None =>
                    log.error(format_args!("{api_name} lists no {channel} game version")),
            };

            EXIT_VERSION_NOT_FOUND

        }
        Error::GameVersionNotFound { ref game_version } => {
            cli.out.log(format_args!("error_{api_id}_game_version_not_found"))
                .arg(game_version)
                .error(format_args!("{api_name} does not support game version {game_version}"));
            EXIT_VERSION_NOT_FOUND
        }
        Error::LoaderVersionNotFound { ref game_version, ref loader_version } => {
            cli.out.log(format_args!("error_{api_id}_loader_version_not_found"))
                .arg(game_version)
                .arg(loader_version)
                .error(format_args!("{api_name} has no loader {loader_version} for {game_version}"));
            EXIT_VERSION_NOT_FOUND
        }
        _ => EXIT_FAILURE,
    }

}

pub fn log_forge_error(cli: &mut Cli, error: &forge::Error, loader: forge::Loader) -> u8 {

    use forge::Error;

    let (api_id, api_name) = forge_id_name(loader);

    const REPORT: &str = "This loader version may be unsupported, please report it to the developers";

    match *error {
        Error::Mojang(ref error) => log_mojang_error(cli, error),
        Error::LatestVersionNotFound { ref game_version, stable } => {
            let channel = if stable { "stable" } else { "unstable" };
            cli.out.log(format_args!("error_{api_id}_latest_version_not_found"))
                .arg(channel)
                .arg(game_version)
                .error(format_args!("{api_name} has no {channel} loader for {game_version}"))
                .additional("The game version may not be supported by the loader yet");
            EXIT_VERSION_NOT_FOUND
        }
        Error::InstallerNotFound { ref version } => {
            cli.out.log(format_args!("error_{api_id}_installer_not_found"))
                .arg(version)
                .error(format_args!("{api_name} has no installer for {version}"))
                .additional("The very old versions without an installer are not supported");
            EXIT_VERSION_NOT_FOUND
        }
        Error::MavenMetadataMalformed {  } => {
            cli.out.log(format_args!("error_{api_id}_maven_metadata_malformed"))
                .error(format_args!("The {api_name} repository metadata cannot be parsed"));
            EXIT_FAILURE
        }
        Error::InstallerProfileNotFound {  } => {
            cli.out.log(format_args!("error_{api_id}_installer_profile_not_found"))
                .error(format_args!("The {api_name} installer has no readable install profile"))
                .additional(REPORT);
            EXIT_FAILURE
        }
        Error::InstallerProfileIncoherent {  } => {
            cli.out.log(format_args!("error_{api_id}_installer_profile_incoherent"))
                .error(format_args!("The {api_name} install profile references unresolvable data"))
                .additional(REPORT);
            EXIT_FAILURE
        }
        Error::InstallerVersionMetadataNotFound {  } => {
            cli.out.log(format_args!("error_{api_id}_installer_version_metadata_not_found"))
                .error(format_args!("The {api_name} installer embeds no version metadata"))
                .additional(REPORT);
            EXIT_FAILURE
        }
        Error::InstallerFileNotFound { ref entry } => {
            cli.out.log(format_args!("error_{api_id}_installer_file_not_found"))
                .arg(entry)
                .error(format_args!("The {api_name} installer misses a required entry: {entry}"))
                .additional(REPORT);
            EXIT_FAILURE
        }
        Error::InstallerProcessorNotFound { ref name } => {
            cli.out.log(format_args!("error_{api_id}_installer_processor_not_found"))
                .arg(name)
                .error(format_args!("Missing {api_name} installer processor {name}"))
                .additional(REPORT);
            EXIT_FAILURE
        }
        Error::InstallerProcessorMainClassNotFound { ref name } => {
            cli.out.log(format_args!("error_{api_id}_installer_processor_main_class_not_found"))
                .arg(name)
                .error(format_args!("No main class in {api_name} installer processor {name}"))
                .additional(REPORT);
            EXIT_FAILURE
        }
        Error::InstallerProcessorDependencyNotFound { ref name, ref dependency } => {
            cli.out.log(format_args!("error_{api_id}_installer_processor_dependency_not_found"))
                .arg(name)
                .arg(dependency)
                .error(format_args!("Missing dependency {dependency} of {api_name} installer processor {name}"))
                .additional(REPORT);
            EXIT_FAILURE
        }
        Error::InstallerProcessorFailed { ref name, ref output } => {

            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);

            let mut log = cli.out.log(format_args!("error_{api_id}_installer_processor_failed"));
            log.arg(name);
            log.args(output.status.code());
            log.arg(&stdout);
            log.arg(&stderr);
            log.error(format_args!("{api_name} installer processor {name} failed ({})", output.status));
            log.additional(format_args!("stdout: {stdout}"));
            log.additional(format_args!("stderr: {stderr}"));
            log.additional(REPORT);
            EXIT_FAILURE

        }
        Error::InstallerProcessorCorrupted { ref name, ref file, ref expected_sha1 } => {
            cli.out.log(format_args!("error_{api_id}_installer_processor_corrupted"))
                .arg(name)
                .arg(file.display())
                .arg(Hex(&expected_sha1[..]))
                .error(format_args!("{api_name} installer processor {name} produced a corrupted output"))
                .additional(format_args!("At: {}", file.display()))
                .additional(format_args!("Expected SHA-1: {}", Hex(&expected_sha1[..])))
                .additional(REPORT);
            EXIT_FAILURE
        }
        _ => EXIT_FAILURE,
    }

}

/// Log the failed entries of a download batch.
pub fn log_download_failures(cli: &mut Cli, failures: &[download::Failure]) {

    use download::Reason;

    // error_download <failed_count>
    cli.out.log("error_download")
        .arg(failures.len())
        .error(format_args!("{} downloads failed...", failures.len()));

    // error_download_entry <url> <file> <reason> [reason_data]
    for failure in failures {

        let mut log = cli.out.log("error_download_entry");
        log.arg(&failure.url);
        log.arg(failure.file.display());
        log.error(&failure.url);
        log.additional(format_args!("-> {}", failure.file.display()));

        match &failure.reason {
            Reason::Status(code) => {
                log.arg("status");
                log.arg(code);
                log.additional(format_args!("   Unexpected status {code}"));
            }
            Reason::Size { actual } => {
                log.arg("size");
                log.arg(actual);
                log.additional(format_args!("   Size mismatch, received {actual} bytes"));
            }
            Reason::Sha1 { actual } => {
                log.arg("sha1");
                log.arg(Hex(&actual[..]));
                log.additional(format_args!("   SHA-1 mismatch, received {}", Hex(&actual[..])));
            }
            Reason::Cancelled => {
                log.arg("cancelled");
                log.additional("   Cancelled");
            }
            Reason::Io(error) => {
                log.arg("io");
                log.arg(error);
                log.additional(format_args!("   I/O error: {error}"));
            }
            Reason::Request(error) => {
                log.arg("request");
                log.arg(error);
                log.additional(format_args!("   Request error: {error}"));
            }
            _ => {
                log.arg("unknown");
            }
        }

    }

}

/// Log any boxed lower-level error with its source chain, downcasting the types
/// the library documents.
pub fn log_any_error(cli: &mut Cli, error: &(dyn std::error::Error + 'static)) {

    if let Some(error) = error.downcast_ref::<io::Error>() {
        cli.out.log("error_io")
            .arg(error)
            .error(format_args!("I/O error: {error}"));
    } else if let Some(error) = error.downcast_ref::<reqwest::Error>() {
        cli.out.log("error_request")
            .args(error.status().map(|status| format!("status:{}", status.as_u16())))
            .args(error.url().map(|url| format!("url:{url}")))
            .error(format_args!("Request error: {error}"));
    } else if let Some(error) = error.downcast_ref::<serde_json::Error>() {
        cli.out.log("error_json")
            .arg(error)
            .error(format_args!("JSON error: {error}"));
    } else if let Some(error) = error.downcast_ref::<serde_path_to_error::Error<serde_json::Error>>() {
        cli.out.log("error_json")
            .arg(error.inner())
            .arg(error.path())
            .error(format_args!("JSON error: {error}"))
            .additional(format_args!("At {}", error.path()));
    } else {
        cli.out.log("error_other")
            .arg(error)
            .error(format_args!("{error}"));
    }

    if let Some(source) = error.source() {
        log_any_error(cli, source);
    }

}

/// The machine tag prefix and display name of a Fabric-family loader.
fn fabric_id_name(loader: fabric::Loader) -> (&'static str, &'static str) {
    use fabric::Loader;
    match loader {
        Loader::Fabric => ("fabric", "Fabric"),
        Loader::Quilt => ("quilt", "Quilt"),
        Loader::LegacyFabric => ("legacyfabric", "LegacyFabric"),
        Loader::Babric => ("babric", "Babric"),
    }
}

/// The machine tag prefix and display name of a Forge-family loader.
fn forge_id_name(loader: forge::Loader) -> (&'static str, &'static str) {
    use forge::Loader;
    match loader {
        Loader::Forge => ("forge", "Forge"),
        Loader::NeoForge => ("neoforge", "NeoForge"),
    }
}
