//! Installer layer for the Forge and NeoForge mod loaders.
//!
//! Both loaders ship an installer JAR per version. After resolving the loader
//! version (aliases included) and fully installing the underlying game version,
//! the installer JAR is fetched and interpreted: the modern scheme materializes a
//! set of libraries and runs declared processor subprocesses whose outputs are
//! verified by hash, the legacy scheme extracts the embedded universal JAR. The
//! installer JAR itself is only ever parsed as an archive, none of its code runs
//! in this process. Both schemes end by writing the loader descriptor, which
//! inherits from the vanilla version, and the regular install of it takes over.

mod serde;

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader};
use std::process::{Command, Output, Stdio};
use std::path::{Path, PathBuf};
use std::fs::{self, File};

use uuid::Uuid;
use zip::ZipArchive;

use crate::base::{self, Game, canonicalize, verify_file, write_descriptor};
use crate::codec::Sha1Hash;
use crate::download::{self, Batch, Download};
use crate::maven::{Gav, MavenMetadata};
use crate::moj::{self, HandlerInto as _};


/// The Forge promotions document, naming the recommended and latest loader of
/// each game version.
const PROMOTIONS_URL: &str = "https://files.minecraftforge.net/net/minecraftforge/forge/promotions_slim.json";

/// The Forge/NeoForge installer.
#[derive(Debug, Clone)]
pub struct Installer {
    mojang: moj::Installer,
    loader: Loader,
    version: Version,
}

impl Installer {

    /// An installer for the given loader and version.
    pub fn new(loader: Loader, version: impl Into<Version>) -> Self {
        Self {
            mojang: moj::Installer::new(String::new()),
            loader,
            version: version.into(),
        }
    }

    /// The underlying Mojang installer.
    #[inline]
    pub fn mojang(&self) -> &moj::Installer {
        &self.mojang
    }

    /// The underlying Mojang installer; its root version is overwritten when
    /// installing.
    #[inline]
    pub fn mojang_mut(&mut self) -> &mut moj::Installer {
        &mut self.mojang
    }

    /// The loader this installer targets.
    #[inline]
    pub fn loader(&self) -> Loader {
        self.loader
    }

    #[inline]
    pub fn set_loader(&mut self, loader: Loader) -> &mut Self {
        self.loader = loader;
        self
    }

    /// The loader version to install.
    #[inline]
    pub fn version(&self) -> &Version {
        &self.version
    }

    #[inline]
    pub fn set_version(&mut self, version: impl Into<Version>) -> &mut Self {
        self.version = version.into();
        self
    }

    /// Install the configured loader and return the game to launch.
    #[inline]
    pub fn install(&mut self, mut handler: impl Handler) -> Result<Game> {
        self.install_impl(&mut handler)
    }

    #[inline(never)]
    fn install_impl(&mut self, handler: &mut dyn Handler) -> Result<Game> {

        let loader = self.loader;

        let loader_version = match &self.version {
            Version::Id(id) => resolve_aliases(loader, id)?,
            Version::Stable(game) => resolve_latest(loader, game, true)?,
            Version::Unstable(game) => resolve_latest(loader, game, false)?,
        };

        let game_version = loader.game_version(&loader_version)
            .ok_or_else(|| Error::InstallerNotFound { version: loader_version.clone() })?;

        let root_version = format!("{}-{loader_version}", loader.prefix());

        // The vanilla version is installed first and fully: the processors need
        // its client archive and the Java runtime picked for it.
        handler.on_event(Event::InstallingGame);
        self.mojang.set_version(&game_version);
        let vanilla = self.mojang.install(Relay { handler: &mut *handler })?;

        let descriptor_file = self.mojang.base().versions_dir()
            .join(&root_version)
            .join(format!("{root_version}.json"));

        if let Some(reason) = self.install_reason(&descriptor_file)? {

            let setup = LoaderSetup {
                loader,
                root_version: &root_version,
                game_version: &game_version,
                loader_version: &loader_version,
                jvm_file: &vanilla.jvm_file,
                mojang: &self.mojang,
            };

            setup.install(&mut *handler, &descriptor_file, reason)?;
            handler.on_event(Event::Installed);

        }

        self.mojang.set_version(root_version);
        let game = self.mojang.install(Relay { handler: &mut *handler })?;

        Ok(game)

    }

    /// Decide whether the loader must be (re)installed: when its descriptor is
    /// missing or unreadable, or when one of the libraries only the installer can
    /// materialize (those without any download source) is gone.
    fn install_reason(&self, descriptor_file: &Path) -> Result<Option<InstallReason>> {

        let reader = match File::open(descriptor_file) {
            Ok(reader) => BufReader::new(reader),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Some(InstallReason::MissingVersionMetadata));
            }
            Err(e) => return Err(base::Error::internal(e, descriptor_file.display().to_string()).into()),
        };

        let Ok(descriptor) = serde_json::from_reader::<_, base::serde::Descriptor>(reader) else {
            return Ok(Some(InstallReason::MissingVersionMetadata));
        };

        let libraries_dir = self.mojang.base().libraries_dir();

        for entry in &descriptor.libraries {

            let downloadable = match &entry.downloads.artifact {
                Some(artifact) => !artifact.source.url.is_empty(),
                None => entry.url.is_some(),
            };

            if downloadable {
                continue;
            }

            let file = match entry.downloads.artifact.as_ref().and_then(|a| a.path.as_deref()) {
                Some(path) => libraries_dir.join(path),
                None => libraries_dir.join(entry.name.file_path()),
            };

            if !file.is_file() {
                return Ok(Some(InstallReason::MissingCoreLibrary));
            }

        }

        Ok(None)

    }

}

/// Events of this layer, wrapping the Mojang events.
#[derive(Debug)]
#[non_exhaustive]
pub enum Event<'a> {
    /// A relayed Mojang event.
    Mojang(moj::Event<'a>),
    /// The underlying game version is being installed first.
    InstallingGame,
    /// The loader is being (re)installed for the given reason, with the temporary
    /// directory its installer works in.
    Installing { tmp_dir: &'a Path, reason: InstallReason },
    /// The installer JAR is being fetched.
    FetchInstaller { version: &'a str },
    /// The installer JAR was fetched.
    FetchedInstaller { version: &'a str },
    /// The libraries required by the processors are being fetched.
    FetchInstallerLibraries,
    /// The processor libraries were fetched.
    FetchedInstallerLibraries,
    /// A processor subprocess is about to run, with its `--task` when it has one.
    RunInstallerProcessor { name: &'a Gav, task: Option<&'a str> },
    /// The loader is installed, its own install now proceeds.
    Installed,
}

/// Why the loader installer has to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReason {
    /// The loader descriptor is missing or unreadable.
    MissingVersionMetadata,
    /// A library only the installer can produce is missing.
    MissingCoreLibrary,
}

/// Receiver of the [`Event`] stream of this layer.
pub trait Handler {

    fn on_event(&mut self, event: Event);

    /// See [`base::Handler::is_cancelled`].
    fn is_cancelled(&mut self) -> bool {
        false
    }

}

impl<H: Handler + ?Sized> Handler for &mut H {

    fn on_event(&mut self, event: Event) {
        (**self).on_event(event)
    }

    fn is_cancelled(&mut self) -> bool {
        (**self).is_cancelled()
    }

}

impl Handler for () {
    fn on_event(&mut self, event: Event) {
        let _ = event;
    }
}

/// Bridge relaying Mojang events as forge events.
struct Relay<'a> {
    handler: &'a mut dyn Handler,
}

impl moj::Handler for Relay<'_> {

    fn on_event(&mut self, event: moj::Event) {
        self.handler.on_event(Event::Mojang(event));
    }

    fn is_cancelled(&mut self) -> bool {
        self.handler.is_cancelled()
    }

}

/// Failure of a Forge/NeoForge install.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A failure of the underlying Mojang install.
    #[error("mojang: {0}")]
    Mojang(#[source] moj::Error),
    /// No latest loader version exists for that game version.
    #[error("latest version not found: {game_version} (stable: {stable})")]
    LatestVersionNotFound { game_version: String, stable: bool },
    /// The loader version has no installer JAR on the repository.
    #[error("installer not found: {version}")]
    InstallerNotFound { version: String },
    /// The repository's maven metadata could not be parsed.
    #[error("maven metadata is malformed")]
    MavenMetadataMalformed {  },
    /// The installer has no readable `install_profile.json`.
    #[error("installer profile not found")]
    InstallerProfileNotFound {  },
    /// The installer profile references data that cannot be resolved.
    #[error("installer profile incoherent")]
    InstallerProfileIncoherent {  },
    /// The installer entry holding the version descriptor is missing.
    #[error("installer version metadata not found")]
    InstallerVersionMetadataNotFound {  },
    /// A required entry of the installer JAR is missing.
    #[error("installer file not found: {entry}")]
    InstallerFileNotFound { entry: String },
    /// The JAR of a processor is not among the materialized libraries.
    #[error("installer processor not found: {name}")]
    InstallerProcessorNotFound { name: Gav },
    /// The JAR of a processor declares no main class.
    #[error("installer processor main class not found: {name}")]
    InstallerProcessorMainClassNotFound { name: Gav },
    /// A classpath dependency of a processor is not among the libraries.
    #[error("installer processor dependency not found: {name}: {dependency}")]
    InstallerProcessorDependencyNotFound { name: Gav, dependency: Gav },
    /// A processor exited with a non-zero status; its captured output is carried.
    #[error("installer processor failed: {name} ({})", output.status)]
    InstallerProcessorFailed { name: Gav, output: Box<Output> },
    /// A processor terminated but one of its declared outputs has a wrong hash.
    #[error("installer processor corrupted output: {name} @ {}", file.display())]
    InstallerProcessorCorrupted {
        name: Gav,
        file: Box<Path>,
        expected_sha1: Box<[u8; 20]>,
    },
}

impl<E: Into<moj::Error>> From<E> for Error {
    fn from(value: E) -> Self {
        Self::Mojang(value.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The two loader families sharing the installer-JAR distribution model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    /// The original Forge loader.
    Forge,
    /// The NeoForge fork. Its first supported game version, 1.20.1, is published
    /// under a legacy `forge` artifact with game-prefixed versions, later versions
    /// under `neoforge` with `major.minor.patch` numbers following the game
    /// version without its leading `1.`.
    NeoForge,
}

impl Loader {

    /// Prefix of the loader version identifiers.
    fn prefix(self) -> &'static str {
        match self {
            Loader::Forge => "forge",
            Loader::NeoForge => "neoforge",
        }
    }

    /// Base URL of the loader's maven group, without a trailing slash.
    fn repository_url(self) -> &'static str {
        match self {
            Loader::Forge => "https://maven.minecraftforge.net/net/minecraftforge",
            Loader::NeoForge => "https://maven.neoforged.net/releases/net/neoforged",
        }
    }

    /// The artifact a loader version is published under.
    fn artifact(self, loader_version: &str) -> &'static str {
        match self {
            Loader::Forge => "forge",
            Loader::NeoForge if loader_version.starts_with("1.20.1-") => "forge",
            Loader::NeoForge => "neoforge",
        }
    }

    /// The prefix the published versions of a game version share.
    fn version_prefix(self, game_version: &str) -> Option<String> {
        match self {
            Loader::Forge => Some(format!("{game_version}-")),
            Loader::NeoForge if game_version == "1.20.1" => Some("1.20.1-".to_string()),
            Loader::NeoForge => {
                let (major, minor) = split_game_version(game_version)?;
                Some(format!("{major}.{minor}."))
            }
        }
    }

    /// Whether a published version belongs to the stable channel.
    fn version_stable(self, loader_version: &str) -> bool {
        match self {
            // Forge has no unstable channel.
            Loader::Forge => true,
            Loader::NeoForge => !loader_version.ends_with("-beta"),
        }
    }

    /// The game version a full loader version targets.
    fn game_version(self, loader_version: &str) -> Option<String> {
        match self {
            Loader::Forge => loader_version.split('-').next().map(str::to_string),
            Loader::NeoForge if loader_version.starts_with("1.20.1-") => Some("1.20.1".to_string()),
            Loader::NeoForge => {
                let mut numbers = loader_version.split('.');
                let major: u8 = numbers.next()?.parse().ok()?;
                let minor: u8 = numbers.next()?.parse().ok()?;
                numbers.next()?;
                Some(if minor == 0 {
                    format!("1.{major}")
                } else {
                    format!("1.{major}.{minor}")
                })
            }
        }
    }

}

/// The loader version to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    /// The latest stable loader for the given game version.
    Stable(String),
    /// The latest loader for the given game version, stable or not.
    Unstable(String),
    /// An explicit loader version: `<game>-<loader>` for Forge (the aliases
    /// `<game>-recommended`, `<game>-latest` and a bare game version are also
    /// understood), the full NeoForge number for NeoForge.
    Id(String),
}

impl<T: Into<String>> From<T> for Version {
    fn from(value: T) -> Self {
        Self::Id(value.into())
    }
}

/// List every loader version published on the repository, in release order. The
/// legacy NeoForge artifact covering 1.20.1 is not included.
pub fn request_versions(loader: Loader) -> Result<Vec<String>> {

    let artifact = match loader {
        Loader::Forge => "forge",
        Loader::NeoForge => "neoforge",
    };

    let metadata = request_maven_metadata(loader, artifact)?;
    Ok(metadata.versions().map(str::to_string).collect())

}

// -------------------- //
//  Version resolution  //
// -------------------- //

/// Resolve the Forge promotion aliases of a literal version: a bare game version
/// means its recommended (or failing that, latest) loader, and the explicit
/// `-recommended`/`-latest` suffixes query the promotions too. Anything else, and
/// every NeoForge version, passes through unchanged.
fn resolve_aliases(loader: Loader, id: &str) -> Result<String> {

    if loader != Loader::Forge {
        return Ok(id.to_string());
    }

    let (game_version, wanted) = if let Some(game) = id.strip_suffix("-recommended") {
        (game, &["recommended"][..])
    } else if let Some(game) = id.strip_suffix("-latest") {
        (game, &["latest"][..])
    } else if !id.contains('-') {
        (id, &["recommended", "latest"][..])
    } else {
        return Ok(id.to_string());
    };

    let promotions = request_promotions()?;

    let number = wanted.iter()
        .find_map(|channel| promotions.promos.get(&format!("{game_version}-{channel}")));

    match number {
        Some(number) => Ok(format!("{game_version}-{number}")),
        None => Err(Error::LatestVersionNotFound {
            game_version: game_version.to_string(),
            stable: wanted.contains(&"recommended"),
        }),
    }

}

/// Resolve the latest loader of a game version from the repository's maven
/// metadata, scanning from the recent end for a version with the right prefix.
fn resolve_latest(loader: Loader, game_version: &str, stable: bool) -> Result<String> {

    let not_found = || Error::LatestVersionNotFound {
        game_version: game_version.to_string(),
        stable,
    };

    let prefix = loader.version_prefix(game_version).ok_or_else(not_found)?;

    let artifact = match loader {
        Loader::NeoForge if game_version == "1.20.1" => "forge",
        loader => loader.artifact(&prefix),
    };

    let metadata = request_maven_metadata(loader, artifact)?;

    let version = metadata.versions()
        .rev()
        .find(|version| {
            version.starts_with(&prefix) && (!stable || loader.version_stable(version))
        })
        .map(str::to_string)
        .ok_or_else(not_found);

    version

}

fn request_maven_metadata(loader: Loader, artifact: &str) -> Result<MavenMetadata> {

    let url = format!("{}/{artifact}/maven-metadata.xml", loader.repository_url());

    let document = crate::net::block_on(async {
        crate::net::client()?
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/xml")
            .send().await?
            .error_for_status()?
            .text().await
    }).map_err(|e| Error::from(base::Error::internal(e, "maven metadata")))?;

    MavenMetadata::try_from_xml(&document)
        .ok_or(Error::MavenMetadataMalformed {  })

}

fn request_promotions() -> Result<serde::Promotions> {
    crate::net::block_on(async {
        crate::net::client()?
            .get(PROMOTIONS_URL)
            .header(reqwest::header::ACCEPT, "application/json")
            .send().await?
            .error_for_status()?
            .json::<serde::Promotions>().await
    }).map_err(|e| Error::from(base::Error::internal(e, "promotions")))
}

// ------------------------ //
//  Loader installer logic  //
// ------------------------ //

/// Context of one run of the loader installer.
struct LoaderSetup<'a> {
    loader: Loader,
    root_version: &'a str,
    game_version: &'a str,
    loader_version: &'a str,
    /// The Java runtime the vanilla install resolved, reused for the processors.
    jvm_file: &'a Path,
    mojang: &'a moj::Installer,
}

impl LoaderSetup<'_> {

    /// Run the loader installer inside a temporary directory, which is removed
    /// whatever the outcome.
    fn install(&self, handler: &mut dyn Handler, descriptor_file: &Path, reason: InstallReason) -> Result<()> {

        let tag = Uuid::new_v5(&base::NAMESPACE, self.root_version.as_bytes());
        let tmp_dir = self.mojang.base().bin_dir()
            .join(format!("{}-installer-{}", self.root_version, tag.hyphenated()));

        handler.on_event(Event::Installing { tmp_dir: &tmp_dir, reason });

        let outcome = self.run(handler, descriptor_file, &tmp_dir);
        let _ = fs::remove_dir_all(&tmp_dir);
        outcome

    }

    fn run(&self, handler: &mut dyn Handler, descriptor_file: &Path, tmp_dir: &Path) -> Result<()> {

        handler.on_event(Event::FetchInstaller { version: self.loader_version });
        let mut archive = self.fetch_installer(handler, tmp_dir)?;
        handler.on_event(Event::FetchedInstaller { version: self.loader_version });

        let profile: serde::InstallProfile = {
            let Ok(entry) = archive.by_name("install_profile.json") else {
                return Err(Error::InstallerProfileNotFound {  });
            };
            let mut deserializer = serde_json::Deserializer::from_reader(entry);
            match serde_path_to_error::deserialize(&mut deserializer) {
                Ok(profile) => profile,
                Err(_) => return Err(Error::InstallerProfileNotFound {  }),
            }
        };

        let mut descriptor = match profile {
            serde::InstallProfile::V2(profile) => self.run_v2(handler, &mut archive, profile, tmp_dir)?,
            serde::InstallProfile::V1(profile) => self.run_v1(&mut archive, profile)?,
        };

        // The descriptor lands last: an interrupted install leaves no descriptor
        // and is retried from scratch next time.
        descriptor.id = self.root_version.to_string();
        write_descriptor(descriptor_file, &descriptor)?;

        Ok(())

    }

    /// Fetch the installer JAR, probing the odd URL suffixes some old Forge
    /// versions were published under.
    fn fetch_installer(&self, handler: &mut dyn Handler, tmp_dir: &Path) -> Result<ZipArchive<File>> {

        let file = tmp_dir.join("installer.jar");
        let artifact = self.loader.artifact(self.loader_version);

        for suffix in std::iter::once("").chain(version_suffixes(self.loader, self.game_version).iter().copied()) {

            let full = format!("{}{suffix}", self.loader_version);
            let url = format!("{repo}/{artifact}/{full}/{artifact}-{full}-installer.jar",
                repo = self.loader.repository_url());

            let fetch = Download::new(url, file.clone())
                .keep_open()
                .fetch(Relay { handler: &mut *handler }.into_download());

            match fetch {
                Ok(mut fetched) => {
                    let handle = fetched.take_handle().unwrap();
                    return ZipArchive::new(handle)
                        .map_err(|e| base::Error::internal(e, file.display().to_string()).into());
                }
                Err(e) if failed_with_status(&e, 404) => continue,
                Err(e) => return Err(base::Error::from(e).into()),
            }

        }

        Err(Error::InstallerNotFound { version: self.loader_version.to_string() })

    }

    /// The modern scheme: read the separate descriptor, materialize the profile
    /// libraries, build the data map and run each client-side processor.
    fn run_v2(&self,
        handler: &mut dyn Handler,
        archive: &mut ZipArchive<File>,
        profile: serde::ProfileV2,
        tmp_dir: &Path,
    ) -> Result<base::serde::Descriptor> {

        let libraries_dir = self.mojang.base().libraries_dir();

        let descriptor: base::serde::Descriptor = {
            let entry = profile.json.strip_prefix('/').unwrap_or(&profile.json);
            let Ok(reader) = archive.by_name(entry) else {
                return Err(Error::InstallerVersionMetadataNotFound {  });
            };
            let mut deserializer = serde_json::Deserializer::from_reader(reader);
            serde_path_to_error::deserialize(&mut deserializer)
                .map_err(|_| Error::InstallerVersionMetadataNotFound {  })?
        };

        // The earlier V2 installers carry the loader artifact itself.
        if let Some(embedded) = &profile.path {
            let target = libraries_dir.join(embedded.file_path());
            extract_entry(archive, &format!("maven/{}", embedded.repo_path()), &target)?;
        }

        handler.on_event(Event::FetchInstallerLibraries);

        let mut batch = Batch::new();
        let mut locations: HashMap<Gav, PathBuf> = HashMap::new();

        for entry in &profile.libraries {

            let Some(artifact) = &entry.downloads.artifact else {
                return Err(Error::InstallerProfileIncoherent {  });
            };

            let file = match artifact.path.as_deref() {
                Some(path) => libraries_dir.join(path),
                None => libraries_dir.join(entry.name.file_path()),
            };

            locations.insert(entry.name.clone(), file.clone());

            if artifact.source.url.is_empty() {
                // An empty URL means the library is embedded in the installer.
                extract_entry(archive, &format!("maven/{}", entry.name.repo_path()), &file)?;
            } else if !verify_file(&file, artifact.source.size, artifact.source.sha1.as_deref()).map_err(Error::from)? {
                batch.add(Download::new(artifact.source.url.clone(), file)
                    .expect_size(artifact.source.size)
                    .expect_sha1(artifact.source.sha1.map(|h| h.0)));
            }

        }

        if !batch.is_empty() {
            batch.fetch(Relay { handler: &mut *handler }.into_download())
                .map_err(|e| Error::from(base::Error::from(e)))?;
        }

        handler.on_event(Event::FetchedInstallerLibraries);

        // The data map: client values, with `/`-prefixed values extracted out of
        // the installer first, plus the two values the profile cannot know.
        let mut values = HashMap::new();

        for (key, sided) in &profile.data {
            let mut value = sided.client.clone();
            if let Some(entry) = value.strip_prefix('/') {
                let target = tmp_dir.join(entry);
                extract_entry(archive, entry, &target)?;
                value = canonicalize(&target)?.display().to_string();
            }
            values.insert(key.clone(), value);
        }

        let vanilla_jar = canonicalize(&self.mojang.base().versions_dir()
            .join(self.game_version)
            .join(format!("{}.jar", self.game_version)))?;

        values.insert("SIDE".to_string(), "client".to_string());
        values.insert("MINECRAFT_JAR".to_string(), vanilla_jar.display().to_string());

        for processor in &profile.processors {

            let client_side = processor.sides.as_deref()
                .map(|sides| sides.contains(&serde::Side::Client))
                .unwrap_or(true);

            if client_side {
                self.run_processor(handler, processor, &locations, &values)?;
            }

        }

        Ok(descriptor)

    }

    /// Run one processor as a hermetic subprocess and verify its declared outputs.
    fn run_processor(&self,
        handler: &mut dyn Handler,
        processor: &serde::Processor,
        locations: &HashMap<Gav, PathBuf>,
        values: &HashMap<String, String>,
    ) -> Result<()> {

        let name = &processor.jar;

        let Some(jar_file) = locations.get(name) else {
            return Err(Error::InstallerProcessorNotFound { name: name.clone() });
        };

        // `-cp` and `-jar` are exclusive, so the entry class comes from the JAR
        // manifest and is passed explicitly.
        let main_class = read_main_class(jar_file)
            .map_err(|e| base::Error::internal(e, jar_file.display().to_string()))?
            .ok_or_else(|| Error::InstallerProcessorMainClassNotFound { name: name.clone() })?;

        let mut class_files = vec![jar_file.clone()];
        for dependency in &processor.classpath {
            match locations.get(dependency) {
                Some(file) => class_files.push(file.clone()),
                None => return Err(Error::InstallerProcessorDependencyNotFound {
                    name: name.clone(),
                    dependency: dependency.clone(),
                }),
            }
        }

        let mut args = Vec::with_capacity(processor.args.len());
        for arg in &processor.args {
            args.push(self.resolve_argument(arg, values)?);
        }

        let task = processor.args.iter()
            .position(|arg| arg == "--task")
            .and_then(|at| processor.args.get(at + 1))
            .map(String::as_str);

        handler.on_event(Event::RunInstallerProcessor { name, task });

        let output = Command::new(self.jvm_file)
            .arg("-cp")
            .arg(std::env::join_paths(&class_files).unwrap())
            .arg(&main_class)
            .args(&args)
            .current_dir(self.mojang.base().mc_dir())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| base::Error::internal(e, self.jvm_file.display().to_string()))?;

        if !output.status.success() {
            return Err(Error::InstallerProcessorFailed {
                name: name.clone(),
                output: Box::new(output),
            });
        }

        for (file_expr, sha1_expr) in &processor.outputs {

            let file = PathBuf::from(self.resolve_argument(file_expr, values)?);
            let sha1_text = self.resolve_argument(sha1_expr, values)?;

            let Some(expected) = Sha1Hash::from_hex(&sha1_text) else {
                return Err(Error::InstallerProfileIncoherent {  });
            };

            if !verify_file(&file, None, Some(&expected.0)).map_err(Error::from)? {
                return Err(Error::InstallerProcessorCorrupted {
                    name: name.clone(),
                    file: file.into_boxed_path(),
                    expected_sha1: Box::new(expected.0),
                });
            }

        }

        Ok(())

    }

    /// Resolve one processor argument: `{NAME}` placeholders come from the data
    /// map, a `[coordinate]` form names a library path and single quotes wrap a
    /// literal.
    fn resolve_argument(&self, argument: &str, values: &HashMap<String, String>) -> Result<String> {

        let resolved = fill_braces(argument, values)
            .ok_or(Error::InstallerProfileIncoherent {  })?;

        if let Some(coordinate) = resolved.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            let gav: Gav = coordinate.parse()
                .map_err(|()| Error::InstallerProfileIncoherent {  })?;
            let file = self.mojang.base().libraries_dir().join(gav.file_path());
            return Ok(file.display().to_string());
        }

        if resolved.len() >= 2 {
            if let Some(literal) = resolved.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
                return Ok(literal.to_string());
            }
        }

        Ok(resolved)

    }

    /// The legacy scheme: take the embedded descriptor, repair its known quirks
    /// and extract the embedded universal JAR.
    fn run_v1(&self, archive: &mut ZipArchive<File>, profile: serde::ProfileV1) -> Result<base::serde::Descriptor> {

        let mut descriptor = profile.version_info;

        // The oldest installers (<= 1.6.4) forgot the parent version.
        if descriptor.inherits_from.is_none() {
            descriptor.inherits_from = Some(profile.install.minecraft.clone());
        }

        // Libraries without any source used to be resolvable against the default
        // repository, which modern parents no longer install.
        for entry in &mut descriptor.libraries {
            let sourceless = entry.downloads.artifact.is_none()
                && entry.downloads.classifiers.is_empty()
                && entry.url.is_none();
            if sourceless {
                entry.url = Some(base::LIBRARY_REPO_URL.to_string());
            }
        }

        let target = self.mojang.base().libraries_dir()
            .join(profile.install.path.file_path());
        extract_entry(archive, &profile.install.file_path, &target)?;

        Ok(descriptor)

    }

}

/// True when a fetch failed purely with the given HTTP status.
fn failed_with_status(error: &download::Error, status: u16) -> bool {
    match error {
        download::Error::Failed(failures) => failures.iter()
            .all(|failure| matches!(failure.reason, download::Reason::Status(code) if code == status)),
        _ => false,
    }
}

/// Copy one entry of the installer out to a file, creating parent directories.
fn extract_entry(archive: &mut ZipArchive<File>, entry: &str, target: &Path) -> Result<()> {

    let Ok(mut reader) = archive.by_name(entry) else {
        return Err(Error::InstallerFileNotFound { entry: entry.to_string() });
    };

    base::ensure_parent(target)?;

    let mut writer = File::create(target)
        .map_err(|e| base::Error::internal(e, target.display().to_string()))?;

    io::copy(&mut reader, &mut writer)
        .map_err(|e| base::Error::internal(e, target.display().to_string()))?;

    Ok(())

}

/// The `Main-Class` attribute of a JAR manifest.
fn read_main_class(jar_file: &Path) -> io::Result<Option<String>> {

    let mut archive = ZipArchive::new(File::open(jar_file)?)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let Ok(manifest) = archive.by_name("META-INF/MANIFEST.MF") else {
        return Ok(None);
    };

    for line in BufReader::new(manifest).lines() {
        if let Some(value) = line?.strip_prefix("Main-Class: ") {
            return Ok(Some(value.trim().to_string()));
        }
    }

    Ok(None)

}

/// Replace every `{NAME}` of the argument with its value, none when a name has no
/// value or a brace never closes.
fn fill_braces(argument: &str, values: &HashMap<String, String>) -> Option<String> {

    let mut out = String::with_capacity(argument.len());
    let mut rest = argument;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let (name, after) = rest[open + 1..].split_once('}')?;
        out.push_str(values.get(name)?);
        rest = after;
    }

    out.push_str(rest);
    Some(out)

}

/// Old Forge installers of some game versions were published with odd suffixes
/// appended to the loader version, probed in order after the plain form.
fn version_suffixes(loader: Loader, game_version: &str) -> &'static [&'static str] {

    if loader != Loader::Forge {
        return &[];
    }

    match game_version {
        "1.11" => &["-1.11.x"],
        "1.10" | "1.10.2" => &["-1.10.0"],
        "1.9.4" => &["-1.9.4"],
        "1.9" => &["-1.9.0", "-1.9"],
        "1.8.9" => &["-1.8.9"],
        "1.8.8" => &["-1.8.8"],
        "1.8" => &["-1.8"],
        "1.7.10" => &["-1.7.10", "-1710ls", "-new"],
        "1.7.2" => &["-mc172"],
        _ => &[],
    }

}

/// Split a `1.major[.minor]` game version into its numbers.
fn split_game_version(game_version: &str) -> Option<(u8, u8)> {
    let rest = game_version.strip_prefix("1.")?;
    match rest.split_once('.') {
        Some((major, minor)) => Some((major.parse().ok()?, minor.parse().ok()?)),
        None => Some((rest.parse().ok()?, 0)),
    }
}

#[cfg(test)]
mod tests {

    use std::collections::HashMap;

    use super::{serde, fill_braces, split_game_version, version_suffixes, Loader};

    #[test]
    fn brace_filling() {

        let mut values = HashMap::new();
        values.insert("SIDE".to_string(), "client".to_string());
        values.insert("MINECRAFT_JAR".to_string(), "/versions/1.20.1/1.20.1.jar".to_string());

        assert_eq!(fill_braces("--task", &values).as_deref(), Some("--task"));
        assert_eq!(fill_braces("{SIDE}", &values).as_deref(), Some("client"));
        assert_eq!(fill_braces("--jar={MINECRAFT_JAR}", &values).as_deref(), Some("--jar=/versions/1.20.1/1.20.1.jar"));
        assert_eq!(fill_braces("{SIDE}/{SIDE}", &values).as_deref(), Some("client/client"));
        assert_eq!(fill_braces("{MISSING}", &values), None);
        assert_eq!(fill_braces("{SIDE", &values), None);

    }

    #[test]
    fn game_version_numbers() {
        assert_eq!(split_game_version("1.20.1"), Some((20, 1)));
        assert_eq!(split_game_version("1.21"), Some((21, 0)));
        assert_eq!(split_game_version("2.0"), None);
        assert_eq!(split_game_version("b1.7.3"), None);
    }

    #[test]
    fn loader_game_versions() {

        assert_eq!(Loader::Forge.game_version("1.20.1-47.1.0").as_deref(), Some("1.20.1"));
        assert_eq!(Loader::Forge.game_version("1.7.10-10.13.4.1614").as_deref(), Some("1.7.10"));

        assert_eq!(Loader::NeoForge.game_version("20.4.181").as_deref(), Some("1.20.4"));
        assert_eq!(Loader::NeoForge.game_version("21.0.10").as_deref(), Some("1.21"));
        assert_eq!(Loader::NeoForge.game_version("1.20.1-47.1.84").as_deref(), Some("1.20.1"));

    }

    #[test]
    fn loader_version_prefixes() {
        assert_eq!(Loader::Forge.version_prefix("1.20.1").as_deref(), Some("1.20.1-"));
        assert_eq!(Loader::NeoForge.version_prefix("1.20.4").as_deref(), Some("20.4."));
        assert_eq!(Loader::NeoForge.version_prefix("1.20.1").as_deref(), Some("1.20.1-"));
    }

    #[test]
    fn installer_suffixes() {
        assert_eq!(version_suffixes(Loader::Forge, "1.7.10"), ["-1.7.10", "-1710ls", "-new"]);
        assert_eq!(version_suffixes(Loader::Forge, "1.20.1"), [] as [&str; 0]);
        assert_eq!(version_suffixes(Loader::NeoForge, "1.7.10"), [] as [&str; 0]);
    }

    #[test]
    fn profile_schemas() {

        const V2: &str = r#"{
            "json": "/version.json",
            "path": "net.minecraftforge:forge:1.20.1-47.1.0",
            "processors": [
                {
                    "sides": ["client"],
                    "jar": "net.minecraftforge:installertools:1.3.0",
                    "classpath": ["net.md-5:SpecialSource:1.11.0"],
                    "args": ["--task", "MCP_DATA", "--output", "{MOJMAPS}"],
                    "outputs": {"{MOJMAPS}": "{MOJMAPS_SHA}"}
                }
            ],
            "libraries": [],
            "data": {
                "MOJMAPS": {"client": "[net.minecraft:client:1.20.1:mappings@txt]", "server": ""}
            }
        }"#;

        let serde::InstallProfile::V2(profile) = serde_json::from_str(V2).unwrap() else {
            panic!("expected the v2 schema");
        };
        assert_eq!(profile.json, "/version.json");
        assert_eq!(profile.processors.len(), 1);
        assert_eq!(profile.processors[0].sides.as_deref(), Some(&[serde::Side::Client][..]));
        assert_eq!(profile.data["MOJMAPS"].client, "[net.minecraft:client:1.20.1:mappings@txt]");

        const V1: &str = r#"{
            "install": {
                "minecraft": "1.7.10",
                "path": "net.minecraftforge:forge:1.7.10-10.13.4.1614-1.7.10",
                "filePath": "forge-1.7.10-10.13.4.1614-1.7.10-universal.jar"
            },
            "versionInfo": {
                "id": "1.7.10-Forge10.13.4.1614-1.7.10",
                "mainClass": "net.minecraft.launchwrapper.Launch"
            }
        }"#;

        let serde::InstallProfile::V1(profile) = serde_json::from_str(V1).unwrap() else {
            panic!("expected the v1 schema");
        };
        assert_eq!(profile.install.minecraft, "1.7.10");
        assert_eq!(profile.version_info.main_class.as_deref(), Some("net.minecraft.launchwrapper.Launch"));

    }

}
