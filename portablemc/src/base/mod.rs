//! The base installer: it turns a version identifier into a complete, verified
//! on-disk installation and assembles everything needed to spawn the game.
//!
//! An install walks these phases in order: load the descriptor chain and flatten
//! it into one effective descriptor, resolve the client archive, libraries and
//! native classifiers, the logging config, the asset index and the Java runtime,
//! fetch everything missing in one parallel batch, extract natives into a run
//! scoped directory, then substitute the argument placeholders and return a
//! [`Game`] ready to be spawned.
//!
//! This layer knows nothing about fetching missing version descriptors: when one
//! is absent it asks its handler through [`Event::NeedVersion`], which the
//! [`moj`](crate::moj) layer (or any caller) can answer. It also applies none of
//! the legacy fixes, those live in the upper layers too.

pub mod serde;

mod rules;
mod jvm;

use std::collections::{HashMap, HashSet};
use std::io::{self, BufReader, BufWriter, Read};
use std::process::{Child, Command, ExitStatus};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::fmt;
use std::fs;

use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::download::{self, Batch, Download};
use crate::maven::Gav;

use rules::host;


/// Content-addressed asset storage of Mojang.
const ASSET_OBJECTS_URL: &str = "https://resources.download.minecraft.net/";

/// Default maven repository of the game libraries.
pub(crate) const LIBRARY_REPO_URL: &str = "https://libraries.minecraft.net/";

/// Namespace used for every name-derived UUID of the launcher.
pub(crate) const NAMESPACE: Uuid = uuid::uuid!("8df5a464-38de-11ec-aa66-3fd636ee2ed7");

/// Upper bound on the descriptor chain length, a deeper chain is degenerate and is
/// reported like an inheritance loop.
const CHAIN_LIMIT: usize = 16;

/// JVM arguments applied when a descriptor chain defines none, which is the case
/// of every version predating the modern argument lists.
const IMPLICIT_JVM_ARGS: &[&str] = &[
    "-Djava.library.path=${natives_directory}",
    "-Dminecraft.launcher.brand=${launcher_name}",
    "-Dminecraft.launcher.version=${launcher_version}",
    "-cp",
    "${classpath}",
];

/// Generates the getter/setter pair of a directory root of the installer.
macro_rules! dir_accessors {
    ($( $(#[$doc:meta])* $field:ident => $getter:ident, $setter:ident; )*) => { $(
        $(#[$doc])*
        pub fn $getter(&self) -> &Path {
            &self.dirs.$field
        }

        /// Setter of the directory documented on its getter.
        pub fn $setter(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
            self.dirs.$field = dir.into();
            self
        }
    )* };
}

/// Generates the getter/setter pair of a strictness toggle of the installer.
macro_rules! strict_accessors {
    ($( $(#[$doc:meta])* $field:ident => $getter:ident, $setter:ident; )*) => { $(
        $(#[$doc])*
        pub fn $getter(&self) -> bool {
            self.strict.$field
        }

        /// Setter of the toggle documented on its getter.
        pub fn $setter(&mut self, strict: bool) -> &mut Self {
            self.strict.$field = strict;
            self
        }
    )* };
}

/// Configuration of a base install: the root version to install, the directory
/// roots, the verification strictness and the JVM policy.
///
/// Installing mutates nothing in this configuration, so one installer can be
/// reused for several versions by changing the root version between installs.
#[derive(Debug, Clone)]
pub struct Installer {
    version: String,
    dirs: Directories,
    strict: Strictness,
    jvm_policy: JvmPolicy,
    launcher_name: Option<String>,
    launcher_version: Option<String>,
}

/// The five directory roots of the layout (spec §3) plus the work directory.
#[derive(Debug, Clone, Default)]
struct Directories {
    versions: PathBuf,
    libraries: PathBuf,
    assets: PathBuf,
    jvm: PathBuf,
    bin: PathBuf,
    work: PathBuf,
}

/// Whether present files are re-hashed instead of trusted by presence/size. All
/// disabled by default, hashing thousands of files is expensive.
#[derive(Debug, Clone, Copy, Default)]
struct Strictness {
    assets: bool,
    libraries: bool,
    jvm: bool,
}

impl Installer {

    /// An installer for the given root version, with every directory derived from
    /// the default main directory of the platform (when there is one).
    pub fn new(version: impl Into<String>) -> Self {
        let mut installer = Self {
            version: version.into(),
            dirs: Directories::default(),
            strict: Strictness::default(),
            jvm_policy: JvmPolicy::SystemThenMojang,
            launcher_name: None,
            launcher_version: None,
        };
        installer.set_main_dir(default_main_dir().unwrap_or(Path::new("")));
        installer
    }

    /// The root version to install.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.version = version.into();
        self
    }

    /// Derive every directory root from the given main directory: `versions`,
    /// `libraries`, `assets`, `jvm` and `bin` below it, and the work directory
    /// equal to it.
    pub fn set_main_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        let dir = dir.into();
        self.dirs = Directories {
            versions: dir.join("versions"),
            libraries: dir.join("libraries"),
            assets: dir.join("assets"),
            jvm: dir.join("jvm"),
            bin: dir.join("bin"),
            work: dir,
        };
        self
    }

    dir_accessors! {
        /// Where descriptors and client archives live,
        /// `versions/<id>/<id>.{json,jar}`.
        versions => versions_dir, set_versions_dir;
        /// Where libraries live, organized like a maven repository.
        libraries => libraries_dir, set_libraries_dir;
        /// Where asset indexes, objects and logging configs live.
        assets => assets_dir, set_assets_dir;
        /// Where Mojang-provided Java runtimes are installed.
        jvm => jvm_dir, set_jvm_dir;
        /// Where the run-scoped directories holding extracted natives are created;
        /// each install gets a uniquely named subdirectory, removable once the game
        /// exited.
        bin => bin_dir, set_bin_dir;
        /// The game's working directory, where saves, options and other user data
        /// are written by the game itself.
        work => mc_dir, set_mc_dir;
    }

    strict_accessors! {
        /// Re-hash present assets instead of checking their size only.
        assets => strict_assets_check, set_strict_assets_check;
        /// Re-hash present libraries and the client archive.
        libraries => strict_libraries_check, set_strict_libraries_check;
        /// Re-hash present files of Mojang-provided runtimes.
        jvm => strict_jvm_check, set_strict_jvm_check;
    }

    /// How the Java runtime is found or installed, see [`JvmPolicy`].
    pub fn jvm_policy(&self) -> &JvmPolicy {
        &self.jvm_policy
    }

    pub fn set_jvm_policy(&mut self, policy: JvmPolicy) -> &mut Self {
        self.jvm_policy = policy;
        self
    }

    /// The launcher name substituted for `${launcher_name}`.
    pub fn launcher_name(&self) -> &str {
        self.launcher_name.as_deref().unwrap_or("portablemc")
    }

    pub fn set_launcher_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.launcher_name = Some(name.into());
        self
    }

    /// The launcher version substituted for `${launcher_version}`.
    pub fn launcher_version(&self) -> &str {
        self.launcher_version.as_deref().unwrap_or(env!("CARGO_PKG_VERSION"))
    }

    pub fn set_launcher_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.launcher_version = Some(version.into());
        self
    }

    /// Ensure the configured version is fully installed and return the assembled
    /// [`Game`].
    #[inline]
    pub fn install(&mut self, mut handler: impl Handler) -> Result<Game> {
        self.install_impl(&mut handler)
    }

    /// Monomorphization stops here, the whole install works on a dynamic handler.
    #[inline(never)]
    fn install_impl(&mut self, handler: &mut dyn Handler) -> Result<Game> {

        let mut features = HashSet::new();
        handler.on_event(Event::FilterFeatures { features: &mut features });
        handler.on_event(Event::LoadedFeatures { features: &features });

        let chain = self.load_chain(handler)?;
        let flat = flatten(&chain);

        // Without an entry point class nothing can be launched.
        let main_class = flat.main_class.clone()
            .ok_or(Error::MainClassNotFound {  })?;

        let mut batch = Batch::new();

        let client_file = self.collect_client(handler, &chain, &flat, &mut batch)?;
        let mut run_files = self.collect_libraries(handler, &flat, &features, client_file, &mut batch)?;
        let logger = self.collect_logger(handler, &flat, &mut batch)?;
        let assets = self.collect_assets(handler, &flat, &mut batch)?;

        let jvm_major = flat.java.as_ref().map(|java| java.major_version).unwrap_or(8);
        let jvm = {

            handler.on_event(Event::LoadJvm { major_version: jvm_major });

            let request = jvm::Request {
                policy: &self.jvm_policy,
                jvm_dir: &self.dirs.jvm,
                strict_check: self.strict.jvm,
                major: jvm_major,
                component: flat.java.as_ref()
                    .and_then(|java| java.component.as_deref())
                    .or(jvm::default_component(jvm_major)),
            };

            let jvm = jvm::resolve(&request, handler, &mut batch)?;

            handler.on_event(Event::LoadedJvm {
                file: &jvm.file,
                version: jvm.version.as_deref(),
                compatible: jvm.compatible,
            });

            jvm

        };

        if !batch.is_empty() {

            let mut cancel = false;
            handler.on_event(Event::DownloadResources { cancel: &mut cancel });
            if cancel {
                return Err(Error::DownloadResourcesCancelled {  });
            }

            batch.fetch((&mut *handler).into_download())?;
            handler.on_event(Event::DownloadedResources);

        }

        let run_dir = self.prepare_run_dir(handler, &mut run_files)?;

        if let Some(assets) = &assets {
            self.apply_asset_mirrors(assets)?;
        }

        jvm::apply_setup(&jvm)?;

        // Argument selection: the modern lists when any version of the chain has
        // them, the whitespace-split legacy string otherwise.
        let mut jvm_args;
        let mut game_args;

        if flat.jvm_args.is_empty() && flat.game_args.is_empty() {
            jvm_args = Vec::new();
            game_args = flat.legacy_args.as_deref()
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
        } else {
            jvm_args = select_arguments(&flat.jvm_args, &features);
            game_args = select_arguments(&flat.game_args, &features);
        }

        if jvm_args.is_empty() {
            jvm_args = IMPLICIT_JVM_ARGS.iter().map(|&arg| arg.to_string()).collect();
        }

        if let Some(logger) = &logger {
            let config_file = canonicalize(&logger.file)?;
            jvm_args.push(expand_placeholders(&logger.argument, &mut |name| {
                (name == "path").then(|| config_file.display().to_string())
            }));
        }

        // Everything placed on the command line is made absolute first.
        let mc_dir = canonicalize(&self.dirs.work)?;
        let libraries_dir = canonicalize(&self.dirs.libraries)?;
        let assets_dir = canonicalize(&self.dirs.assets)?;
        let jvm_file = canonicalize(&jvm.file)?;
        let virtual_dir = match &assets {
            Some(Assets { mirror: Some(mirror), .. }) => Some(canonicalize(&mirror.virtual_dir)?),
            _ => None,
        };

        let mut substitute = |name: &str| {
            Some(match name {
                "classpath" => std::env::join_paths(&run_files.class_files)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned(),
                "classpath_separator" if cfg!(windows) => ";".to_string(),
                "classpath_separator" => ":".to_string(),
                "natives_directory" => run_dir.display().to_string(),
                "launcher_name" => self.launcher_name().to_string(),
                "launcher_version" => self.launcher_version().to_string(),
                "version_name" => chain[0].name.clone(),
                "version_type" => flat.channel?.as_str().to_string(),
                "game_directory" => mc_dir.display().to_string(),
                // Observed in some third-party descriptors.
                "library_directory" => libraries_dir.display().to_string(),
                "assets_root" => assets_dir.display().to_string(),
                "assets_index_name" => assets.as_ref()?.id.clone(),
                // Pre-1.7.3 versions locate their assets through this one.
                "game_assets" => virtual_dir.as_ref()?.display().to_string(),
                _ => return None,
            })
        };

        expand_each(&mut jvm_args, &mut substitute);
        expand_each(&mut game_args, &mut substitute);

        Ok(Game {
            jvm_file,
            mc_dir,
            bin_dir: run_dir,
            main_class,
            jvm_args,
            game_args,
            fixes: Vec::new(),
        })

    }

    /// Load the descriptor chain, root first. Each missing descriptor gives the
    /// handler one chance to provide the file through [`Event::NeedVersion`].
    /// A repeated identifier, or a chain longer than a fixed bound, is reported as
    /// an inheritance loop.
    fn load_chain(&self, handler: &mut dyn Handler) -> Result<Vec<LoadedVersion>> {

        if self.version.is_empty() {
            return Err(Error::VersionNotFound { version: String::new() });
        }

        handler.on_event(Event::LoadHierarchy { root_version: &self.version });

        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(self.version.clone());

        while let Some(name) = next.take() {

            if !visited.insert(name.clone()) || chain.len() >= CHAIN_LIMIT {
                return Err(Error::HierarchyLoop { version: name });
            }

            let version = self.read_descriptor(handler, name)?;
            next = version.descriptor.inherits_from.clone();
            chain.push(version);

        }

        handler.on_event(Event::LoadedHierarchy { hierarchy: &chain });

        Ok(chain)

    }

    /// Read one descriptor from disk, asking the handler once when the file is
    /// missing, and retrying once if the handler claims to have provided it.
    fn read_descriptor(&self, handler: &mut dyn Handler, name: String) -> Result<LoadedVersion> {

        if name.is_empty() {
            return Err(Error::VersionNotFound { version: name });
        }

        let dir = self.dirs.versions.join(&name);
        let file = dir.join(format!("{name}.json"));

        handler.on_event(Event::LoadVersion { version: &name, file: &file });

        let mut asked = false;
        let reader = loop {
            match fs::File::open(&file) {
                Ok(reader) => break BufReader::new(reader),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {

                    let mut retry = false;
                    if !asked {
                        asked = true;
                        handler.on_event(Event::NeedVersion { version: &name, file: &file, retry: &mut retry });
                    }

                    if !retry {
                        return Err(Error::VersionNotFound { version: name });
                    }

                }
                Err(e) => return Err(Error::internal(e, file.display().to_string())),
            }
        };

        let mut deserializer = serde_json::Deserializer::from_reader(reader);
        let descriptor = serde_path_to_error::deserialize::<_, Box<serde::Descriptor>>(&mut deserializer)
            .map_err(|e| Error::internal(e, file.display().to_string()))?;

        handler.on_event(Event::LoadedVersion { version: &name, file: &file });

        Ok(LoadedVersion { name, dir, descriptor })

    }

    /// Resolve the client archive of the root version, scheduling it when missing
    /// or stale. A version without any client download must already have the file.
    fn collect_client(&self,
        handler: &mut dyn Handler,
        chain: &[LoadedVersion],
        flat: &Flattened,
        batch: &mut Batch,
    ) -> Result<PathBuf> {

        handler.on_event(Event::LoadClient);

        let root = &chain[0];
        let file = root.dir.join(format!("{}.jar", root.name));

        match &flat.client {
            Some(source) => {
                let sha1 = source.sha1.as_deref().filter(|_| self.strict.libraries);
                if !verify_file(&file, source.size, sha1)? {
                    batch.add(Download::new(source.url.clone(), file.clone())
                        .expect_size(source.size)
                        .expect_sha1(source.sha1.map(|h| h.0)));
                }
            }
            None if !file.is_file() => return Err(Error::ClientNotFound {  }),
            None => (),
        }

        handler.on_event(Event::LoadedClient { file: &file });

        Ok(file)

    }

    /// Resolve the flattened libraries into class path entries and native
    /// classifiers, schedule whatever is missing and split the resulting files.
    /// The client archive closes the class path.
    fn collect_libraries(&self,
        handler: &mut dyn Handler,
        flat: &Flattened,
        features: &HashSet<String>,
        client_file: PathBuf,
        batch: &mut Batch,
    ) -> Result<RunFiles> {

        handler.on_event(Event::LoadLibraries);

        let mut selected = Vec::new();
        let mut excludes = HashMap::new();

        for entry in &flat.libraries {

            if entry.rules.as_deref().is_some_and(|rules| !rules::allowed(rules, features)) {
                continue;
            }

            // The main artifact goes to the class path. An entry carrying only
            // native classifiers has no main artifact to resolve.
            if entry.downloads.artifact.is_some() || entry.natives.is_none() {

                let mut library = LoadedLibrary {
                    name: entry.name.clone(),
                    path: None,
                    source: None,
                    natives: false,
                };

                if let Some(artifact) = &entry.downloads.artifact {
                    library.path = artifact.path.as_deref().map(PathBuf::from);
                    library.source = library_source(&artifact.source);
                } else if let Some(repo) = &entry.url {
                    library.source = Some(LibrarySource {
                        url: format!("{}/{}", repo.trim_end_matches('/'), entry.name.repo_path()),
                        size: None,
                        sha1: None,
                    });
                }

                selected.push(library);

            }

            // The native classifier of the host, resolved from the per-OS template,
            // is extracted into the run directory instead.
            if let Some(natives) = &entry.natives {

                let (Some(os_name), Some(os_bits)) = (host::name(), host::bits()) else {
                    continue;
                };

                let Some(template) = natives.get(os_name) else {
                    continue;
                };

                let classifier = template.replace("${arch}", os_bits);

                let mut name = entry.name.clone();
                name.set_classifier(Some(&classifier));

                let mut library = LoadedLibrary {
                    name,
                    path: None,
                    source: None,
                    natives: true,
                };

                if let Some(artifact) = entry.downloads.classifiers.get(&classifier) {
                    library.path = artifact.path.as_deref().map(PathBuf::from);
                    library.source = library_source(&artifact.source);
                }

                if let Some(extraction) = &entry.extract {
                    excludes.insert(library.name.clone(), extraction.exclude.clone());
                }

                selected.push(library);

            }

        }

        handler.on_event(Event::FilterLibraries { libraries: &mut selected });
        handler.on_event(Event::LoadedLibraries { libraries: &selected });

        let mut run_files = RunFiles::default();

        for library in selected {

            let file = match &library.path {
                Some(path) => self.dirs.libraries.join(path),
                None => self.dirs.libraries.join(library.name.file_path()),
            };

            match &library.source {
                Some(source) => {
                    let sha1 = source.sha1.as_ref().filter(|_| self.strict.libraries);
                    if !verify_file(&file, source.size, sha1)? {
                        batch.add(Download::new(source.url.clone(), file.clone())
                            .expect_size(source.size)
                            .expect_sha1(source.sha1));
                    }
                }
                // Without any source the file must already be installed.
                None if !file.is_file() => {
                    return Err(Error::LibraryNotFound { name: library.name });
                }
                None => (),
            }

            if library.natives {
                if let Some(exclude) = excludes.remove(&library.name) {
                    if let Some(file_name) = file.file_name() {
                        run_files.native_excludes.insert(file_name.to_os_string(), exclude);
                    }
                }
                run_files.native_files.push(file);
            } else {
                run_files.class_files.push(file);
            }

        }

        run_files.class_files.push(client_file);

        handler.on_event(Event::FilterLibrariesFiles {
            class_files: &mut run_files.class_files,
            natives_files: &mut run_files.native_files,
        });
        handler.on_event(Event::LoadedLibrariesFiles {
            class_files: &run_files.class_files,
            natives_files: &run_files.native_files,
        });

        Ok(run_files)

    }

    /// Resolve the client logging configuration, scheduling its file when needed.
    fn collect_logger(&self,
        handler: &mut dyn Handler,
        flat: &Flattened,
        batch: &mut Batch,
    ) -> Result<Option<Logger>> {

        let Some(config) = &flat.logging else {
            handler.on_event(Event::NoLogger);
            return Ok(None);
        };

        handler.on_event(Event::LoadLogger { id: &config.file.id });

        let file = self.dirs.assets.join("log_configs").join(&config.file.id);
        let source = &config.file.source;

        if !verify_file(&file, source.size, source.sha1.as_deref())? {
            batch.add(Download::new(source.url.clone(), file.clone())
                .expect_size(source.size)
                .expect_sha1(source.sha1.map(|h| h.0)));
        }

        handler.on_event(Event::LoadedLogger { id: &config.file.id });

        Ok(Some(Logger {
            argument: config.argument.clone(),
            file,
        }))

    }

    /// Resolve the asset index into concrete object downloads: every object lives
    /// at `objects/<2 first hex chars>/<hash>`, and the legacy layouts additionally
    /// mirror the objects under their logical path.
    fn collect_assets(&self,
        handler: &mut dyn Handler,
        flat: &Flattened,
        batch: &mut Batch,
    ) -> Result<Option<Assets>> {

        // Modern chains reference the index with its download, legacy ones only
        // name it and the file must be present.
        let (id, source) = match (&flat.asset_index, &flat.assets_id) {
            (Some(reference), _) => (reference.id.as_str(), Some(&reference.source)),
            (None, Some(id)) => (id.as_str(), None),
            (None, None) => {
                handler.on_event(Event::NoAssets);
                return Ok(None);
            }
        };

        handler.on_event(Event::LoadAssets { id });

        let index_file = self.dirs.assets.join("indexes").join(format!("{id}.json"));

        let mut fetched = false;
        if let Some(source) = source {
            if !verify_file(&index_file, source.size, source.sha1.as_deref())? {
                Download::new(source.url.clone(), index_file.clone())
                    .expect_size(source.size)
                    .expect_sha1(source.sha1.map(|h| h.0))
                    .fetch((&mut *handler).into_download())?;
                fetched = true;
            }
        }

        let index: serde::AssetIndex = {
            let reader = match fs::File::open(&index_file) {
                Ok(reader) => BufReader::new(reader),
                Err(e) if e.kind() == io::ErrorKind::NotFound && !fetched => {
                    return Err(Error::AssetsNotFound { id: id.to_string() });
                }
                Err(e) => return Err(Error::internal(e, index_file.display().to_string())),
            };
            let mut deserializer = serde_json::Deserializer::from_reader(reader);
            serde_path_to_error::deserialize(&mut deserializer)
                .map_err(|e| Error::internal(e, index_file.display().to_string()))?
        };

        handler.on_event(Event::LoadedAssets { id, count: index.objects.len() });

        let objects_dir = self.dirs.assets.join("objects");

        let mut assets = Assets {
            id: id.to_string(),
            mirror: (index.is_virtual || index.map_to_resources).then(|| Mirror {
                virtual_dir: self.dirs.assets.join("virtual").join(id),
                to_resources: index.map_to_resources,
                entries: Vec::new(),
            }),
        };

        // Several logical paths can share one object, schedule each object once.
        let mut scheduled = HashSet::new();

        for (logical_path, object) in &index.objects {

            let hex = object.hash.to_string();
            let file = objects_dir.join(&hex[..2]).join(&hex);

            if let Some(mirror) = &mut assets.mirror {
                mirror.entries.push(MirrorEntry {
                    logical: PathBuf::from(logical_path),
                    object: file.clone(),
                    size: object.size,
                });
            }

            if !scheduled.insert(object.hash.0) {
                continue;
            }

            let sha1 = self.strict.assets.then_some(&object.hash.0);
            if !verify_file(&file, Some(object.size), sha1)? {
                batch.add(Download::new(format!("{ASSET_OBJECTS_URL}{}/{hex}", &hex[..2]), file)
                    .expect_size(Some(object.size))
                    .expect_sha1(Some(object.hash.0)));
            }

        }

        handler.on_event(Event::VerifiedAssets { id, count: index.objects.len() });

        Ok(Some(assets))

    }

    /// Populate the legacy asset layouts: hard link every object under the virtual
    /// directory, and copy it under the work `resources/` directory when the index
    /// maps to resources. Resources are copied, not linked, because pre-1.6 clients
    /// rewrite them in place.
    fn apply_asset_mirrors(&self, assets: &Assets) -> Result<()> {

        let Some(mirror) = &assets.mirror else {
            return Ok(());
        };

        let resources_dir = mirror.to_resources.then(|| self.dirs.work.join("resources"));

        for entry in &mirror.entries {

            let virtual_file = mirror.virtual_dir.join(&entry.logical);
            ensure_parent(&virtual_file)?;

            match fs::hard_link(&entry.object, &virtual_file) {
                Ok(()) => (),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => (),
                Err(e) => return Err(Error::internal(e, virtual_file.display().to_string())),
            }

            if let Some(resources_dir) = &resources_dir {
                let resource_file = resources_dir.join(&entry.logical);
                if !verify_file(&resource_file, Some(entry.size), None)? {
                    ensure_parent(&resource_file)?;
                    fs::copy(&entry.object, &resource_file)
                        .map_err(|e| Error::internal(e, resource_file.display().to_string()))?;
                }
            }

        }

        Ok(())

    }

    /// Create the run-scoped directory and fill it with the native binaries: the
    /// classifier archives are unpacked (honoring their exclusion filters) and the
    /// loose files are linked in with their shared-object version suffix removed.
    ///
    /// The directory name is derived from the resolved file set, so an unchanged
    /// install reuses the same directory.
    fn prepare_run_dir(&self, handler: &mut dyn Handler, run_files: &mut RunFiles) -> Result<PathBuf> {

        let mut identity = Vec::new();

        for file in run_files.class_files.iter_mut().chain(&mut run_files.native_files) {
            *file = canonicalize(file)?;
            identity.extend_from_slice(file.as_os_str().as_encoded_bytes());
            identity.push(0);
        }

        let tag = Uuid::new_v5(&NAMESPACE, &identity);
        let run_dir = self.dirs.bin.join(format!("{}-{}", self.version, tag.hyphenated()));

        fs::create_dir_all(&run_dir)
            .map_err(|e| Error::internal(e, run_dir.display().to_string()))?;

        for file in &run_files.native_files {

            let is_archive = file.extension()
                .is_some_and(|ext| ext == "jar" || ext == "zip");

            if is_archive {
                let excludes = file.file_name()
                    .and_then(|name| run_files.native_excludes.get(name))
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                unpack_natives(file, &run_dir, excludes)?;
            } else if let Some(name) = file.file_name() {
                let target = run_dir.join(strip_so_version(name));
                place_binary(file, &target)?;
            }

        }

        handler.on_event(Event::ExtractedBinaries { dir: &run_dir });

        Ok(run_dir)

    }

}

/// Unpack a native classifier archive into the run directory, skipping directories
/// and every entry whose path starts with an excluded prefix.
fn unpack_natives(archive_file: &Path, run_dir: &Path, excludes: &[String]) -> Result<()> {

    let reader = fs::File::open(archive_file)
        .map(BufReader::new)
        .map_err(|e| Error::internal(e, archive_file.display().to_string()))?;

    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| Error::internal(e, archive_file.display().to_string()))?;

    for index in 0..archive.len() {

        let mut entry = archive.by_index(index)
            .map_err(|e| Error::internal(e, archive_file.display().to_string()))?;

        if entry.is_dir() || excludes.iter().any(|prefix| entry.name().starts_with(prefix)) {
            continue;
        }

        let Some(relative) = entry.enclosed_name() else {
            continue;
        };

        let target = run_dir.join(relative);
        ensure_parent(&target)?;

        let mut writer = fs::File::create(&target)
            .map_err(|e| Error::internal(e, target.display().to_string()))?;

        io::copy(&mut entry, &mut writer)
            .map_err(|e| Error::internal(e, target.display().to_string()))?;

    }

    Ok(())

}

/// Flatten a descriptor chain (root first) into one effective record: scalars take
/// the child-most definition, argument lists are concatenated parent first, and
/// libraries are concatenated parent first with the last definition of each
/// `(group, artifact, classifier)` coordinate winning, in place.
fn flatten(chain: &[LoadedVersion]) -> Flattened {

    let mut flat = Flattened::default();
    let mut slots: HashMap<(String, String, Option<String>), usize> = HashMap::new();

    // Parents come last in the chain, so walking it backward applies parents first
    // and lets every child definition overwrite.
    for version in chain.iter().rev() {

        let descriptor = &version.descriptor;

        if descriptor.main_class.is_some() {
            flat.main_class = descriptor.main_class.clone();
        }
        if descriptor.channel.is_some() {
            flat.channel = descriptor.channel;
        }
        if descriptor.java_version.is_some() {
            flat.java = descriptor.java_version.clone();
        }
        if descriptor.asset_index.is_some() {
            flat.asset_index = descriptor.asset_index.clone();
        }
        if descriptor.assets.is_some() {
            flat.assets_id = descriptor.assets.clone();
        }
        if let Some(client) = descriptor.downloads.get("client") {
            flat.client = Some(client.clone());
        }
        if let Some(logging) = descriptor.logging.get("client") {
            flat.logging = Some(logging.clone());
        }
        if descriptor.legacy_arguments.is_some() {
            flat.legacy_args = descriptor.legacy_arguments.clone();
        }

        if let Some(arguments) = &descriptor.arguments {
            flat.jvm_args.extend_from_slice(&arguments.jvm);
            flat.game_args.extend_from_slice(&arguments.game);
        }

        for entry in &descriptor.libraries {

            let key = (
                entry.name.group().to_string(),
                entry.name.artifact().to_string(),
                entry.name.classifier().map(str::to_string),
            );

            match slots.get(&key) {
                Some(&slot) => flat.libraries[slot] = entry.clone(),
                None => {
                    slots.insert(key, flat.libraries.len());
                    flat.libraries.push(entry.clone());
                }
            }

        }

    }

    flat

}

/// The effective descriptor produced by [`flatten`], an owned value aliasing
/// nothing from the chain.
#[derive(Debug, Default)]
struct Flattened {
    main_class: Option<String>,
    channel: Option<serde::Channel>,
    java: Option<serde::JavaRequirement>,
    asset_index: Option<serde::AssetIndexReference>,
    assets_id: Option<String>,
    client: Option<serde::FileSource>,
    logging: Option<serde::LoggingConfig>,
    legacy_args: Option<String>,
    jvm_args: Vec<serde::ArgumentEntry>,
    game_args: Vec<serde::ArgumentEntry>,
    libraries: Vec<serde::LibraryEntry>,
}

/// Evaluate an argument list against the feature set, keeping the literal
/// fragments and the gated ones whose rules pass.
fn select_arguments(entries: &[serde::ArgumentEntry], features: &HashSet<String>) -> Vec<String> {

    let mut out = Vec::new();

    for entry in entries {
        match entry {
            serde::ArgumentEntry::Literal(value) => out.push(value.clone()),
            serde::ArgumentEntry::Gated(gated) => {

                if gated.rules.as_deref().is_some_and(|rules| !rules::allowed(rules, features)) {
                    continue;
                }

                match &gated.value {
                    serde::OneOrMany::One(value) => out.push(value.clone()),
                    serde::OneOrMany::Many(values) => out.extend(values.iter().cloned()),
                }

            }
        }
    }

    out

}

/// Convert a schema file source into the public library source, dropping sources
/// with an empty URL (observed in the wild) so the library falls back to the
/// "already installed" path.
fn library_source(source: &serde::FileSource) -> Option<LibrarySource> {
    if source.url.is_empty() {
        return None;
    }
    Some(LibrarySource {
        url: source.url.clone(),
        size: source.size,
        sha1: source.sha1.map(|h| h.0),
    })
}

/// Resolved files of a run: the ordered class path and the native binaries to
/// place in the run directory, with per-archive extraction filters.
#[derive(Debug, Default)]
struct RunFiles {
    class_files: Vec<PathBuf>,
    native_files: Vec<PathBuf>,
    native_excludes: HashMap<OsString, Vec<String>>,
}

/// Resolved logging configuration.
#[derive(Debug)]
struct Logger {
    argument: String,
    file: PathBuf,
}

/// Resolved assets, with the optional legacy mirroring work.
#[derive(Debug)]
struct Assets {
    id: String,
    mirror: Option<Mirror>,
}

#[derive(Debug)]
struct Mirror {
    virtual_dir: PathBuf,
    to_resources: bool,
    entries: Vec<MirrorEntry>,
}

#[derive(Debug)]
struct MirrorEntry {
    logical: PathBuf,
    object: PathBuf,
    size: u32,
}

/// Events reported along an install, one per phase transition. Some carry mutable
/// state giving the handler a chance to alter the install.
#[derive(Debug)]
#[non_exhaustive]
pub enum Event<'a> {
    /// Let the handler turn on the features used by rule evaluation.
    FilterFeatures { features: &'a mut HashSet<String> },
    /// The final feature set.
    LoadedFeatures { features: &'a HashSet<String> },
    /// The descriptor chain is going to be loaded from this root.
    LoadHierarchy { root_version: &'a str },
    /// The whole chain is loaded, root first.
    LoadedHierarchy { hierarchy: &'a [LoadedVersion] },
    /// A descriptor is going to be read from the given file.
    LoadVersion { version: &'a str, file: &'a Path },
    /// The descriptor file is missing: the handler may write it and set `retry` to
    /// make the installer read it again, otherwise the install fails with
    /// [`Error::VersionNotFound`].
    NeedVersion { version: &'a str, file: &'a Path, retry: &'a mut bool },
    /// The descriptor was read successfully.
    LoadedVersion { version: &'a str, file: &'a Path },
    /// The client archive is going to be resolved.
    LoadClient,
    /// The client archive is resolved to this file.
    LoadedClient { file: &'a Path },
    /// Libraries are going to be resolved.
    LoadLibraries,
    /// Let the handler alter the selected libraries before verification, this is
    /// where exclusion filters and library fixes plug in.
    FilterLibraries { libraries: &'a mut Vec<LoadedLibrary> },
    /// The final selected libraries.
    LoadedLibraries { libraries: &'a [LoadedLibrary] },
    /// Let the handler alter the resolved files: class path entries (client
    /// archive last) and native binaries for the run directory.
    FilterLibrariesFiles { class_files: &'a mut Vec<PathBuf>, natives_files: &'a mut Vec<PathBuf> },
    /// The final resolved files.
    LoadedLibrariesFiles { class_files: &'a [PathBuf], natives_files: &'a [PathBuf] },
    /// The chain configures no logging.
    NoLogger,
    /// The logging configuration is going to be resolved.
    LoadLogger { id: &'a str },
    /// The logging configuration is resolved.
    LoadedLogger { id: &'a str },
    /// The chain references no assets.
    NoAssets,
    /// The asset index is going to be resolved.
    LoadAssets { id: &'a str },
    /// The asset index is parsed and holds that many objects.
    LoadedAssets { id: &'a str, count: usize },
    /// Every asset object was verified, missing ones are scheduled.
    VerifiedAssets { id: &'a str, count: usize },
    /// A Java runtime of the given major version is going to be resolved.
    LoadJvm { major_version: u32 },
    /// A system runtime was probed, reporting its version and whether it could run
    /// the game.
    FoundJvmSystemVersion { file: &'a Path, version: &'a str, compatible: bool },
    /// Mojang provides no runtime for statically linked C runtimes (musl).
    WarnJvmUnsupportedDynamicCrt,
    /// Mojang provides no runtime for this platform.
    WarnJvmUnsupportedPlatform,
    /// Mojang provides no distribution matching the required component here.
    WarnJvmMissingDistribution,
    /// The runtime is resolved; an incompatible flag means the game will probably
    /// fail to start with it, but only a statically configured runtime may be
    /// reported incompatible without failing the install.
    LoadedJvm { file: &'a Path, version: Option<&'a str>, compatible: bool },
    /// Missing resources are going to be downloaded, set `cancel` to abort the
    /// install instead.
    DownloadResources { cancel: &'a mut bool },
    /// All resources of the batch were downloaded and verified.
    DownloadedResources,
    /// Aggregated counters of the running download batch.
    DownloadProgress { count: u32, total_count: u32, bytes: u64, total_bytes: u64 },
    /// Native binaries were placed into the run directory.
    ExtractedBinaries { dir: &'a Path },
}

/// Receiver of the install [`Event`] stream.
pub trait Handler {

    fn on_event(&mut self, event: Event);

    /// Polled while downloading, return true to abort the batch, surfacing as
    /// [`Error::DownloadResourcesCancelled`].
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

/// Crate-internal adapter bridging an install handler to the download engine.
pub(crate) trait HandlerInto: Handler + Sized {

    fn into_download(self) -> impl download::Handler {

        struct Bridge<H: Handler>(H);

        impl<H: Handler> download::Handler for Bridge<H> {

            fn on_progress(&mut self, progress: download::Progress) {
                self.0.on_event(Event::DownloadProgress {
                    count: progress.count,
                    total_count: progress.total_count,
                    bytes: progress.bytes,
                    total_bytes: progress.total_bytes,
                });
            }

            fn is_cancelled(&mut self) -> bool {
                self.0.is_cancelled()
            }

        }

        Bridge(self)

    }

}

impl<H: Handler> HandlerInto for H {}

/// Failure of a base install.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A version appears twice in the descriptor chain, or the chain is absurdly
    /// deep.
    #[error("hierarchy loop: {version}")]
    HierarchyLoop { version: String },
    /// A descriptor of the chain is missing and the handler did not provide it.
    #[error("version not found: {version}")]
    VersionNotFound { version: String },
    /// The referenced asset index is neither installed nor downloadable.
    #[error("assets not found: {id}")]
    AssetsNotFound { id: String },
    /// The client archive is neither installed nor downloadable.
    #[error("client not found")]
    ClientNotFound {  },
    /// A library is neither installed nor downloadable.
    #[error("library not found: {name}")]
    LibraryNotFound { name: Gav },
    /// No Java runtime satisfying the policy was found.
    #[error("jvm not found for major version {major_version}")]
    JvmNotFound { major_version: u32 },
    /// The descriptor chain names no main class.
    #[error("main class not found")]
    MainClassNotFound {  },
    /// The handler cancelled the resource download.
    #[error("download resources cancelled")]
    DownloadResourcesCancelled {  },
    /// Some resources failed to download, everything else completed.
    #[error("download: {} failed entries", failures.len())]
    Download { failures: Vec<download::Failure> },
    /// Any unexpected lower-level failure: I/O, JSON, archive or HTTP errors end
    /// up here with a short description of where they happened. The boxed error
    /// can be downcast for precise reporting.
    #[error("{origin}: {error}")]
    Internal {
        #[source]
        error: Box<dyn std::error::Error + Send + Sync>,
        origin: Box<str>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {

    /// Wrap a lower-level error with the location it happened at.
    pub(crate) fn internal(
        error: impl std::error::Error + Send + Sync + 'static,
        origin: impl Into<Box<str>>,
    ) -> Self {
        Self::Internal { error: Box::new(error), origin: origin.into() }
    }

}

impl From<download::Error> for Error {
    fn from(value: download::Error) -> Self {
        match value {
            download::Error::Cancelled => Self::DownloadResourcesCancelled {  },
            download::Error::Failed(failures) => Self::Download { failures },
            download::Error::Client(error) => Self::internal(error, "http client"),
        }
    }
}

/// How the Java runtime is picked, see §JVM of the module documentation.
#[derive(Debug, Clone)]
pub enum JvmPolicy {
    /// Use this executable unconditionally. Its version is still probed so an
    /// incompatibility can be reported, but a mismatch never fails the install.
    Static(PathBuf),
    /// Probe the `PATH` and the well-known install locations of the platform and
    /// use the first runtime with a compatible version, failing the install when
    /// there is none.
    System,
    /// Install the matching Mojang-provided distribution, failing the install when
    /// no distribution matches the platform and required component.
    Mojang,
    /// Try [`Self::System`] first, fall back on [`Self::Mojang`].
    SystemThenMojang,
    /// Try [`Self::Mojang`] first, fall back on [`Self::System`].
    MojangThenSystem,
}

/// One loaded descriptor of the chain.
#[derive(Clone)]
pub struct LoadedVersion {
    name: String,
    dir: PathBuf,
    descriptor: Box<serde::Descriptor>,
}

impl LoadedVersion {

    /// The version identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The directory holding the descriptor and client archive of this version.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The release channel, when the descriptor declares one.
    pub fn channel(&self) -> Option<VersionChannel> {
        self.descriptor.channel.map(VersionChannel::from)
    }

}

impl fmt::Debug for LoadedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedVersion")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The release channel of a version, on the public interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionChannel {
    Release,
    Snapshot,
    Beta,
    Alpha,
}

impl From<serde::Channel> for VersionChannel {
    fn from(value: serde::Channel) -> Self {
        match value {
            serde::Channel::Release => Self::Release,
            serde::Channel::Snapshot => Self::Snapshot,
            serde::Channel::OldBeta => Self::Beta,
            serde::Channel::OldAlpha => Self::Alpha,
        }
    }
}

/// A selected library, exposed through [`Event::FilterLibraries`] so handlers can
/// drop or rewrite entries before verification.
#[derive(Debug, Clone)]
pub struct LoadedLibrary {
    /// Coordinate of the library, including the native classifier when relevant.
    pub name: Gav,
    /// Install location relative to the libraries directory, derived from the
    /// coordinate when absent.
    pub path: Option<PathBuf>,
    /// Where to download the library from when missing, a library without source
    /// must already be installed.
    pub source: Option<LibrarySource>,
    /// A native classifier to unpack into the run directory instead of appearing
    /// on the class path.
    pub natives: bool,
}

/// Download source of a library.
#[derive(Debug, Clone)]
pub struct LibrarySource {
    pub url: String,
    pub size: Option<u32>,
    pub sha1: Option<[u8; 20]>,
}

/// Everything needed to spawn an installed game.
#[derive(Debug, Clone)]
pub struct Game {
    /// The Java executable to invoke.
    pub jvm_file: PathBuf,
    /// The working directory of the game process.
    pub mc_dir: PathBuf,
    /// The run-scoped directory holding the extracted natives, removable once the
    /// game exited.
    pub bin_dir: PathBuf,
    /// The class the JVM starts.
    pub main_class: String,
    /// Arguments placed before the main class.
    pub jvm_args: Vec<String>,
    /// Arguments placed after the main class.
    pub game_args: Vec<String>,
    /// Short codes of the workarounds the upper layers applied, empty for a plain
    /// base install.
    pub fixes: Vec<String>,
}

impl Game {

    /// The full process invocation: JVM arguments, then the main class, then the
    /// game arguments, run from the game working directory.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.jvm_file);
        command
            .current_dir(&self.mc_dir)
            .args(&self.jvm_args)
            .arg(&self.main_class)
            .args(&self.game_args);
        command
    }

    pub fn spawn(&self) -> io::Result<Child> {
        self.command().spawn()
    }

    pub fn spawn_and_wait(&self) -> io::Result<ExitStatus> {
        self.spawn()?.wait()
    }

}

// ----------------- //
//  Shared helpers   //
// ----------------- //

/// Check a file against its declared size and hash: true means the file exists and
/// matches everything declared, a missing file is never an error here.
pub(crate) fn verify_file(file: &Path, size: Option<u32>, sha1: Option<&[u8; 20]>) -> Result<bool> {

    fn check(file: &Path, size: Option<u32>, sha1: Option<&[u8; 20]>) -> io::Result<bool> {

        let metadata = match fs::metadata(file) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        if !metadata.is_file() {
            return Ok(false);
        }

        if let Some(size) = size {
            if metadata.len() != size as u64 {
                return Ok(false);
            }
        }

        if let Some(expected) = sha1 {

            let mut reader = fs::File::open(file)?;
            let mut digest = Sha1::new();
            let mut buffer = [0u8; 32 * 1024];

            loop {
                let read = reader.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                digest.update(&buffer[..read]);
            }

            if <[u8; 20]>::from(digest.finalize()) != *expected {
                return Ok(false);
            }

        }

        Ok(true)

    }

    check(file, size, sha1).map_err(|e| Error::internal(e, file.display().to_string()))

}

/// Substitute every `${name}` occurrence the lookup knows a value for, unresolved
/// placeholders are kept verbatim.
pub(crate) fn expand_placeholders(text: &str, lookup: &mut dyn FnMut(&str) -> Option<String>) -> String {

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {

        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                // No closing brace, keep the tail as-is.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }

    }

    out.push_str(rest);
    out

}

/// Apply [`expand_placeholders`] to every argument in place.
pub(crate) fn expand_each(args: &mut [String], lookup: &mut dyn FnMut(&str) -> Option<String>) {
    for arg in args {
        let expanded = expand_placeholders(arg, lookup);
        if expanded != *arg {
            *arg = expanded;
        }
    }
}

/// Absolute, symlink-free form of a path, without the UNC prefix on Windows.
pub(crate) fn canonicalize(file: &Path) -> Result<PathBuf> {
    dunce::canonicalize(file)
        .map_err(|e| Error::internal(e, file.display().to_string()))
}

/// Create the parent directory of a file about to be written.
pub(crate) fn ensure_parent(file: &Path) -> Result<()> {
    if let Some(dir) = file.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| Error::internal(e, dir.display().to_string()))?;
    }
    Ok(())
}

/// Create a link pointing at the given target: a symlink where supported, a hard
/// link otherwise. An already existing link is left alone.
pub(crate) fn make_link(link: &Path, target: &Path) -> Result<()> {

    #[cfg(unix)]
    let res = std::os::unix::fs::symlink(target, link);

    #[cfg(not(unix))]
    let res = {
        // Hard links need the resolved target, relative to the link's directory.
        let resolved = match link.parent() {
            Some(dir) => dir.join(target),
            None => target.to_path_buf(),
        };
        fs::hard_link(resolved, link)
    };

    match res {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(Error::internal(e, link.display().to_string())),
    }

}

/// Place a loose native binary into the run directory: symlinked where supported,
/// copied otherwise.
fn place_binary(file: &Path, target: &Path) -> Result<()> {

    #[cfg(unix)]
    let res = match std::os::unix::fs::symlink(file, target) {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        res => res,
    };

    #[cfg(not(unix))]
    let res = fs::copy(file, target).map(|_| ());

    res.map_err(|e| Error::internal(e, target.display().to_string()))

}

/// Drop the version suffix of a shared object name, `libfoo.so.1.22.2` becomes
/// `libfoo.so`. Names that are not UTF-8 or carry no suffix are left alone.
fn strip_so_version(name: &OsStr) -> &OsStr {
    match name.to_str() {
        Some(text) => match text.find(".so.") {
            Some(position) => OsStr::new(&text[..position + 3]),
            None => name,
        },
        None => name,
    }
}

/// Serialize a descriptor to its on-disk location, through a temporary sibling and
/// a rename so a concurrent reader never sees a partial file. Used by the loader
/// installers that synthesize descriptors.
pub(crate) fn write_descriptor(file: &Path, descriptor: &serde::Descriptor) -> Result<()> {

    ensure_parent(file)?;

    let staging = {
        let mut buf = file.as_os_str().to_os_string();
        buf.push(".part");
        PathBuf::from(buf)
    };

    let writer = fs::File::create(&staging)
        .map(BufWriter::new)
        .map_err(|e| Error::internal(e, staging.display().to_string()))?;

    let mut serializer = serde_json::Serializer::new(writer);
    serde_path_to_error::serialize(descriptor, &mut serializer)
        .map_err(|e| Error::internal(e, staging.display().to_string()))?;

    fs::rename(&staging, file)
        .map_err(|e| Error::internal(e, file.display().to_string()))?;

    Ok(())

}

/// The platform's conventional game directory, none when the platform defines no
/// user directories at all.
pub fn default_main_dir() -> Option<&'static Path> {

    static DIR: LazyLock<Option<PathBuf>> = LazyLock::new(|| {
        if cfg!(target_os = "windows") {
            dirs::data_dir().map(|dir| dir.join(".minecraft"))
        } else if cfg!(target_os = "macos") {
            dirs::data_dir().map(|dir| dir.join("minecraft"))
        } else {
            dirs::home_dir().map(|dir| dir.join(".minecraft"))
        }
    });

    DIR.as_deref()

}

#[cfg(test)]
mod tests {

    use std::collections::HashSet;
    use std::ffi::OsStr;
    use std::path::PathBuf;

    use super::{serde, expand_placeholders, flatten, select_arguments, strip_so_version, LoadedVersion};

    fn version(name: &str, json: &str) -> LoadedVersion {
        LoadedVersion {
            name: name.to_string(),
            dir: PathBuf::from(name),
            descriptor: serde_json::from_str(json).unwrap(),
        }
    }

    #[test]
    fn placeholders() {

        let mut none = |_: &str| None;
        assert_eq!(expand_placeholders("--demo", &mut none), "--demo");
        assert_eq!(expand_placeholders("${user}", &mut none), "${user}");
        assert_eq!(expand_placeholders("${open", &mut none), "${open");

        let mut user = |name: &str| (name == "user").then(|| "steve".to_string());
        assert_eq!(expand_placeholders("${user}", &mut user), "steve");
        assert_eq!(expand_placeholders("a ${user} b ${user}", &mut user), "a steve b steve");
        assert_eq!(expand_placeholders("${user}${unknown}", &mut user), "steve${unknown}");

    }

    #[test]
    fn flatten_scalars_child_wins() {

        let child = version("loader", r#"{
            "id": "loader",
            "inheritsFrom": "game",
            "mainClass": "loader.Main"
        }"#);

        let parent = version("game", r#"{
            "id": "game",
            "type": "release",
            "mainClass": "game.Main",
            "assets": "17"
        }"#);

        // Chain is root (child) first.
        let flat = flatten(&[child, parent]);
        assert_eq!(flat.main_class.as_deref(), Some("loader.Main"));
        assert_eq!(flat.assets_id.as_deref(), Some("17"));
        assert_eq!(flat.channel, Some(serde::Channel::Release));

    }

    #[test]
    fn flatten_libraries_parent_first_last_version_wins() {

        let child = version("loader", r#"{
            "id": "loader",
            "inheritsFrom": "game",
            "libraries": [
                {"name": "org.ow2.asm:asm:9.7"},
                {"name": "com.mojang:logging:1.5.10"}
            ]
        }"#);

        let parent = version("game", r#"{
            "id": "game",
            "libraries": [
                {"name": "com.mojang:logging:1.1.1"},
                {"name": "com.mojang:datafixerupper:6.0.8"}
            ]
        }"#);

        let flat = flatten(&[child, parent]);
        let names = flat.libraries.iter()
            .map(|lib| lib.name.to_string())
            .collect::<Vec<_>>();

        // Parent entries keep their position, the child definition of the shared
        // coordinate replaced the parent one, and new child entries come after.
        assert_eq!(names, [
            "com.mojang:logging:1.5.10",
            "com.mojang:datafixerupper:6.0.8",
            "org.ow2.asm:asm:9.7",
        ]);

    }

    #[test]
    fn flatten_arguments_are_concatenated_parent_first() {

        let child = version("loader", r#"{
            "id": "loader",
            "inheritsFrom": "game",
            "arguments": {"game": ["--loader"], "jvm": ["-Dloader=1"]}
        }"#);

        let parent = version("game", r#"{
            "id": "game",
            "arguments": {"game": ["--game"], "jvm": ["-Dgame=1"]}
        }"#);

        let flat = flatten(&[child, parent]);
        let game = select_arguments(&flat.game_args, &HashSet::new());
        let jvm = select_arguments(&flat.jvm_args, &HashSet::new());

        assert_eq!(game, ["--game", "--loader"]);
        assert_eq!(jvm, ["-Dgame=1", "-Dloader=1"]);

        // Flattening the same chain twice is deterministic.
        let names = |flat: &super::Flattened| flat.libraries.iter()
            .map(|l| l.name.to_string())
            .collect::<Vec<_>>();
        let again = flatten(&[
            version("loader", r#"{"id": "loader", "inheritsFrom": "game",
                "arguments": {"game": ["--loader"], "jvm": ["-Dloader=1"]}}"#),
            version("game", r#"{"id": "game",
                "arguments": {"game": ["--game"], "jvm": ["-Dgame=1"]}}"#),
        ]);
        assert_eq!(names(&flat), names(&again));

    }

    #[test]
    fn gated_arguments() {

        let entries: Vec<serde::ArgumentEntry> = serde_json::from_str(r#"[
            "--username",
            "${auth_player_name}",
            {"rules": [{"action": "allow", "features": {"is_demo_user": true}}], "value": "--demo"},
            {"rules": [{"action": "allow", "features": {"has_custom_resolution": true}}],
             "value": ["--width", "${resolution_width}"]}
        ]"#).unwrap();

        let none = HashSet::new();
        assert_eq!(select_arguments(&entries, &none), ["--username", "${auth_player_name}"]);

        let resolution = HashSet::from(["has_custom_resolution".to_string()]);
        assert_eq!(
            select_arguments(&entries, &resolution),
            ["--username", "${auth_player_name}", "--width", "${resolution_width}"],
        );

    }

    #[test]
    fn shared_object_suffix() {
        assert_eq!(strip_so_version(OsStr::new("libglfw.so")), OsStr::new("libglfw.so"));
        assert_eq!(strip_so_version(OsStr::new("libglfw.so.3")), OsStr::new("libglfw.so"));
        assert_eq!(strip_so_version(OsStr::new("libglfw.so.3.4.0")), OsStr::new("libglfw.so"));
        assert_eq!(strip_so_version(OsStr::new("glfw.dll")), OsStr::new("glfw.dll"));
        assert_eq!(strip_so_version(OsStr::new("so.config")), OsStr::new("so.config"));
    }

}
