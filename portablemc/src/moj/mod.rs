//! Installer layer for official Mojang versions. On top of the base installer it
//! keeps the on-disk descriptors in sync with the Mojang version manifest
//! (validating, invalidating and fetching them), injects the session values into
//! the program arguments, and applies a set of opt-out workarounds for known
//! defects of old versions.

pub(crate) mod serde;

use std::collections::{HashMap, HashSet};
use std::io::{BufReader, Write as _};
use std::path::PathBuf;
use std::fs;

use chrono::{DateTime, FixedOffset};
use uuid::Uuid;

use crate::base::{self, Game, LoadedLibrary, LibrarySource, VersionChannel, HandlerInto as _};
use crate::download::Download;
use crate::maven::Gav;


/// The Mojang version manifest, listing every published version.
const MANIFEST_URL: &str = "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

/// Host of the community proxy restoring the legacy online services.
const LEGACY_PROXY_HOST: &str = "betacraft.uk";

/// An installer for Mojang-provided versions. Every workaround is enabled by
/// default except the LWJGL version override.
#[derive(Debug, Clone)]
pub struct Installer {
    base: base::Installer,
    options: Options,
}

/// The Mojang-specific knobs, separated from the base configuration so the install
/// can borrow them independently.
#[derive(Debug, Clone)]
struct Options {
    excludes: Vec<FetchExclude>,
    demo: bool,
    quick_play: Option<QuickPlay>,
    resolution: Option<(u16, u16)>,
    disable_multiplayer: bool,
    disable_chat: bool,
    session: Session,
    fix_quick_play: bool,
    fix_proxy: bool,
    fix_merge_sort: bool,
    fix_resolution: bool,
    fix_authlib: bool,
    fix_lwjgl: Option<String>,
}

/// The identity the game runs under. For an offline session only the uuid and
/// username are set; an external authentication flow provides the other,
/// bearer-token-shaped values.
#[derive(Debug, Clone, Default)]
struct Session {
    kind: String,
    uuid: Uuid,
    username: String,
    token: String,
    xuid: String,
    client_id: String,
}

impl Installer {

    /// An installer for the given root version.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            base: base::Installer::new(version),
            options: Options {
                excludes: Vec::new(),
                demo: false,
                quick_play: None,
                resolution: None,
                disable_multiplayer: false,
                disable_chat: false,
                session: Session::default(),
                fix_quick_play: true,
                fix_proxy: true,
                fix_merge_sort: true,
                fix_resolution: true,
                fix_authlib: true,
                fix_lwjgl: None,
            },
        }
    }

    /// The underlying base installer, for directories, strictness and JVM policy.
    #[inline]
    pub fn base(&self) -> &base::Installer {
        &self.base
    }

    #[inline]
    pub fn base_mut(&mut self) -> &mut base::Installer {
        &mut self.base
    }

    /// The root version to install.
    #[inline]
    pub fn version(&self) -> &str {
        self.base.version()
    }

    #[inline]
    pub fn set_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.base.set_version(version);
        self
    }

    /// Exclude versions from manifest validation and fetching, excluded versions
    /// are used exactly as found on disk.
    #[inline]
    pub fn add_fetch_exclude(&mut self, exclude: FetchExclude) -> &mut Self {
        self.options.excludes.push(exclude);
        self
    }

    /// Run the game in demo mode.
    #[inline]
    pub fn set_demo(&mut self, demo: bool) -> &mut Self {
        self.options.demo = demo;
        self
    }

    /// Jump straight into a world, server or realm after launch. Natively supported
    /// from 1.20 on, a workaround covers the multiplayer mode on older versions.
    #[inline]
    pub fn set_quick_play(&mut self, quick_play: QuickPlay) -> &mut Self {
        self.options.quick_play = Some(quick_play);
        self
    }

    #[inline]
    pub fn remove_quick_play(&mut self) -> &mut Self {
        self.options.quick_play = None;
        self
    }

    /// Initial size of the game window.
    #[inline]
    pub fn set_resolution(&mut self, width: u16, height: u16) -> &mut Self {
        self.options.resolution = Some((width, height));
        self
    }

    #[inline]
    pub fn remove_resolution(&mut self) -> &mut Self {
        self.options.resolution = None;
        self
    }

    /// Grey out the multiplayer button (>= 1.16).
    #[inline]
    pub fn set_disable_multiplayer(&mut self, disable: bool) -> &mut Self {
        self.options.disable_multiplayer = disable;
        self
    }

    /// Disable the in-game chat (>= 1.16).
    #[inline]
    pub fn set_disable_chat(&mut self, disable: bool) -> &mut Self {
        self.options.disable_chat = disable;
        self
    }

    /// Offline session from an explicit uuid and username, the username is capped
    /// at 16 characters (panicking when the cut falls inside a code point).
    pub fn set_auth_offline(&mut self, uuid: Uuid, username: impl Into<String>) -> &mut Self {
        let mut username = username.into();
        username.truncate(16);
        self.options.session = Session { uuid, username, ..Session::default() };
        self
    }

    /// Offline session from a uuid alone, the username is the first 8 characters of
    /// its textual form.
    pub fn set_auth_offline_uuid(&mut self, uuid: Uuid) -> &mut Self {
        let mut username = uuid.to_string();
        username.truncate(8);
        self.options.session = Session { uuid, username, ..Session::default() };
        self
    }

    /// Offline session from a username alone, the uuid is derived from it under the
    /// launcher's namespace. Note that offline-mode servers derive their own uuid
    /// instead, see [`Self::set_auth_offline_username_authlib`] for a derivation
    /// matching theirs.
    pub fn set_auth_offline_username(&mut self, username: impl Into<String>) -> &mut Self {
        let mut username = username.into();
        username.truncate(16);
        let uuid = Uuid::new_v5(&base::NAMESPACE, username.as_bytes());
        self.options.session = Session { uuid, username, ..Session::default() };
        self
    }

    /// Offline session from a username, with the uuid derived exactly like Mojang's
    /// authlib derives it for offline-mode servers: a v3 (MD5) uuid over
    /// `OfflinePlayer:<username>`.
    pub fn set_auth_offline_username_authlib(&mut self, username: impl Into<String>) -> &mut Self {

        let mut username = username.into();
        username.truncate(16);

        let mut context = md5::Context::new();
        context.write_fmt(format_args!("OfflinePlayer:{username}")).unwrap();

        let uuid = uuid::Builder::from_bytes(context.compute().0)
            .with_variant(uuid::Variant::RFC4122)
            .with_version(uuid::Version::Md5)
            .into_uuid();

        self.options.session = Session { uuid, username, ..Session::default() };
        self

    }

    /// Online session from the values an external authentication flow produced:
    /// the profile uuid and username, the bearer access token, and the Xbox user
    /// and client identifiers used by telemetry placeholders.
    pub fn set_auth_online(&mut self,
        uuid: Uuid,
        username: impl Into<String>,
        token: impl Into<String>,
        xuid: impl Into<String>,
        client_id: impl Into<String>,
    ) -> &mut Self {
        self.options.session = Session {
            kind: "msa".to_string(),
            uuid,
            username: username.into(),
            token: token.into(),
            xuid: xuid.into(),
            client_id: client_id.into(),
        };
        self
    }

    /// On versions predating native quick play (< 1.20), emulate the multiplayer
    /// mode with the legacy `--server`/`--port` arguments. Enabled by default.
    #[inline]
    pub fn set_fix_legacy_quick_play(&mut self, fix: bool) -> &mut Self {
        self.options.fix_quick_play = fix;
        self
    }

    /// On old alpha/beta/early-release versions, route the long-gone online
    /// services (skins notably) through a community proxy. Enabled by default.
    #[inline]
    pub fn set_fix_legacy_proxy(&mut self, fix: bool) -> &mut Self {
        self.options.fix_proxy = fix;
        self
    }

    /// On alpha and beta versions, select the pre-Java-7 merge sort, without which
    /// they may crash. Enabled by default.
    #[inline]
    pub fn set_fix_legacy_merge_sort(&mut self, fix: bool) -> &mut Self {
        self.options.fix_merge_sort = fix;
        self
    }

    /// On versions without resolution arguments, force the initial window size
    /// with the legacy `--width`/`--height` arguments. Enabled by default.
    #[inline]
    pub fn set_fix_legacy_resolution(&mut self, fix: bool) -> &mut Self {
        self.options.fix_resolution = fix;
        self
    }

    /// Replace authlib 2.1.28 (shipped by 1.16.4 and 1.16.5, breaking multiplayer)
    /// with the fixed 2.2.30. Enabled by default.
    #[inline]
    pub fn set_fix_broken_authlib(&mut self, fix: bool) -> &mut Self {
        self.options.fix_authlib = fix;
        self
    }

    /// Rewrite every LWJGL library to the given version (>= 3.2.3), also bringing
    /// in natives the original version lacks (ARM notably). Disabled by default,
    /// and not guaranteed to work with every game version.
    #[inline]
    pub fn set_fix_lwjgl(&mut self, version: impl Into<String>) -> &mut Self {
        self.options.fix_lwjgl = Some(version.into());
        self
    }

    #[inline]
    pub fn remove_fix_lwjgl(&mut self) -> &mut Self {
        self.options.fix_lwjgl = None;
        self
    }

    /// Install the configured version and return the game to launch.
    #[inline]
    pub fn install(&mut self, mut handler: impl Handler) -> Result<Game> {
        self.install_impl(&mut handler)
    }

    #[inline(never)]
    fn install_impl(&mut self, handler: &mut dyn Handler) -> Result<Game> {

        // Default identity: an offline session tied to this machine.
        if self.options.session.username.is_empty() {
            let uuid = Uuid::new_v5(&base::NAMESPACE, gethostname::gethostname().as_encoded_bytes());
            self.set_auth_offline_uuid(uuid);
        }

        let Self { ref mut base, ref options } = *self;

        let mut relay = Relay {
            handler: &mut *handler,
            options,
            manifest: None,
            sources: HashMap::new(),
            leaf: String::new(),
            fixes: Vec::new(),
            failed: Ok(()),
        };

        let mut game = {
            let result = base.install(&mut relay);
            relay.failed?;
            result?
        };

        game.fixes = relay.fixes;
        let leaf = relay.leaf;

        apply_session(&mut game, &options.session);
        apply_quick_play(handler, &mut game, options);
        apply_resolution(handler, &mut game, options);
        apply_legacy_workarounds(handler, &mut game, options, &leaf);

        if options.disable_multiplayer {
            game.game_args.push("--disableMultiplayer".to_string());
        }

        if options.disable_chat {
            game.game_args.push("--disableChat".to_string());
        }

        Ok(game)

    }

}

/// Substitute the session placeholders in the program arguments.
fn apply_session(game: &mut Game, session: &Session) {
    base::expand_each(&mut game.game_args, &mut |name| {
        Some(match name {
            "auth_player_name" => session.username.clone(),
            "auth_uuid" => session.uuid.as_simple().to_string(),
            "auth_access_token" => session.token.clone(),
            "auth_xuid" => session.xuid.clone(),
            // The pre-1.6 session token form, empty for offline sessions.
            "auth_session" if session.token.is_empty() => String::new(),
            "auth_session" => format!("token:{}:{}", session.token, session.uuid.as_simple()),
            "user_type" => session.kind.clone(),
            "user_properties" => "{}".to_string(),
            "clientid" => session.client_id.clone(),
            _ => return None,
        })
    });
}

/// Substitute the quick play placeholders, or emulate multiplayer quick play with
/// the legacy server arguments when the version predates them.
fn apply_quick_play(handler: &mut dyn Handler, game: &mut Game, options: &Options) {

    let Some(quick_play) = &options.quick_play else {
        return;
    };

    let placeholder = match quick_play {
        QuickPlay::Path { .. } => "quickPlayPath",
        QuickPlay::Singleplayer { .. } => "quickPlaySingleplayer",
        QuickPlay::Multiplayer { .. } => "quickPlayMultiplayer",
        QuickPlay::Realms { .. } => "quickPlayRealms",
    };

    let mut native = false;
    base::expand_each(&mut game.game_args, &mut |name| {
        if name != placeholder {
            return None;
        }
        native = true;
        Some(match quick_play {
            QuickPlay::Path { path } => path.display().to_string(),
            QuickPlay::Singleplayer { name } => name.clone(),
            QuickPlay::Multiplayer { host, port } => format!("{host}:{port}"),
            QuickPlay::Realms { id } => id.clone(),
        })
    });

    if native {
        return;
    }

    if options.fix_quick_play {
        if let QuickPlay::Multiplayer { host, port } = quick_play {
            game.game_args.extend(["--server".to_string(), host.clone()]);
            game.game_args.extend(["--port".to_string(), port.to_string()]);
            game.fixes.push("legacy_quick_play".to_string());
            handler.on_event(Event::FixedLegacyQuickPlay);
            return;
        }
    }

    handler.on_event(Event::WarnUnsupportedQuickPlay);

}

/// Substitute the resolution placeholders, or fall back on the legacy width and
/// height arguments when the version has no resolution support.
fn apply_resolution(handler: &mut dyn Handler, game: &mut Game, options: &Options) {

    let Some((width, height)) = options.resolution else {
        return;
    };

    let mut native = false;
    base::expand_each(&mut game.game_args, &mut |name| {
        match name {
            "resolution_width" => {
                native = true;
                Some(width.to_string())
            }
            "resolution_height" => {
                native = true;
                Some(height.to_string())
            }
            _ => None,
        }
    });

    if native {
        return;
    }

    if options.fix_resolution {
        game.game_args.extend(["--width".to_string(), width.to_string()]);
        game.game_args.extend(["--height".to_string(), height.to_string()]);
        game.fixes.push("legacy_resolution".to_string());
        handler.on_event(Event::FixedLegacyResolution);
        return;
    }

    handler.on_event(Event::WarnUnsupportedResolution);

}

/// Apply the version-dependent JVM workarounds, keyed on the leaf version of the
/// chain (the vanilla version a loader chain bottoms out on).
fn apply_legacy_workarounds(handler: &mut dyn Handler, game: &mut Game, options: &Options, leaf: &str) {

    if options.fix_proxy {
        if let Some(port) = legacy_proxy_port(leaf) {
            game.jvm_args.push(format!("-Dhttp.proxyHost={LEGACY_PROXY_HOST}"));
            game.jvm_args.push(format!("-Dhttp.proxyPort={port}"));
            game.fixes.push("legacy_proxy".to_string());
            handler.on_event(Event::FixedLegacyProxy { host: LEGACY_PROXY_HOST, port });
        }
    }

    if options.fix_merge_sort && needs_legacy_merge_sort(leaf) {
        game.jvm_args.push("-Djava.util.Arrays.useLegacyMergeSort=true".to_string());
        game.fixes.push("legacy_merge_sort".to_string());
        handler.on_event(Event::FixedLegacyMergeSort);
    }

}

/// Events of this layer, wrapping the base events.
#[derive(Debug)]
#[non_exhaustive]
pub enum Event<'a> {
    /// A relayed base event.
    Base(base::Event<'a>),
    /// The on-disk descriptor does not match the manifest anymore and was removed
    /// so an up-to-date one gets fetched.
    InvalidatedVersion { version: &'a str },
    /// A missing descriptor is being fetched from the manifest.
    FetchVersion { version: &'a str },
    /// The descriptor was fetched.
    FetchedVersion { version: &'a str },
    /// Multiplayer quick play was emulated with the legacy arguments.
    FixedLegacyQuickPlay,
    /// The legacy online services were routed through a proxy.
    FixedLegacyProxy { host: &'a str, port: u16 },
    /// The legacy merge sort was selected.
    FixedLegacyMergeSort,
    /// The window size was forced with the legacy arguments.
    FixedLegacyResolution,
    /// The broken authlib was replaced.
    FixedBrokenAuthlib,
    /// Quick play was requested but this version cannot do it.
    WarnUnsupportedQuickPlay,
    /// A window size was requested but this version cannot apply it.
    WarnUnsupportedResolution,
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

/// Crate-internal adapters bridging a handler of this layer down the stack.
pub(crate) trait HandlerInto: Handler + Sized {

    fn into_base(self) -> impl base::Handler {

        struct Bridge<H: Handler>(H);

        impl<H: Handler> base::Handler for Bridge<H> {

            fn on_event(&mut self, event: base::Event) {
                self.0.on_event(Event::Base(event));
            }

            fn is_cancelled(&mut self) -> bool {
                self.0.is_cancelled()
            }

        }

        Bridge(self)

    }

    fn into_download(self) -> impl crate::download::Handler {
        self.into_base().into_download()
    }

}

impl<H: Handler> HandlerInto for H {}

/// Failure of a Mojang install.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A failure of the underlying base install.
    #[error("base: {0}")]
    Base(#[source] base::Error),
    /// The requested LWJGL override cannot be applied, either because the version
    /// is too old (< 3.2.3) or because it has no natives for this platform.
    #[error("lwjgl fix not found: {version}")]
    LwjglFixNotFound { version: String },
}

impl<E: Into<base::Error>> From<E> for Error {
    fn from(value: E) -> Self {
        Self::Base(value.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A version exclusion for manifest validation and fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchExclude {
    /// Exclude every version, the manifest is never consulted.
    All,
    /// Exclude one version by its exact identifier.
    Exact(String),
}

/// Where to jump right after the game launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuickPlay {
    /// Follow the instructions of a quick play file, relative to the work dir.
    Path { path: PathBuf },
    /// Open a singleplayer world by name.
    Singleplayer { name: String },
    /// Join a server.
    Multiplayer { host: String, port: u16 },
    /// Join a realm by id.
    Realms { id: String },
}

/// The parsed Mojang version manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    raw: serde::VersionManifest,
}

impl Manifest {

    /// Fetch the manifest, reusing the cached copy when the remote is unchanged or
    /// unreachable.
    pub fn request(handler: impl crate::download::Handler) -> base::Result<Self> {

        let mut fetched = Download::cached(MANIFEST_URL)
            .keep_open()
            .fetch(handler)?;

        let reader = BufReader::new(fetched.take_handle().unwrap());
        let mut deserializer = serde_json::Deserializer::from_reader(reader);
        let raw = serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| base::Error::internal(e, "version manifest"))?;

        Ok(Self { raw })

    }

    /// Identifier of the most recent release, if the manifest names one.
    pub fn latest_release_name(&self) -> Option<&str> {
        self.raw.latest.release.as_deref()
    }

    /// Identifier of the most recent snapshot, if the manifest names one.
    pub fn latest_snapshot_name(&self) -> Option<&str> {
        self.raw.latest.snapshot.as_deref()
    }

    /// All published versions, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = ManifestVersion<'_>> + '_ {
        self.raw.versions.iter().map(|entry| ManifestVersion { entry })
    }

}

/// One version of the manifest.
#[derive(Debug)]
pub struct ManifestVersion<'a> {
    entry: &'a serde::ManifestEntry,
}

impl ManifestVersion<'_> {

    #[inline]
    pub fn name(&self) -> &str {
        &self.entry.id
    }

    #[inline]
    pub fn channel(&self) -> VersionChannel {
        VersionChannel::from(self.entry.channel)
    }

    #[inline]
    pub fn release_time(&self) -> &DateTime<FixedOffset> {
        &self.entry.release_time
    }

}

// -------------------- //
//  Internal machinery  //
// -------------------- //

/// The handler this layer slips under the base installer: it reacts to descriptor
/// loading (validation, invalidation, fetching) and to library selection (the
/// library fixes), and relays everything to the outer handler.
struct Relay<'a> {
    handler: &'a mut dyn Handler,
    options: &'a Options,
    /// Fetched lazily, only when a version may need validation.
    manifest: Option<Manifest>,
    /// Descriptor sources remembered between the load and need events.
    sources: HashMap<String, base::serde::FileSource>,
    /// Identifier of the last version of the chain.
    leaf: String,
    /// Codes of the fixes applied so far.
    fixes: Vec<String>,
    /// First error raised inside the relay, rethrown after the install.
    failed: Result<()>,
}

impl base::Handler for Relay<'_> {

    fn on_event(&mut self, event: base::Event) {
        if self.failed.is_ok() {
            self.failed = self.dispatch(event);
        }
    }

    fn is_cancelled(&mut self) -> bool {
        self.handler.is_cancelled()
    }

}

impl Relay<'_> {

    fn dispatch(&mut self, mut event: base::Event) -> Result<()> {

        match event {

            base::Event::FilterFeatures { ref mut features } => {
                self.select_features(features);
                self.handler.on_event(Event::Base(event));
            }

            base::Event::LoadedHierarchy { hierarchy } => {
                self.leaf = hierarchy.last().unwrap().name().to_string();
                self.handler.on_event(Event::Base(event));
            }

            base::Event::LoadVersion { version, file } => {
                self.handler.on_event(Event::Base(base::Event::LoadVersion { version, file }));
                self.validate_version(version, file)?;
            }

            base::Event::NeedVersion { version, file, ref mut retry } => {
                if let Some(source) = self.sources.get(version) {

                    self.handler.on_event(Event::FetchVersion { version });

                    Download::new(source.url.clone(), file.to_path_buf())
                        .expect_size(source.size)
                        .expect_sha1(source.sha1.map(|h| h.0))
                        .fetch((&mut self.handler).into_download())?;

                    self.handler.on_event(Event::FetchedVersion { version });
                    **retry = true;

                } else {
                    self.handler.on_event(Event::Base(event));
                }
            }

            base::Event::FilterLibraries { ref mut libraries } => {
                self.fix_libraries(libraries)?;
                self.handler.on_event(Event::Base(event));
            }

            _ => self.handler.on_event(Event::Base(event)),

        }

        Ok(())

    }

    /// Turn on the features implied by the configured options.
    fn select_features(&self, features: &mut HashSet<String>) {

        if self.options.demo {
            features.insert("is_demo_user".to_string());
        }

        if self.options.resolution.is_some() {
            features.insert("has_custom_resolution".to_string());
        }

        match &self.options.quick_play {
            Some(QuickPlay::Path { .. }) => features.insert("has_quick_plays_support".to_string()),
            Some(QuickPlay::Singleplayer { .. }) => features.insert("is_quick_play_singleplayer".to_string()),
            Some(QuickPlay::Multiplayer { .. }) => features.insert("is_quick_play_multiplayer".to_string()),
            Some(QuickPlay::Realms { .. }) => features.insert("is_quick_play_realms".to_string()),
            None => false,
        };

    }

    /// Before a descriptor is read: when the manifest knows this version, remember
    /// its source and remove the on-disk file if it doesn't match anymore.
    fn validate_version(&mut self, version: &str, file: &std::path::Path) -> Result<()> {

        let excluded = self.options.excludes.iter().any(|exclude| match exclude {
            FetchExclude::All => true,
            FetchExclude::Exact(name) => name == version,
        });

        if excluded {
            return Ok(());
        }

        if self.manifest.is_none() {
            let handler = (&mut self.handler).into_download();
            self.manifest = Some(Manifest::request(handler)?);
        }

        let known = self.manifest.as_ref().unwrap().raw.versions.iter()
            .find(|entry| entry.id == version);

        let Some(entry) = known else {
            return Ok(());
        };

        self.sources.insert(version.to_string(), entry.source.clone());

        if file.is_file() && !base::verify_file(file, entry.source.size, entry.source.sha1.as_deref())? {
            fs::remove_file(file)
                .map_err(|e| base::Error::internal(e, file.display().to_string()))?;
            self.handler.on_event(Event::InvalidatedVersion { version });
        }

        Ok(())

    }

    /// The library fixes plug into the selection filter of the base installer.
    fn fix_libraries(&mut self, libraries: &mut Vec<LoadedLibrary>) -> Result<()> {

        if self.options.fix_authlib {
            self.swap_broken_authlib(libraries);
        }

        if let Some(version) = self.options.fix_lwjgl.clone() {
            self.override_lwjgl(libraries, &version)?;
        }

        Ok(())

    }

    /// Authlib 2.1.28 disables multiplayer, swap in 2.2.30 which Mojang published
    /// as the fix.
    fn swap_broken_authlib(&mut self, libraries: &mut [LoadedLibrary]) {

        let broken = Gav::new("com.mojang", "authlib", "2.1.28", None, None).unwrap();

        let Some(library) = libraries.iter_mut().find(|lib| lib.name == broken) else {
            return;
        };

        library.name.set_version("2.2.30");
        library.path = None;
        library.source = Some(LibrarySource {
            url: format!("{}{}", base::LIBRARY_REPO_URL, library.name.repo_path()),
            size: Some(87497),
            sha1: Some([
                0xd6, 0xe6, 0x77, 0x19, 0x9a, 0xa6, 0xb1, 0x9c, 0x4a, 0x9a,
                0x2e, 0x72, 0x50, 0x34, 0x14, 0x9e, 0xb3, 0xe7, 0x46, 0xf8,
            ]),
        });

        self.fixes.push("broken_authlib".to_string());
        self.handler.on_event(Event::FixedBrokenAuthlib);

    }

    /// Rewrite every LWJGL library to the requested version and replace the native
    /// classifiers with the ones of that version for this platform.
    fn override_lwjgl(&mut self, libraries: &mut Vec<LoadedLibrary>, version: &str) -> Result<()> {

        if version != "3.2.3" && !version.starts_with("3.3.") {
            return Err(Error::LwjglFixNotFound { version: version.to_string() });
        }

        let classifier = lwjgl_natives_classifier(version)
            .ok_or_else(|| Error::LwjglFixNotFound { version: version.to_string() })?;

        let is_lwjgl = |name: &Gav| name.group() == "org.lwjgl" && name.extension() == "jar";

        // Keep one plain entry per LWJGL artifact at the new version, dropping any
        // classifier entry of the old version.
        let mut artifacts = Vec::new();
        libraries.retain_mut(|library| {
            if !is_lwjgl(&library.name) {
                return true;
            }
            if library.name.classifier().is_some() || library.natives {
                return false;
            }
            library.name.set_version(version);
            library.path = None;
            artifacts.push(library.name.clone());
            true
        });

        // Re-add the natives of every artifact with the platform classifier. Modern
        // LWJGL extracts its own natives, so these go on the class path.
        for mut name in artifacts {
            name.set_classifier(Some(classifier));
            libraries.push(LoadedLibrary {
                name,
                path: None,
                source: None,
                natives: false,
            });
        }

        // Every rewritten entry downloads from maven central.
        for library in libraries.iter_mut().filter(|lib| is_lwjgl(&lib.name)) {
            library.source = Some(LibrarySource {
                url: format!("https://repo1.maven.org/maven2/{}", library.name.repo_path()),
                size: None,
                sha1: None,
            });
        }

        self.fixes.push(format!("lwjgl:{version}"));
        Ok(())

    }

}

/// The natives classifier of LWJGL for this platform, none when the platform is
/// unsupported by the requested version line.
fn lwjgl_natives_classifier(version: &str) -> Option<&'static str> {

    let modern = version != "3.2.3";

    Some(match (std::env::consts::OS, std::env::consts::ARCH) {
        ("linux", "x86" | "x86_64") => "natives-linux",
        ("linux", "arm") => "natives-linux-arm32",
        ("linux", "aarch64") => "natives-linux-arm64",
        ("windows", "x86") => "natives-windows-x86",
        ("windows", "x86_64") => "natives-windows",
        ("windows", "aarch64") if modern => "natives-windows-arm64",
        ("macos", "x86_64") => "natives-macos",
        ("macos", "aarch64") if modern => "natives-macos-arm64",
        _ => return None,
    })

}

/// The proxy port restoring the online services of the given version, none when
/// the version needs no proxy. The ports are those published by the betacraft
/// project, one per era of the legacy protocol.
fn legacy_proxy_port(version: &str) -> Option<u16> {

    if version.starts_with("a1.0.") {
        return Some(80);
    }
    if version.starts_with("a1.1.") {
        return Some(11702);
    }
    if version.starts_with("a1.") || version.starts_with("b1.") {
        return Some(11705);
    }

    // Releases up to 1.5.2 and the two 1.6 snapshots that still used the old
    // skin servers.
    let release = matches!(version, "1.0" | "1.1" | "1.2" | "1.3" | "1.4" | "1.5")
        || ["1.2.", "1.3.", "1.4.", "1.5."].iter().any(|prefix| version.starts_with(prefix))
        || matches!(version, "13w16a" | "13w16b");

    release.then_some(11707)

}

/// Alpha and beta versions crash under the modern stable sort.
fn needs_legacy_merge_sort(version: &str) -> bool {
    version.starts_with("a1.") || version.starts_with("b1.")
}

#[cfg(test)]
mod tests {

    use super::{legacy_proxy_port, needs_legacy_merge_sort};

    #[test]
    fn proxy_ports_per_era() {

        assert_eq!(legacy_proxy_port("a1.0.4"), Some(80));
        assert_eq!(legacy_proxy_port("a1.1.2_01"), Some(11702));
        assert_eq!(legacy_proxy_port("a1.2.6"), Some(11705));
        assert_eq!(legacy_proxy_port("b1.7.3"), Some(11705));
        assert_eq!(legacy_proxy_port("1.0"), Some(11707));
        assert_eq!(legacy_proxy_port("1.2.5"), Some(11707));
        assert_eq!(legacy_proxy_port("1.5.2"), Some(11707));
        assert_eq!(legacy_proxy_port("13w16b"), Some(11707));

        assert_eq!(legacy_proxy_port("1.6.4"), None);
        assert_eq!(legacy_proxy_port("1.20.1"), None);
        assert_eq!(legacy_proxy_port("23w14a"), None);

    }

    #[test]
    fn merge_sort_applies_to_alpha_and_beta() {
        assert!(needs_legacy_merge_sort("a1.2.6"));
        assert!(needs_legacy_merge_sort("b1.7.3"));
        assert!(!needs_legacy_merge_sort("1.0"));
        assert!(!needs_legacy_merge_sort("1.7.10"));
    }

}
