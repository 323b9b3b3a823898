//! Installer layer for the Fabric family of mod loaders: Fabric itself and the
//! forks sharing its metadata API (Quilt, LegacyFabric, Babric).
//!
//! Installing comes down to resolving the wanted game and loader versions against
//! the family's API, then asking that API for a prebuilt descriptor which is
//! written under `versions/<prefix>-<game>-<loader>/` with the vanilla version as
//! its parent. The regular Mojang install then takes over.

mod serde;

use std::path::Path;

use reqwest::StatusCode;

use crate::base::{self, Game};
use crate::moj;


/// The Fabric-family installer.
#[derive(Debug, Clone)]
pub struct Installer {
    mojang: moj::Installer,
    loader: Loader,
    game_version: GameVersion,
    loader_version: LoaderVersion,
}

impl Installer {

    /// An installer for the given loader and versions.
    pub fn new(loader: Loader, game_version: impl Into<GameVersion>, loader_version: impl Into<LoaderVersion>) -> Self {
        Self {
            mojang: moj::Installer::new(String::new()),
            loader,
            game_version: game_version.into(),
            loader_version: loader_version.into(),
        }
    }

    /// An installer for the latest stable game and loader versions.
    pub fn new_with_stable(loader: Loader) -> Self {
        Self::new(loader, GameVersion::Stable, LoaderVersion::Stable)
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

    /// The game version to install the loader for.
    #[inline]
    pub fn game_version(&self) -> &GameVersion {
        &self.game_version
    }

    #[inline]
    pub fn set_game_version(&mut self, version: impl Into<GameVersion>) -> &mut Self {
        self.game_version = version.into();
        self
    }

    /// The loader version to install.
    #[inline]
    pub fn loader_version(&self) -> &LoaderVersion {
        &self.loader_version
    }

    #[inline]
    pub fn set_loader_version(&mut self, version: impl Into<LoaderVersion>) -> &mut Self {
        self.loader_version = version.into();
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

        // Resolve the two versions first, they name the synthesized root.
        let game_version = match &self.game_version {
            GameVersion::Name(name) => name.clone(),
            wanted => {
                let stable = matches!(wanted, GameVersion::Stable);
                request_game_versions(loader)?.into_iter()
                    .find(|release| release.stable || !stable)
                    .map(|release| release.name)
                    .ok_or(Error::LatestVersionNotFound { game_version: None, stable })?
            }
        };

        let loader_version = match &self.loader_version {
            LoaderVersion::Name(name) => name.clone(),
            wanted => {
                let stable = matches!(wanted, LoaderVersion::Stable);
                request_loader_versions(loader, Some(&game_version))?.into_iter()
                    .find(|release| release.stable || !stable)
                    .map(|release| release.name)
                    .ok_or_else(|| Error::LatestVersionNotFound {
                        game_version: Some(game_version.clone()),
                        stable,
                    })?
            }
        };

        let root_version = format!("{}-{game_version}-{loader_version}", loader.prefix());
        self.mojang.set_version(&root_version);

        let mut relay = Relay {
            handler: &mut *handler,
            loader,
            root_version: &root_version,
            game_version: &game_version,
            loader_version: &loader_version,
            failed: Ok(()),
        };

        let result = self.mojang.install(&mut relay);
        relay.failed?;
        Ok(result?)

    }

}

/// Events of this layer, wrapping the Mojang events.
#[derive(Debug)]
#[non_exhaustive]
pub enum Event<'a> {
    /// A relayed Mojang event.
    Mojang(moj::Event<'a>),
    /// The loader descriptor is being fetched from the family's API.
    FetchVersion { game_version: &'a str, loader_version: &'a str },
    /// The loader descriptor was fetched and written.
    FetchedVersion { game_version: &'a str, loader_version: &'a str },
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

/// Failure of a Fabric-family install.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A failure of the underlying Mojang install.
    #[error("mojang: {0}")]
    Mojang(#[source] moj::Error),
    /// No latest version matched: of the game when no game version is carried, of
    /// the loader for that game version otherwise.
    #[error("latest version not found (stable: {stable})")]
    LatestVersionNotFound {
        game_version: Option<String>,
        stable: bool,
    },
    /// The API does not know this game version at all.
    #[error("game version not found: {game_version}")]
    GameVersionNotFound { game_version: String },
    /// The API knows the game version but not this loader version for it.
    #[error("loader version not found: {game_version}/{loader_version}")]
    LoaderVersionNotFound {
        game_version: String,
        loader_version: String,
    },
}

impl<E: Into<moj::Error>> From<E> for Error {
    fn from(value: E) -> Self {
        Self::Mojang(value.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The loaders sharing the Fabric metadata API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    /// The original Fabric loader.
    Fabric,
    /// The Quilt fork.
    Quilt,
    /// The LegacyFabric backport, covering versions down from 1.13.
    LegacyFabric,
    /// The Babric port, built for b1.7.3 only.
    Babric,
}

impl Loader {

    /// Prefix of the synthesized version identifiers.
    fn prefix(self) -> &'static str {
        match self {
            Loader::Fabric => "fabric",
            Loader::Quilt => "quilt",
            Loader::LegacyFabric => "legacyfabric",
            Loader::Babric => "babric",
        }
    }

    /// Base URL of the family's metadata API, without a trailing slash.
    fn api_url(self) -> &'static str {
        match self {
            Loader::Fabric => "https://meta.fabricmc.net/v2",
            Loader::Quilt => "https://meta.quiltmc.org/v3",
            Loader::LegacyFabric => "https://meta.legacyfabric.net/v2",
            Loader::Babric => "https://meta.babric.glass-launcher.net/v2",
        }
    }

}

/// The game version to install the loader for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameVersion {
    /// The latest game version the API flags stable, akin to the Mojang release.
    Stable,
    /// The latest game version, stable or not.
    Unstable,
    /// An explicit version.
    Name(String),
}

impl<T: Into<String>> From<T> for GameVersion {
    fn from(value: T) -> Self {
        Self::Name(value.into())
    }
}

/// The loader version to install, mirroring [`GameVersion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderVersion {
    Stable,
    Unstable,
    /// An explicit version.
    Name(String),
}

impl<T: Into<String>> From<T> for LoaderVersion {
    fn from(value: T) -> Self {
        Self::Name(value.into())
    }
}

/// A version listed by the API, most recent first in every listing.
#[derive(Debug, Clone)]
pub struct Release {
    pub name: String,
    pub stable: bool,
}

/// List the game versions the loader supports.
pub fn request_game_versions(loader: Loader) -> Result<Vec<Release>> {
    let url = format!("{}/versions/game", loader.api_url());
    let entries: Vec<serde::GameEntry> = request_json(&url, "game versions")?
        .unwrap_or_default();
    Ok(entries.into_iter()
        .map(|entry| Release { name: entry.version, stable: entry.stable })
        .collect())
}

/// List the loader versions, either globally or those available for one game
/// version. An unknown game version yields an empty list.
pub fn request_loader_versions(loader: Loader, game_version: Option<&str>) -> Result<Vec<Release>> {

    let to_release = |entry: serde::LoaderEntry| {
        // When the API carries no stability flag, pre-releases are recognized by
        // their version string.
        let stable = entry.stable.unwrap_or_else(|| {
            !entry.version.contains("-beta") && !entry.version.contains("-pre")
        });
        Release { name: entry.version, stable }
    };

    match game_version {
        None => {
            let url = format!("{}/versions/loader", loader.api_url());
            let entries: Vec<serde::LoaderEntry> = request_json(&url, "loader versions")?
                .unwrap_or_default();
            Ok(entries.into_iter().map(to_release).collect())
        }
        Some(game_version) => {
            let url = format!("{}/versions/loader/{game_version}", loader.api_url());
            let entries: Vec<serde::GameLoaderEntry> = request_json(&url, "loader versions")?
                .unwrap_or_default();
            Ok(entries.into_iter().map(|entry| to_release(entry.loader)).collect())
        }
    }

}

/// Fetch the prebuilt descriptor of a game/loader version pair, none when the API
/// rejects the pair.
fn request_profile(loader: Loader, game_version: &str, loader_version: &str) -> Result<Option<base::serde::Descriptor>> {
    let url = format!("{}/versions/loader/{game_version}/{loader_version}/profile/json",
        loader.api_url());
    request_json(&url, "loader profile")
}

/// GET a JSON endpoint of the API, mapping the not-found statuses (the API answers
/// 400 or 404 for unknown versions) to none.
fn request_json<T: ::serde::de::DeserializeOwned>(url: &str, what: &str) -> Result<Option<T>> {

    let outcome = crate::net::block_on(async {
        crate::net::client()?
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send().await?
            .error_for_status()?
            .json::<T>().await
            .map(Some)
    });

    match outcome {
        Ok(value) => Ok(value),
        Err(e) if matches!(e.status(), Some(StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST)) => Ok(None),
        Err(e) => Err(Error::from(base::Error::internal(e, what.to_string()))),
    }

}

// -------------------- //
//  Internal machinery  //
// -------------------- //

/// The handler slipped under the Mojang installer: it answers the missing-version
/// event of the synthesized root by asking the API for a prebuilt descriptor.
struct Relay<'a> {
    handler: &'a mut dyn Handler,
    loader: Loader,
    root_version: &'a str,
    game_version: &'a str,
    loader_version: &'a str,
    failed: Result<()>,
}

impl moj::Handler for Relay<'_> {

    fn on_event(&mut self, mut event: moj::Event) {

        if let moj::Event::Base(base::Event::NeedVersion { version, file, ref mut retry }) = event {
            if version == self.root_version && self.failed.is_ok() {
                match self.synthesize(file) {
                    Ok(()) => **retry = true,
                    Err(e) => self.failed = Err(e),
                }
                return;
            }
        }

        self.handler.on_event(Event::Mojang(event));

    }

    fn is_cancelled(&mut self) -> bool {
        self.handler.is_cancelled()
    }

}

impl Relay<'_> {

    /// Fetch the prebuilt descriptor and write it as the root version. When the
    /// API rejects the pair, a second request decides which of the two versions
    /// was unknown.
    fn synthesize(&mut self, file: &Path) -> Result<()> {

        self.handler.on_event(Event::FetchVersion {
            game_version: self.game_version,
            loader_version: self.loader_version,
        });

        let profile = request_profile(self.loader, self.game_version, self.loader_version)?;

        let Some(mut descriptor) = profile else {
            let known_game = !request_loader_versions(self.loader, Some(self.game_version))?.is_empty();
            return Err(if known_game {
                Error::LoaderVersionNotFound {
                    game_version: self.game_version.to_string(),
                    loader_version: self.loader_version.to_string(),
                }
            } else {
                Error::GameVersionNotFound {
                    game_version: self.game_version.to_string(),
                }
            });
        };

        // The prebuilt identifier is not necessarily ours, force it.
        descriptor.id = self.root_version.to_string();
        base::write_descriptor(file, &descriptor)?;

        self.handler.on_event(Event::FetchedVersion {
            game_version: self.game_version,
            loader_version: self.loader_version,
        });

        Ok(())

    }

}
