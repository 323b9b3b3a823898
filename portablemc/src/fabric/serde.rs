//! JSON schemas of the Fabric-style metadata APIs, reduced to the fields the
//! installer actually consumes.

#[derive(serde::Deserialize, Debug, Clone)]
pub struct GameEntry {
    pub version: String,
    pub stable: bool,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct LoaderEntry {
    pub version: String,
    /// Some forks (Quilt) omit the flag, stability is then guessed from the
    /// version string.
    pub stable: Option<bool>,
}

/// Element of the per-game-version loader listing, which nests the loader entry.
#[derive(serde::Deserialize, Debug, Clone)]
pub struct GameLoaderEntry {
    pub loader: LoaderEntry,
}
