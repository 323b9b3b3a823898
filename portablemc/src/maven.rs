//! Maven coordinates and 'maven-metadata.xml' version listings, used for libraries
//! and for the loader repositories.

use std::path::PathBuf;
use std::str::FromStr;
use std::fmt;


/// A library coordinate of the form `group:artifact:version[:classifier][@extension]`,
/// the extension defaults to `jar` and is normalized away when explicitly `jar`.
///
/// All components are validated on construction to only hold characters that are
/// safe to place in a URL or to join below a directory: ASCII letters and digits,
/// `-`, `_`, `+`, `*` (kept for wildcard filters) and `.` outside of any `..`
/// sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gav {
    group: String,
    artifact: String,
    version: String,
    classifier: Option<String>,
    extension: Option<String>,
}

impl Gav {

    /// Build a coordinate from its components, none of which may be empty when
    /// given. Returns none when a component is empty or holds invalid characters.
    pub fn new(group: &str, artifact: &str, version: &str, classifier: Option<&str>, extension: Option<&str>) -> Option<Self> {

        for part in [Some(group), Some(artifact), Some(version), classifier, extension] {
            if let Some(part) = part {
                if part.is_empty() || !component_valid(part) {
                    return None;
                }
            }
        }

        Some(Self {
            group: group.to_string(),
            artifact: artifact.to_string(),
            version: version.to_string(),
            classifier: classifier.map(str::to_string),
            extension: extension.filter(|&ext| ext != "jar").map(str::to_string),
        })

    }

    #[inline]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[inline]
    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    #[inline]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[inline]
    pub fn classifier(&self) -> Option<&str> {
        self.classifier.as_deref()
    }

    /// The file extension, `jar` when not explicitly specified.
    #[inline]
    pub fn extension(&self) -> &str {
        self.extension.as_deref().unwrap_or("jar")
    }

    /// Replace the version, keeping the coordinate unchanged if the new version is
    /// empty or invalid.
    pub fn set_version(&mut self, version: &str) {
        if !version.is_empty() && component_valid(version) {
            self.version = version.to_string();
        }
    }

    /// Replace or remove the classifier, keeping the coordinate unchanged if the new
    /// classifier is empty or invalid.
    pub fn set_classifier(&mut self, classifier: Option<&str>) {
        match classifier {
            None => self.classifier = None,
            Some(classifier) if !classifier.is_empty() && component_valid(classifier) => {
                self.classifier = Some(classifier.to_string());
            }
            Some(_) => (),
        }
    }

    /// The file name of the artifact: `artifact-version[-classifier].extension`.
    pub fn file_name(&self) -> String {
        let mut name = format!("{}-{}", self.artifact, self.version);
        if let Some(classifier) = &self.classifier {
            name.push('-');
            name.push_str(classifier);
        }
        name.push('.');
        name.push_str(self.extension());
        name
    }

    /// The location of the artifact below a maven repository root, with `/` as the
    /// separator, suited for building URLs.
    pub fn repo_path(&self) -> String {
        let mut path = self.group.replace('.', "/");
        path.push('/');
        path.push_str(&self.artifact);
        path.push('/');
        path.push_str(&self.version);
        path.push('/');
        path.push_str(&self.file_name());
        path
    }

    /// The location of the artifact below a maven repository root, as a relative
    /// filesystem path. The character validation guarantees that this path has no
    /// absolute, empty or parent component.
    pub fn file_path(&self) -> PathBuf {
        let mut path = PathBuf::new();
        path.extend(self.group.split('.'));
        path.push(&self.artifact);
        path.push(&self.version);
        path.push(self.file_name());
        path
    }

}

impl fmt::Display for Gav {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{classifier}")?;
        }
        if let Some(extension) = &self.extension {
            write!(f, "@{extension}")?;
        }
        Ok(())
    }
}

impl FromStr for Gav {

    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {

        let (coord, extension) = match s.split_once('@') {
            Some((coord, extension)) => (coord, Some(extension)),
            None => (s, None),
        };

        let mut parts = coord.split(':');
        let group = parts.next().ok_or(())?;
        let artifact = parts.next().ok_or(())?;
        let version = parts.next().ok_or(())?;
        let classifier = parts.next();

        if parts.next().is_some() {
            return Err(());
        }

        Gav::new(group, artifact, version, classifier, extension).ok_or(())

    }

}

impl<'de> serde::Deserialize<'de> for Gav {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {

        struct Visitor;
        impl serde::de::Visitor<'_> for Visitor {

            type Value = Gav;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a maven coordinate (group:artifact:version[:classifier][@extension])")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(|()| E::custom("invalid maven coordinate"))
            }

        }

        deserializer.deserialize_str(Visitor)

    }
}

impl serde::Serialize for Gav {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Validate a single coordinate component, see [`Gav`] for the accepted set.
fn component_valid(part: &str) -> bool {

    if part.contains("..") {
        return false;
    }

    part.bytes().all(|b| {
        b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'+' | b'*' | b'.')
    })

}

/// The versions listed by a repository's 'maven-metadata.xml' file.
#[derive(Debug, Clone)]
pub struct MavenMetadata {
    versions: Vec<String>,
}

impl MavenMetadata {

    /// Parse a metadata document, keeping only its `<version>` elements. Returns
    /// none when the document is not valid XML or lists no version at all.
    pub fn try_from_xml(document: &str) -> Option<Self> {

        use xmlparser::{Token, ElementEnd, Tokenizer};

        let mut versions = Vec::new();
        let mut capture = false;

        for token in Tokenizer::from(document) {
            match token.ok()? {
                Token::ElementStart { prefix, local, .. }
                    if prefix.is_empty() && local.as_str() == "version" => capture = true,
                Token::ElementEnd { end: ElementEnd::Close(prefix, local), .. }
                    if prefix.is_empty() && local.as_str() == "version" => capture = false,
                Token::Text { text } if capture => versions.push(text.trim().to_string()),
                _ => (),
            }
        }

        if versions.is_empty() {
            None
        } else {
            Some(Self { versions })
        }

    }

    /// All listed versions in document order, double-ended so callers can scan from
    /// the most recent end.
    pub fn versions(&self) -> impl DoubleEndedIterator<Item = &str> + '_ {
        self.versions.iter().map(String::as_str)
    }

}

#[cfg(test)]
mod tests {

    use super::{Gav, MavenMetadata};

    #[test]
    fn components() {

        let gav: Gav = "net.fabricmc:fabric-loader:0.14.21".parse().unwrap();
        assert_eq!(gav.group(), "net.fabricmc");
        assert_eq!(gav.artifact(), "fabric-loader");
        assert_eq!(gav.version(), "0.14.21");
        assert_eq!(gav.classifier(), None);
        assert_eq!(gav.extension(), "jar");

        let gav: Gav = "org.lwjgl:lwjgl:3.3.1:natives-linux@txt".parse().unwrap();
        assert_eq!(gav.classifier(), Some("natives-linux"));
        assert_eq!(gav.extension(), "txt");

    }

    #[test]
    fn rejects_malformed() {
        for case in ["", ":", "a:b", "a:b:c:d:e", "a::c", "a:b:", "a:b:c@", "a/b:c:d", "a:b:c..d"] {
            assert!(case.parse::<Gav>().is_err(), "{case:?} should be rejected");
        }
    }

    #[test]
    fn jar_extension_is_canonical() {
        let explicit: Gav = "com.mojang:authlib:2.2.30@jar".parse().unwrap();
        let implicit: Gav = "com.mojang:authlib:2.2.30".parse().unwrap();
        assert_eq!(explicit, implicit);
        assert_eq!(explicit.to_string(), "com.mojang:authlib:2.2.30");
    }

    #[test]
    fn paths() {

        let gav: Gav = "com.mojang:authlib:2.2.30".parse().unwrap();
        assert_eq!(gav.file_name(), "authlib-2.2.30.jar");
        assert_eq!(gav.repo_path(), "com/mojang/authlib/2.2.30/authlib-2.2.30.jar");

        let gav: Gav = "org.lwjgl:lwjgl:3.3.1:natives-linux".parse().unwrap();
        assert_eq!(gav.repo_path(), "org/lwjgl/lwjgl/3.3.1/lwjgl-3.3.1-natives-linux.jar");

        let components = gav.file_path().components().count();
        assert_eq!(components, 5); // org, lwjgl, lwjgl, 3.3.1, file name

    }

    #[test]
    fn mutation() {

        let mut gav: Gav = "org.lwjgl:lwjgl:3.2.3".parse().unwrap();

        gav.set_version("3.3.1");
        assert_eq!(gav.version(), "3.3.1");
        gav.set_version("not/valid");
        assert_eq!(gav.version(), "3.3.1");

        gav.set_classifier(Some("natives-linux"));
        assert_eq!(gav.classifier(), Some("natives-linux"));
        gav.set_classifier(None);
        assert_eq!(gav.classifier(), None);

    }

    #[test]
    fn metadata_versions() {

        const DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
            <metadata>
                <groupId>net.neoforged</groupId>
                <artifactId>neoforge</artifactId>
                <versioning>
                    <versions>
                        <version>20.4.180</version>
                        <version>20.4.181</version>
                    </versions>
                </versioning>
            </metadata>"#;

        let metadata = MavenMetadata::try_from_xml(DOCUMENT).unwrap();
        assert_eq!(metadata.versions().collect::<Vec<_>>(), ["20.4.180", "20.4.181"]);
        assert_eq!(metadata.versions().next_back(), Some("20.4.181"));

        assert!(MavenMetadata::try_from_xml("<metadata/>").is_none());
        assert!(MavenMetadata::try_from_xml("definitely not xml <").is_none());

    }

}
