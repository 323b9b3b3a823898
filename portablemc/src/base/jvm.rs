//! Provisioning of the Java runtime used to launch the game: a runtime is picked
//! according to the configured policy, either probed from the system or installed
//! from the Mojang-provided distributions.

use std::time::{Duration, Instant};
use std::process::{Command, Stdio};
use std::path::{Path, PathBuf};
use std::io::BufReader;
use std::fs::File;
use std::env;

use crate::download::{Batch, Download};

use super::{serde, Error, Event, Handler, HandlerInto as _, JvmPolicy, Result, verify_file};


/// Index of all Mojang-provided runtime distributions, for every platform.
const RUNTIME_INDEX_URL: &str = "https://piston-meta.mojang.com/v1/products/java-runtime/2ec0cc96c44e5a76b9c8b7c39df7210883d12871/all.json";

/// How long the version probe of the candidate executables may take in total.
const PROBE_DEADLINE: Duration = Duration::from_secs(3);

/// What the JVM provisioning needs to know from the installer.
pub(super) struct Request<'a> {
    pub policy: &'a JvmPolicy,
    pub jvm_dir: &'a Path,
    pub strict_check: bool,
    /// The major version required by the effective descriptor.
    pub major: u32,
    /// The distribution component named by the descriptor, if any.
    pub component: Option<&'a str>,
}

/// The picked runtime.
pub(super) struct Jvm {
    /// The java executable to invoke.
    pub file: PathBuf,
    /// Probed or declared version string, when known.
    pub version: Option<String>,
    /// Whether that version is likely able to run the game.
    pub compatible: bool,
    /// Post-download setup, present for Mojang-provided runtimes.
    pub setup: Option<RuntimeSetup>,
}

/// Deferred filesystem setup of a Mojang-provided runtime, applied once its files
/// are downloaded.
#[derive(Default)]
pub(super) struct RuntimeSetup {
    /// Files to mark executable.
    executables: Vec<PathBuf>,
    /// Symlinks to create, as `(link, target)` pairs.
    links: Vec<(PathBuf, PathBuf)>,
}

/// Resolve a runtime according to the policy, scheduling distribution files into
/// the batch when a Mojang runtime is selected.
pub(super) fn resolve(request: &Request, handler: &mut dyn Handler, batch: &mut Batch) -> Result<Jvm> {

    let jvm = match request.policy {
        JvmPolicy::Static(file) => Some(probe_static(file, request.major)),
        JvmPolicy::System => probe_system(request.major, handler)?,
        JvmPolicy::Mojang => install_mojang(request, handler, batch)?,
        JvmPolicy::SystemThenMojang => {
            match probe_system(request.major, handler)? {
                Some(jvm) => Some(jvm),
                None => install_mojang(request, handler, batch)?,
            }
        }
        JvmPolicy::MojangThenSystem => {
            match install_mojang(request, handler, batch)? {
                Some(jvm) => Some(jvm),
                None => probe_system(request.major, handler)?,
            }
        }
    };

    jvm.ok_or(Error::JvmNotFound { major_version: request.major })

}

/// The distribution component to install for a required major version, used when
/// the descriptor names none.
pub(super) fn default_component(major: u32) -> Option<&'static str> {
    Some(match major {
        8 => "jre-legacy",
        16 => "java-runtime-alpha",
        17 => "java-runtime-gamma",
        21 => "java-runtime-delta",
        _ => return None,
    })
}

/// A statically configured executable is used as-is, probing only informs the
/// compatibility flag and never fails the install.
fn probe_static(file: &Path, major: u32) -> Jvm {

    let version = probe_versions(std::slice::from_ref(&file.to_path_buf())).pop().unwrap();
    let compatible = version.as_deref()
        .and_then(java_major)
        .is_some_and(|found| majors_compatible(major, found));

    Jvm {
        file: file.to_path_buf(),
        version,
        compatible,
        setup: None,
    }

}

/// Search the system for installed runtimes and return the first whose probed
/// major version is compatible.
fn probe_system(major: u32, handler: &mut dyn Handler) -> Result<Option<Jvm>> {

    let candidates = system_candidates();
    let versions = probe_versions(&candidates);

    let mut found = None;

    for (file, version) in candidates.into_iter().zip(versions) {

        let Some(version) = version else {
            continue;
        };

        let compatible = java_major(&version)
            .is_some_and(|found| majors_compatible(major, found));

        handler.on_event(Event::FoundJvmSystemVersion {
            file: &file,
            version: &version,
            compatible,
        });

        // The first compatible candidate wins, but we keep probing the others so
        // they are all reported.
        if compatible && found.is_none() {
            found = Some(Jvm {
                file,
                version: Some(version),
                compatible: true,
                setup: None,
            });
        }

    }

    Ok(found)

}

/// Collect the candidate executables of the system: every `java` in the search
/// path, plus well-known per-OS locations.
fn system_candidates() -> Vec<PathBuf> {

    let mut candidates = Vec::new();
    let mut push = |file: PathBuf| {
        if file.is_file() && !candidates.contains(&file) {
            candidates.push(file);
        }
    };

    if let Some(path) = env::var_os("PATH") {
        for dir in env::split_paths(&path) {
            push(dir.join(executable_name()));
        }
    }

    // Linux distributions install their packaged runtimes here.
    #[cfg(target_os = "linux")]
    if let Ok(entries) = std::fs::read_dir("/usr/lib/jvm") {
        for entry in entries.flatten() {
            push(entry.path().join("bin").join(executable_name()));
        }
    }

    // On Windows, installed runtimes register their home in the registry.
    #[cfg(windows)]
    for root in [
        "SOFTWARE\\JavaSoft\\Java Development Kit",
        "SOFTWARE\\JavaSoft\\Java Runtime Environment",
        "SOFTWARE\\JavaSoft\\JDK",
        "SOFTWARE\\JavaSoft\\JRE",
    ] {
        let Ok(key) = windows_registry::LOCAL_MACHINE.open(root) else { continue };
        let Ok(children) = key.keys() else { continue };
        for child in children {
            let Ok(child) = key.open(&child) else { continue };
            let Ok(home) = child.get_string("JavaHome") else { continue };
            push(PathBuf::from(home).join("bin").join(executable_name()));
        }
    }

    candidates

}

/// Run `-version` on every candidate in parallel and collect the version string of
/// each, none for candidates that failed to run or to answer in time. The version
/// is the first double-quoted token of the output, which the `-version` flag is
/// documented to print on stderr.
fn probe_versions(candidates: &[PathBuf]) -> Vec<Option<String>> {

    let mut children = candidates.iter()
        .map(|file| {
            Command::new(file)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()
                .ok()
        })
        .collect::<Vec<_>>();

    let mut versions = vec![None; candidates.len()];
    let deadline = Instant::now() + PROBE_DEADLINE;

    loop {

        let mut running = false;

        for (slot, version) in children.iter_mut().zip(&mut versions) {

            let Some(child) = slot else { continue };

            match child.try_wait() {
                Ok(Some(status)) => {
                    let child = slot.take().unwrap();
                    if status.success() {
                        if let Ok(output) = child.wait_with_output() {
                            *version = quoted_token(&output.stderr);
                        }
                    }
                }
                Ok(None) => running = true,
                Err(_) => {
                    let _ = child.kill();
                    *slot = None;
                }
            }

        }

        if !running {
            break;
        }

        if Instant::now() >= deadline {
            for slot in children.iter_mut() {
                if let Some(mut child) = slot.take() {
                    let _ = child.kill();
                }
            }
            break;
        }

        std::thread::sleep(Duration::from_millis(50));

    }

    versions

}

/// Extract the first token enclosed in double quotes.
fn quoted_token(raw: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(raw).ok()?;
    let (_, rest) = text.split_once('"')?;
    let (token, _) = rest.split_once('"')?;
    Some(token.to_string())
}

/// Parse the major number of a Java version string: `1.8.0_51` styles yield the
/// number after `1.`, modern `17.0.2` styles yield the leading number, and the old
/// `8u51` update style is also understood.
fn java_major(version: &str) -> Option<u32> {
    let rest = version.strip_prefix("1.").unwrap_or(version);
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Whether a found major version can run a game requiring another one: up to Java 8
/// the internal APIs changed at every release so an exact match is required, later
/// versions keep compatibility with older class files.
fn majors_compatible(required: u32, found: u32) -> bool {
    if required <= 8 {
        found == required
    } else {
        found >= required
    }
}

/// Select and schedule a Mojang-provided distribution: resolve the per-platform
/// component in the runtime index, then schedule every file of its manifest.
/// Unsupported platforms or missing distributions only produce warning events.
fn install_mojang(request: &Request, handler: &mut dyn Handler, batch: &mut Batch) -> Result<Option<Jvm>> {

    // Mojang only links its Linux runtimes against glibc.
    if cfg!(target_os = "linux") && cfg!(target_feature = "crt-static") {
        handler.on_event(Event::WarnJvmUnsupportedDynamicCrt);
        return Ok(None);
    }

    let Some(platform) = runtime_platform() else {
        handler.on_event(Event::WarnJvmUnsupportedPlatform);
        return Ok(None);
    };

    let Some(component) = request.component else {
        // No component name means the required major version has no known
        // distribution, system search is the only option left.
        handler.on_event(Event::WarnJvmMissingDistribution);
        return Ok(None);
    };

    let index: serde::RuntimeIndex = {
        let mut fetched = Download::cached(RUNTIME_INDEX_URL)
            .keep_open()
            .fetch((&mut *handler).into_download())?;
        let reader = BufReader::new(fetched.take_handle().unwrap());
        let mut deserializer = serde_json::Deserializer::from_reader(reader);
        serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| Error::internal(e, "runtime index"))?
    };

    let variant = index.platforms.get(platform)
        .and_then(|platform| platform.components.get(component))
        .and_then(|component| component.variants.first());

    let Some(variant) = variant else {
        handler.on_event(Event::WarnJvmMissingDistribution);
        return Ok(None);
    };

    let dir = request.jvm_dir.join(component);
    let manifest_file = request.jvm_dir.join(format!("{component}.json"));

    let manifest: serde::RuntimeManifest = {

        let source = &variant.manifest;
        if !verify_file(&manifest_file, source.size, source.sha1.as_deref())? {
            Download::new(source.url.clone(), manifest_file.clone())
                .expect_size(source.size)
                .expect_sha1(source.sha1.map(|h| h.0))
                .fetch((&mut *handler).into_download())?;
        }

        let reader = File::open(&manifest_file)
            .map(BufReader::new)
            .map_err(|e| Error::internal(e, manifest_file.display().to_string()))?;

        let mut deserializer = serde_json::Deserializer::from_reader(reader);
        serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| Error::internal(e, manifest_file.display().to_string()))?

    };

    let mut setup = RuntimeSetup::default();

    for (entry_path, entry) in &manifest.files {

        let file = dir.join(entry_path);

        match entry {
            serde::RuntimeFile::Directory => {
                std::fs::create_dir_all(&file)
                    .map_err(|e| Error::internal(e, file.display().to_string()))?;
            }
            serde::RuntimeFile::File { executable, downloads } => {

                if *executable {
                    setup.executables.push(file.clone());
                }

                let source = &downloads.raw;
                let sha1 = source.sha1.as_deref().filter(|_| request.strict_check);
                if !verify_file(&file, source.size, sha1)? {
                    batch.add(Download::new(source.url.clone(), file)
                        .expect_size(source.size)
                        .expect_sha1(source.sha1.map(|h| h.0)));
                }

            }
            serde::RuntimeFile::Link { target } => {
                setup.links.push((file, PathBuf::from(target)));
            }
        }

    }

    // The bundle layout of macOS runtimes buries the executable deeper.
    let file = if cfg!(target_os = "macos") {
        dir.join("jre.bundle/Contents/Home/bin/java")
    } else {
        dir.join("bin").join(executable_name())
    };

    Ok(Some(Jvm {
        file,
        version: Some(variant.version.name.clone()),
        compatible: true,
        setup: Some(setup),
    }))

}

/// Apply the deferred setup of a Mojang-provided runtime, once its files exist.
pub(super) fn apply_setup(jvm: &Jvm) -> Result<()> {

    let Some(setup) = &jvm.setup else {
        return Ok(());
    };

    // Executable bits only exist on unix.
    #[cfg(unix)]
    for file in &setup.executables {

        use std::os::unix::fs::PermissionsExt;

        let metadata = file.metadata()
            .map_err(|e| Error::internal(e, file.display().to_string()))?;

        let mut permissions = metadata.permissions();
        let mode = permissions.mode();

        // Grant execution wherever read access is already granted.
        let wanted = mode | ((mode & 0o444) >> 2);
        if wanted != mode {
            permissions.set_mode(wanted);
            std::fs::set_permissions(file, permissions)
                .map_err(|e| Error::internal(e, file.display().to_string()))?;
        }

    }

    for (link, target) in &setup.links {
        super::make_link(link, target)?;
    }

    Ok(())

}

/// Name of the java executable on this OS.
pub(super) fn executable_name() -> &'static str {
    if cfg!(windows) { "javaw.exe" } else { "java" }
}

/// The runtime index platform key of the host, none when Mojang provides no
/// runtime for it.
fn runtime_platform() -> Option<&'static str> {
    Some(match (env::consts::OS, env::consts::ARCH) {
        ("linux", "x86_64") => "linux",
        ("linux", "x86") => "linux-i386",
        ("macos", "x86_64") => "mac-os",
        ("macos", "aarch64") => "mac-os-arm64",
        ("windows", "x86_64") => "windows-x64",
        ("windows", "x86") => "windows-x86",
        ("windows", "aarch64") => "windows-arm64",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {

    use super::{java_major, majors_compatible, quoted_token};

    #[test]
    fn major_parsing() {

        assert_eq!(java_major("17"), Some(17));
        assert_eq!(java_major("17.0.2"), Some(17));
        assert_eq!(java_major("21.0.1"), Some(21));
        assert_eq!(java_major("1.8.0_111"), Some(8));
        assert_eq!(java_major("1.8"), Some(8));
        assert_eq!(java_major("8u51"), Some(8));
        assert_eq!(java_major("7u80"), Some(7));
        assert_eq!(java_major("10.whatever"), Some(10));

        assert_eq!(java_major(""), None);
        assert_eq!(java_major("1.x"), None);
        assert_eq!(java_major("java"), None);

    }

    #[test]
    fn major_compatibility() {

        // Java 8 and before require an exact match.
        assert!(majors_compatible(8, 8));
        assert!(!majors_compatible(8, 11));
        assert!(!majors_compatible(8, 7));
        assert!(majors_compatible(7, 7));

        // Later versions accept anything at least as recent.
        assert!(majors_compatible(17, 17));
        assert!(majors_compatible(17, 21));
        assert!(!majors_compatible(17, 16));

    }

    #[test]
    fn version_token() {
        assert_eq!(quoted_token(b"openjdk version \"17.0.2\" 2022-01-18").as_deref(), Some("17.0.2"));
        assert_eq!(quoted_token(b"java version \"1.8.0_51\"\nmore lines").as_deref(), Some("1.8.0_51"));
        assert_eq!(quoted_token(b"no quotes here"), None);
        assert_eq!(quoted_token(b"one \" quote"), None);
    }

}
