//! Behavior tests of the base installer, driving it over synthetic descriptors in
//! a temporary directory and asserting on the event sequence and outcome.

use std::path::{Path, PathBuf};
use std::fs;

use portablemc::base::{self, Error, Event, Handler, JvmPolicy};

use tempfile::TempDir;


/// A temporary installation root populated with descriptors.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {

    fn new() -> Self {
        fs::create_dir_all(env!("CARGO_TARGET_TMPDIR")).unwrap();
        Self {
            dir: tempfile::Builder::new()
                .prefix("event.")
                .tempdir_in(env!("CARGO_TARGET_TMPDIR"))
                .unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write the descriptor of a version.
    fn put_descriptor(&self, version: &str, json: &str) {
        let dir = self.path().join("versions").join(version);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{version}.json")), json).unwrap();
    }

    /// Write a placeholder client archive of a version.
    fn put_client(&self, version: &str) {
        let dir = self.path().join("versions").join(version);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{version}.jar")), b"placeholder").unwrap();
    }

    /// Write a placeholder non-executable file, used as a static JVM target.
    fn put_file(&self, name: &str) -> PathBuf {
        let file = self.path().join(name);
        fs::write(&file, b"placeholder").unwrap();
        file
    }

    /// An installer rooted in this sandbox with a static (never failing) JVM.
    fn installer(&self, version: &str) -> base::Installer {
        let mut installer = base::Installer::new(version);
        installer.set_main_dir(self.path());
        installer.set_jvm_policy(JvmPolicy::Static(self.path().join("java")));
        installer
    }

    /// Install and return the recorded event trace with the result.
    fn install(&self, version: &str) -> (Vec<String>, base::Result<base::Game>) {
        let mut recorder = Recorder::default();
        let result = self.installer(version).install(&mut recorder);
        (recorder.trace, result)
    }

}

/// Records every event as one compact trace code, and cancels the install when
/// the download phase is reached.
#[derive(Default)]
struct Recorder {
    trace: Vec<String>,
}

impl Handler for Recorder {
    fn on_event(&mut self, event: Event) {
        let code = match event {
            Event::FilterFeatures { .. } => return,
            Event::LoadedFeatures { features } => format!("features:{}", features.len()),
            Event::LoadHierarchy { root_version } => format!("hierarchy:{root_version}"),
            Event::LoadVersion { version, .. } => format!("version:{version}"),
            Event::NeedVersion { version, .. } => format!("need:{version}"),
            Event::LoadedVersion { version, .. } => format!("loaded:{version}"),
            Event::LoadedHierarchy { hierarchy } => {
                let names = hierarchy.iter().map(|v| v.name()).collect::<Vec<_>>();
                format!("chain:{}", names.join("<"))
            }
            Event::LoadClient => "client".to_string(),
            Event::LoadedClient { .. } => "client:ok".to_string(),
            Event::LoadLibraries => "libraries".to_string(),
            Event::FilterLibraries { .. } => return,
            Event::LoadedLibraries { libraries } => {
                let names = libraries.iter()
                    .map(|lib| lib.name.to_string())
                    .collect::<Vec<_>>();
                format!("libraries:{}", names.join(","))
            }
            Event::FilterLibrariesFiles { .. } => return,
            Event::LoadedLibrariesFiles { class_files, natives_files } =>
                format!("files:{}/{}", class_files.len(), natives_files.len()),
            Event::NoLogger => "logger:none".to_string(),
            Event::LoadLogger { id } => format!("logger:{id}"),
            Event::LoadedLogger { id } => format!("logger:ok:{id}"),
            Event::NoAssets => "assets:none".to_string(),
            Event::LoadAssets { id } => format!("assets:{id}"),
            Event::LoadedAssets { id, count } => format!("assets:ok:{id}:{count}"),
            Event::VerifiedAssets { id, count } => format!("assets:verified:{id}:{count}"),
            Event::LoadJvm { major_version } => format!("jvm:{major_version}"),
            Event::LoadedJvm { compatible, .. } => format!("jvm:ok:{compatible}"),
            Event::DownloadResources { cancel } => {
                *cancel = true;
                "download".to_string()
            }
            _ => return,
        };
        self.trace.push(code);
    }
}

#[test]
fn inheritance_cycle_is_detected() {

    let sandbox = Sandbox::new();
    sandbox.put_descriptor("a", r#"{"id": "a", "inheritsFrom": "b"}"#);
    sandbox.put_descriptor("b", r#"{"id": "b", "inheritsFrom": "a"}"#);

    let (trace, result) = sandbox.install("a");

    assert!(matches!(result, Err(Error::HierarchyLoop { version }) if version == "a"));
    assert_eq!(trace, [
        "features:0",
        "hierarchy:a",
        "version:a", "loaded:a",
        "version:b", "loaded:b",
    ]);

}

#[test]
fn too_deep_chain_is_rejected() {

    let sandbox = Sandbox::new();

    // A 17-deep linear chain: one more than the supported depth.
    for index in 0..17 {
        let json = if index == 16 {
            format!(r#"{{"id": "v{index}"}}"#)
        } else {
            format!(r#"{{"id": "v{index}", "inheritsFrom": "v{}"}}"#, index + 1)
        };
        sandbox.put_descriptor(&format!("v{index}"), &json);
    }

    let (_, result) = sandbox.install("v0");
    assert!(matches!(result, Err(Error::HierarchyLoop { version }) if version == "v16"));

}

#[test]
fn missing_version_is_reported_after_the_handler_declined() {

    let sandbox = Sandbox::new();
    let (trace, result) = sandbox.install("absent");

    assert!(matches!(result, Err(Error::VersionNotFound { version }) if version == "absent"));
    assert_eq!(trace, ["features:0", "hierarchy:absent", "version:absent", "need:absent"]);

}

#[test]
fn missing_client_without_download_fails() {

    let sandbox = Sandbox::new();
    sandbox.put_descriptor("bare", r#"{"id": "bare", "mainClass": "game.Main"}"#);

    let (trace, result) = sandbox.install("bare");

    assert!(matches!(result, Err(Error::ClientNotFound {  })));
    assert_eq!(trace, [
        "features:0",
        "hierarchy:bare",
        "version:bare", "loaded:bare",
        "chain:bare",
        "client",
    ]);

}

#[test]
fn library_selection_rules_dedup_and_natives() {

    let sandbox = Sandbox::new();
    sandbox.put_descriptor("libs", r#"{
        "id": "libs",
        "type": "release",
        "mainClass": "game.Main",
        "downloads": {
            "client": {"url": "https://invalid.example/client.jar", "size": 12}
        },
        "libraries": [
            {
                "name": "com.mojang:logging:1.1.1",
                "downloads": {"artifact": {"url": "https://invalid.example/logging-1.1.1.jar"}}
            },
            {
                "name": "com.mojang:logging:1.0.0",
                "downloads": {"artifact": {"url": "https://invalid.example/logging-1.0.0.jar"}}
            },
            {
                "name": "org.demo:gated:1.0",
                "rules": [{"action": "allow", "features": {"is_demo_user": true}}],
                "downloads": {"artifact": {"url": "https://invalid.example/gated-1.0.jar"}}
            },
            {
                "name": "org.demo:nat:1.0",
                "natives": {"linux": "natives-test", "osx": "natives-test", "windows": "natives-test"},
                "downloads": {
                    "classifiers": {
                        "natives-test": {"url": "https://invalid.example/nat-1.0-natives-test.jar"}
                    }
                }
            }
        ]
    }"#);

    let (trace, result) = sandbox.install("libs");

    // The download phase was reached (and cancelled by the recorder).
    assert!(matches!(result, Err(Error::DownloadResourcesCancelled {  })));

    assert_eq!(trace, [
        "features:0",
        "hierarchy:libs",
        "version:libs", "loaded:libs",
        "chain:libs",
        "client", "client:ok",
        "libraries",
        // The duplicated coordinate keeps its slot with the last version, the
        // feature-gated entry is dropped, the natives entry gets its classifier.
        "libraries:com.mojang:logging:1.0.0,org.demo:nat:1.0:natives-test",
        // Class path: the logging library plus the client archive, natives apart.
        "files:2/1",
        "logger:none",
        "assets:none",
        "jvm:8",
        "jvm:ok:false",
        "download",
    ]);

}

#[test]
fn arguments_are_assembled_and_substituted() {

    let sandbox = Sandbox::new();
    sandbox.put_file("java");
    sandbox.put_client("legacy");
    sandbox.put_descriptor("legacy", r#"{
        "id": "legacy",
        "type": "release",
        "mainClass": "net.minecraft.client.Minecraft",
        "minecraftArguments": "--username ${auth_player_name} --version ${version_name} --gameDir ${game_directory}"
    }"#);

    let (_, result) = sandbox.install("legacy");
    let game = result.unwrap();

    assert_eq!(game.main_class, "net.minecraft.client.Minecraft");

    // Legacy descriptors get the implicit JVM arguments, with the class path
    // pointing at the client archive.
    let cp_at = game.jvm_args.iter().position(|arg| arg == "-cp").unwrap();
    let class_path = &game.jvm_args[cp_at + 1];
    assert!(class_path.ends_with("legacy.jar"), "{class_path}");
    assert!(game.jvm_args.iter().any(|arg| arg.starts_with("-Djava.library.path=")));

    // The game arguments come from whitespace splitting of the legacy string;
    // known placeholders are substituted, the session ones are left for the upper
    // layer.
    assert_eq!(game.game_args[0], "--username");
    assert_eq!(game.game_args[1], "${auth_player_name}");
    assert_eq!(game.game_args[2], "--version");
    assert_eq!(game.game_args[3], "legacy");
    assert_eq!(game.game_args[4], "--gameDir");
    assert_eq!(PathBuf::from(&game.game_args[5]), game.mc_dir);

    // The run directory was created and derived from this install.
    assert!(game.bin_dir.is_dir());
    assert!(game.bin_dir.file_name().unwrap().to_str().unwrap().starts_with("legacy-"));

    // An unchanged install resolves to the very same command.
    let (_, again) = sandbox.install("legacy");
    let again = again.unwrap();
    assert_eq!(again.jvm_args, game.jvm_args);
    assert_eq!(again.game_args, game.game_args);
    assert_eq!(again.bin_dir, game.bin_dir);

}
