//! Implementation of the 'start' command.

use std::process::{Child, ExitCode};
use std::time::Duration;
use std::sync::Mutex;

use portablemc::moj::{self, FetchExclude, QuickPlay};
use portablemc::base::{self, Game, JvmPolicy};
use portablemc::{fabric, forge};

use crate::parse::{StartArgs, StartJvmPolicy, StartResolution, StartVersion};

use super::{Cli, LogHandler, EXIT_FAILURE, EXIT_GAME_FAILURE, log_any_error,
    log_base_error, log_mojang_error, log_fabric_error, log_forge_error};


/// The running game, shared with the Ctrl-C handler so an interrupted launcher
/// takes the game down with it (Windows does not do that on its own).
static RUNNING_GAME: Mutex<Option<Child>> = Mutex::new(None);


pub fn start(cli: &mut Cli, args: &StartArgs) -> ExitCode {

    let _ = ctrlc::set_handler(|| {
        // Never unwrap here, the mutex may be poisoned while exiting.
        if let Ok(mut game) = RUNNING_GAME.lock() {
            if let Some(mut child) = game.take() {
                let _ = child.kill();
            }
        }
        std::process::exit(0);
    });

    match &args.version {
        StartVersion::Standard { version } => {

            let mut installer = base::Installer::new(version.clone());
            if !configure_base(&mut installer, cli, args) {
                return ExitCode::from(EXIT_FAILURE);
            }

            let handler = StartHandler::new(args, LogHandler::new(&mut cli.out));
            match installer.install(handler) {
                Ok(game) => launch(cli, args, game),
                Err(e) => ExitCode::from(log_base_error(cli, &e)),
            }

        }
        StartVersion::Mojang { version } => {
            start_mojang(cli, args, version.clone())
        }
        StartVersion::MojangRelease | StartVersion::MojangSnapshot => {

            let snapshot = matches!(args.version, StartVersion::MojangSnapshot);
            let Some(version) = latest_mojang_version(cli, snapshot) else {
                return ExitCode::from(EXIT_FAILURE);
            };

            start_mojang(cli, args, version)

        }
        StartVersion::Fabric { loader, game_version, loader_version } => {

            let loader = *loader;
            let mut installer = fabric::Installer::new(loader, game_version.clone(), loader_version.clone());
            if !configure_mojang(installer.mojang_mut(), cli, args) {
                return ExitCode::from(EXIT_FAILURE);
            }

            let mut log_handler = LogHandler::new(&mut cli.out);
            log_handler.set_fabric_loader(loader);
            let handler = StartHandler::new(args, log_handler);

            match installer.install(handler) {
                Ok(game) => launch(cli, args, game),
                Err(e) => ExitCode::from(log_fabric_error(cli, &e, loader)),
            }

        }
        StartVersion::Forge { loader, version } => {
            start_forge(cli, args, *loader, forge::Version::Id(version.clone()))
        }
        StartVersion::ForgeLatest { loader, game_version, stable } => {

            let game_version = match game_version {
                Some(game_version) => game_version.clone(),
                None => match latest_mojang_version(cli, false) {
                    Some(version) => version,
                    None => return ExitCode::from(EXIT_FAILURE),
                },
            };

            let version = if *stable {
                forge::Version::Stable(game_version)
            } else {
                forge::Version::Unstable(game_version)
            };

            start_forge(cli, args, *loader, version)

        }
    }

}

fn start_mojang(cli: &mut Cli, args: &StartArgs, version: String) -> ExitCode {

    let mut installer = moj::Installer::new(version);
    if !configure_mojang(&mut installer, cli, args) {
        return ExitCode::from(EXIT_FAILURE);
    }

    let handler = StartHandler::new(args, LogHandler::new(&mut cli.out));
    match installer.install(handler) {
        Ok(game) => launch(cli, args, game),
        Err(e) => ExitCode::from(log_mojang_error(cli, &e)),
    }

}

fn start_forge(cli: &mut Cli, args: &StartArgs, loader: forge::Loader, version: forge::Version) -> ExitCode {

    let mut installer = forge::Installer::new(loader, version);
    if !configure_mojang(installer.mojang_mut(), cli, args) {
        return ExitCode::from(EXIT_FAILURE);
    }

    let mut log_handler = LogHandler::new(&mut cli.out);
    log_handler.set_forge_loader(loader);
    let handler = StartHandler::new(args, log_handler);

    match installer.install(handler) {
        Ok(game) => launch(cli, args, game),
        Err(e) => ExitCode::from(log_forge_error(cli, &e, loader)),
    }

}

/// Resolve the `release`/`snapshot` aliases against the Mojang manifest.
fn latest_mojang_version(cli: &mut Cli, snapshot: bool) -> Option<String> {

    let manifest = match moj::Manifest::request(LogHandler::new(&mut cli.out)) {
        Ok(manifest) => manifest,
        Err(e) => {
            log_base_error(cli, &e);
            return None;
        }
    };

    let latest = if snapshot {
        manifest.latest_snapshot_name()
    } else {
        manifest.latest_release_name()
    };

    match latest {
        Some(version) => Some(version.to_string()),
        None => {
            cli.out.log("error_latest_version_not_found")
                .error("The Mojang manifest names no latest version for this channel");
            None
        }
    }

}

/// Push the shared command line options into a base installer.
fn configure_base(installer: &mut base::Installer, cli: &mut Cli, args: &StartArgs) -> bool {

    let Some(main_dir) = cli.main_dir() else {
        return false;
    };

    installer.set_main_dir(&main_dir);
    installer.set_mc_dir(cli.work_dir.clone().unwrap_or(main_dir));

    installer.set_strict_assets_check(args.strict_assets_check);
    installer.set_strict_libraries_check(args.strict_libraries_check);
    installer.set_strict_jvm_check(args.strict_jvm_check);

    match &args.jvm {
        Some(file) => installer.set_jvm_policy(JvmPolicy::Static(file.clone())),
        None => installer.set_jvm_policy(match args.jvm_policy {
            StartJvmPolicy::System => JvmPolicy::System,
            StartJvmPolicy::Mojang => JvmPolicy::Mojang,
            StartJvmPolicy::SystemMojang => JvmPolicy::SystemThenMojang,
            StartJvmPolicy::MojangSystem => JvmPolicy::MojangThenSystem,
        }),
    };

    true

}

/// Push the shared command line options into a Mojang installer.
fn configure_mojang(installer: &mut moj::Installer, cli: &mut Cli, args: &StartArgs) -> bool {

    if !configure_base(installer.base_mut(), cli, args) {
        return false;
    }

    match (&args.username, args.uuid) {
        (Some(username), Some(uuid)) => installer.set_auth_offline(uuid, username.clone()),
        (Some(username), None) => installer.set_auth_offline_username(username.clone()),
        (None, Some(uuid)) => installer.set_auth_offline_uuid(uuid),
        // The default identity, derived from the machine.
        (None, None) => installer,
    };

    installer.set_demo(args.demo);
    installer.set_disable_multiplayer(args.disable_multiplayer);
    installer.set_disable_chat(args.disable_chat);

    if let Some(StartResolution { width, height }) = args.resolution {
        installer.set_resolution(width, height);
    }

    if let Some(version) = &args.lwjgl {
        installer.set_fix_lwjgl(version.clone());
    }

    for exclude in &args.exclude_fetch {
        installer.add_fetch_exclude(match exclude.as_str() {
            "*" => FetchExclude::All,
            name => FetchExclude::Exact(name.to_string()),
        });
    }

    // The three --join-* options are exclusive (enforced by clap).
    let quick_play = if let Some(name) = &args.join_world {
        Some(QuickPlay::Singleplayer { name: name.clone() })
    } else if let Some(host) = &args.join_server {
        Some(QuickPlay::Multiplayer { host: host.clone(), port: args.join_server_port })
    } else {
        args.join_realms.as_ref().map(|id| QuickPlay::Realms { id: id.clone() })
    };

    if let Some(quick_play) = quick_play {
        installer.set_quick_play(quick_play);
    }

    true

}

/// Show what was assembled, then spawn the game unless this is a dry run.
fn launch(cli: &mut Cli, args: &StartArgs, game: Game) -> ExitCode {

    if !game.fixes.is_empty() {
        cli.out.log("applied_fixes")
            .args(game.fixes.iter())
            .info(format_args!("Applied fixes: {}", game.fixes.join(", ")));
    }

    {
        let command = game.command();
        let mut log = cli.out.log("command");
        log.arg(game.jvm_file.display());
        log.args(command.get_args().filter_map(|arg| arg.to_str()));
        log.info("Command:");
        log.additional(game.jvm_file.display());
        for arg in command.get_args().filter_map(|arg| arg.to_str()) {
            log.additional(arg);
        }
    }

    if args.dry {
        return ExitCode::SUCCESS;
    }

    let code = match run_to_completion(cli, &game) {
        Ok(code) => code,
        Err(e) => {
            cli.out.log("error_launch")
                .error("Failed to launch the game");
            log_any_error(cli, &e);
            ExitCode::from(EXIT_GAME_FAILURE)
        }
    };

    // The natives directory is scoped to this run.
    let _ = std::fs::remove_dir_all(&game.bin_dir);

    code

}

/// Spawn the game and wait for it, through the shared slot so Ctrl-C can kill it.
fn run_to_completion(cli: &mut Cli, game: &Game) -> std::io::Result<ExitCode> {

    cli.out.log("launching")
        .pending("Launching...");

    let child = game.spawn()?;

    cli.out.log("launched")
        .arg(child.id())
        .success("Launched");

    *RUNNING_GAME.lock().unwrap() = Some(child);

    let status = loop {

        std::thread::sleep(Duration::from_millis(100));

        let mut slot = RUNNING_GAME.lock().unwrap();
        let Some(child) = slot.as_mut() else {
            // Taken by the Ctrl-C handler.
            return Ok(ExitCode::SUCCESS);
        };

        if let Some(status) = child.try_wait()? {
            slot.take();
            break status;
        }

    };

    let code = status.code().unwrap_or_default();
    cli.out.log("terminated")
        .arg(code)
        .info(format_args!("Terminated: {code}"));

    Ok(if status.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_GAME_FAILURE)
    })

}

/// Handler stacking the library filters of the command line on top of the logs.
struct StartHandler<'a> {
    args: &'a StartArgs,
    logs: LogHandler<'a>,
}

impl<'a> StartHandler<'a> {

    fn new(args: &'a StartArgs, logs: LogHandler<'a>) -> Self {
        Self { args, logs }
    }

    fn filter(&mut self, event: &mut base::Event) {
        match event {
            base::Event::FilterLibraries { libraries } => {
                if !self.args.exclude_lib.is_empty() {
                    libraries.retain(|library| {
                        !self.args.exclude_lib.iter().any(|pattern| pattern.matches(&library.name))
                    });
                }
            }
            base::Event::FilterLibrariesFiles { natives_files, .. } => {
                natives_files.extend_from_slice(&self.args.include_bin);
            }
            _ => {}
        }
    }

}

impl base::Handler for StartHandler<'_> {
    fn on_event(&mut self, mut event: base::Event) {
        self.filter(&mut event);
        base::Handler::on_event(&mut self.logs, event);
    }
}

impl moj::Handler for StartHandler<'_> {
    fn on_event(&mut self, mut event: moj::Event) {
        if let moj::Event::Base(event) = &mut event {
            self.filter(event);
        }
        moj::Handler::on_event(&mut self.logs, event);
    }
}

impl fabric::Handler for StartHandler<'_> {
    fn on_event(&mut self, mut event: fabric::Event) {
        if let fabric::Event::Mojang(moj::Event::Base(event)) = &mut event {
            self.filter(event);
        }
        fabric::Handler::on_event(&mut self.logs, event);
    }
}

impl forge::Handler for StartHandler<'_> {
    fn on_event(&mut self, mut event: forge::Event) {
        if let forge::Event::Mojang(moj::Event::Base(event)) = &mut event {
            self.filter(event);
        }
        forge::Handler::on_event(&mut self.logs, event);
    }
}
