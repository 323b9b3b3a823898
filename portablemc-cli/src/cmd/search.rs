//! Implementation of the 'search' command.

use std::process::ExitCode;
use std::io;

use chrono::Utc;

use portablemc::base::VersionChannel;
use portablemc::{fabric, forge, moj};

use crate::parse::{SearchArgs, SearchKind};
use crate::format::{Ago, DATE_FORMAT};

use super::{Cli, LogHandler, EXIT_FAILURE, log_base_error, log_fabric_error, log_forge_error};


pub fn search(cli: &mut Cli, args: &SearchArgs) -> ExitCode {
    match args.kind {
        SearchKind::Mojang => search_mojang(cli, args),
        SearchKind::Local => search_local(cli, args),
        SearchKind::Fabric => search_fabric(cli, args, fabric::Loader::Fabric),
        SearchKind::Quilt => search_fabric(cli, args, fabric::Loader::Quilt),
        SearchKind::Legacyfabric => search_fabric(cli, args, fabric::Loader::LegacyFabric),
        SearchKind::Babric => search_fabric(cli, args, fabric::Loader::Babric),
        SearchKind::Forge => search_forge(cli, args, forge::Loader::Forge),
        SearchKind::Neoforge => search_forge(cli, args, forge::Loader::NeoForge),
    }
}

fn search_mojang(cli: &mut Cli, args: &SearchArgs) -> ExitCode {

    let manifest = match moj::Manifest::request(LogHandler::new(&mut cli.out)) {
        Ok(manifest) => manifest,
        Err(e) => return ExitCode::from(log_base_error(cli, &e)),
    };

    let now = Utc::now().fixed_offset();

    for version in manifest.iter() {

        if !args.matches(version.name()) {
            continue;
        }

        let channel = match version.channel() {
            VersionChannel::Release => "release",
            VersionChannel::Snapshot => "snapshot",
            VersionChannel::Beta => "beta",
            VersionChannel::Alpha => "alpha",
        };

        let flag = if Some(version.name()) == manifest.latest_release_name() {
            "latest-release"
        } else if Some(version.name()) == manifest.latest_snapshot_name() {
            "latest-snapshot"
        } else {
            ""
        };

        let released = version.release_time();

        cli.out.log("version")
            .arg(version.name())
            .arg(channel)
            .arg(released.to_rfc3339())
            .arg(flag)
            .success(format_args!("{:<30}{channel:<10}{:<26}{} {flag}",
                version.name(),
                released.format(DATE_FORMAT),
                Ago(now - *released)));

    }

    ExitCode::SUCCESS

}

fn search_local(cli: &mut Cli, args: &SearchArgs) -> ExitCode {

    let Some(main_dir) = cli.main_dir() else {
        return ExitCode::from(EXIT_FAILURE);
    };

    let versions_dir = main_dir.join("versions");

    let entries = match std::fs::read_dir(&versions_dir) {
        Ok(entries) => entries,
        // Nothing installed yet, an empty listing.
        Err(e) if e.kind() == io::ErrorKind::NotFound => return ExitCode::SUCCESS,
        Err(e) => {
            cli.out.log("error_io")
                .arg(&e)
                .error(format_args!("Cannot list the versions directory: {e}"));
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let mut names = entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        // A version exists once its descriptor does.
        .filter(|name| versions_dir.join(name).join(format!("{name}.json")).is_file())
        .filter(|name| args.matches(name))
        .collect::<Vec<_>>();

    names.sort();

    for name in names {
        cli.out.log("version")
            .arg(&name)
            .success(&name);
    }

    ExitCode::SUCCESS

}

fn search_fabric(cli: &mut Cli, args: &SearchArgs, loader: fabric::Loader) -> ExitCode {

    let releases = match fabric::request_loader_versions(loader, None) {
        Ok(releases) => releases,
        Err(e) => return ExitCode::from(log_fabric_error(cli, &e, loader)),
    };

    for release in releases {

        if !args.matches(&release.name) {
            continue;
        }

        let channel = if release.stable { "stable" } else { "unstable" };

        cli.out.log("version")
            .arg(&release.name)
            .arg(channel)
            .success(format_args!("{:<30}{channel}", release.name));

    }

    ExitCode::SUCCESS

}

fn search_forge(cli: &mut Cli, args: &SearchArgs, loader: forge::Loader) -> ExitCode {

    let versions = match forge::request_versions(loader) {
        Ok(versions) => versions,
        Err(e) => return ExitCode::from(log_forge_error(cli, &e, loader)),
    };

    // The repository lists oldest first, the terminal is more useful the other
    // way around.
    for version in versions.iter().rev() {

        if !args.matches(version) {
            continue;
        }

        cli.out.log("version")
            .arg(version)
            .success(version);

    }

    ExitCode::SUCCESS

}
