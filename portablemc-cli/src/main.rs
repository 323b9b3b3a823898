//! Command line front-end of the launcher.

pub mod parse;
pub mod format;
pub mod output;
pub mod cmd;

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use crate::output::{LogLevel, Output};
use crate::parse::{CliArgs, CliCmd, CliOutput};


fn main() -> ExitCode {

    let args = CliArgs::parse();

    if let Some(seconds) = args.timeout {
        portablemc::set_http_timeout(Duration::from_secs_f32(seconds.max(0.0)));
    }

    let level = if args.verbose > 0 { LogLevel::Info } else { LogLevel::Pending };
    let out = match args.output {
        CliOutput::Human => Output::human(level),
        CliOutput::HumanColor => Output::human_color(level),
        CliOutput::Machine => Output::tab_separated(),
    };

    let mut cli = cmd::Cli {
        out,
        main_dir: args.main_dir,
        work_dir: args.work_dir,
    };

    match args.cmd {
        CliCmd::Start(args) => cmd::start(&mut cli, &args),
        CliCmd::Search(args) => cmd::search(&mut cli, &args),
        CliCmd::Show(args) => cmd::show(&mut cli, &args.what),
    }

}
