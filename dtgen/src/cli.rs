use std::path::PathBuf;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use simplelog::LevelFilter;

pub fn configure_cli() -> clap::App<'static, 'static> {
    let project_root = Arg::with_name("project-root")
        .short("r")
        .long("project-root")
        .takes_value(true)
        .value_name("DIR")
        .help("Directory that module dependencies are relative to [default: current directory]");

    let config = Arg::with_name("config")
        .value_name("CONFIG")
        .required(true)
        .index(1)
        .help("Module directory, or the path of its devicetree.yaml");

    App::new("dtgen")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Compiles a devicetree and its bindings into C device registration code")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .global(true)
                .help("Log every compilation step"),
        )
        .subcommand(
            SubCommand::with_name("compile")
                .about("Generate devicetree.c and devicetree.h for a module")
                .arg(config.clone())
                .arg(
                    Arg::with_name("output")
                        .value_name("OUTPUT")
                        .required(true)
                        .index(2)
                        .help("Directory the generated files are written to"),
                )
                .arg(project_root.clone())
                .arg(
                    Arg::with_name("allow-missing-includes")
                        .long("allow-missing-includes")
                        .help("Warn about binding includes that cannot be found instead of failing"),
                ),
        )
        .subcommand(
            SubCommand::with_name("deps")
                .about("List the direct dependencies of a module, one per line")
                .arg(config)
                .arg(project_root),
        )
}

pub fn get_log_level(args: &ArgMatches) -> LevelFilter {
    if args.is_present("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

pub fn get_project_root(args: &ArgMatches) -> PathBuf {
    args.value_of("project-root")
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
}
