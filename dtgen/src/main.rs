mod cli;

use std::{ops::Range, path::Path, process};

use anyhow::Context;
use ariadne::{sources, Label, Report, ReportKind};
use clap::ArgMatches;
use log::debug;
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

use cli::*;
use dtgen::Options;

fn main() {
    let matches = configure_cli().get_matches();

    let (command, args) = match matches.subcommand() {
        (command, Some(args)) => (command, args),
        _ => {
            eprintln!("{}", matches.usage());
            process::exit(2);
        }
    };

    configure_logging(get_log_level(args));

    if let Err(err) = run(command, args) {
        if let Some(dtgen::Error::Syntax { path, text, source }) =
            err.downcast_ref::<dtgen::Error>()
        {
            report_syntax_error(path, text, source);
        }

        eprintln!("Error: {:?}", err);
        process::exit(1);
    }
}

fn configure_logging(level: LevelFilter) {
    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .build();

    if let Err(err) = TermLogger::init(level, config, TerminalMode::Mixed, ColorChoice::Auto) {
        eprintln!("Failed to configure logger: {}", err);
    }
}

fn run(command: &str, args: &ArgMatches) -> anyhow::Result<()> {
    // Both arguments are required by every subcommand
    let config = Path::new(args.value_of("config").unwrap_or_default());
    let project_root = get_project_root(args);

    match command {
        "compile" => {
            let output = Path::new(args.value_of("output").unwrap_or_default());
            let options = Options {
                project_root,
                allow_missing_includes: args.is_present("allow-missing-includes"),
            };
            debug!("{:?}", options);

            dtgen::compile(config, output, &options)
                .with_context(|| format!("failed to compile {}", config.display()))?;
        }
        "deps" => {
            let names = dtgen::dependencies(config, &project_root).with_context(|| {
                format!("failed to resolve dependencies of {}", config.display())
            })?;

            for name in names {
                println!("{}", name);
            }
        }
        other => anyhow::bail!("unknown command `{}`", other),
    }

    Ok(())
}

/// Print a syntax error along with the offending source line.
fn report_syntax_error(path: &Path, text: &str, err: &dts_parser::Error) {
    let name = path.display().to_string();
    let span = char_span(text, err.offset);

    let report = Report::build(ReportKind::Error, name.clone(), span.start)
        .with_message(&err.message)
        .with_label(Label::new((name.clone(), span)).with_message(format!("found `{}`", err.found)))
        .finish()
        .eprint(sources([(name, text.to_string())]));

    if let Err(err) = report {
        debug!("Failed to render report: {}", err);
    }
}

/// The one-character span at byte `offset`, in characters as ariadne counts them.
///
/// Offsets past the end point at the last character.
fn char_span(text: &str, offset: usize) -> Range<usize> {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }

    let len = text.chars().count();
    let start = text[..offset].chars().count().min(len.saturating_sub(1));

    start..(start + 1).min(len)
}
