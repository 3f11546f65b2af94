#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
)]
#![warn(rust_2018_idioms)]

use anyhow::{Context, Result as AResult};
use macloader::{idc, name, Executable, LoadOptions};
use pico_args::Arguments;
use std::{env, io, path::PathBuf, process::exit};

fn exit_usage() -> ! {
    eprintln!(
        include_str!("dump.usage"),
        env::args().next().unwrap_or_else(|| "macdump".to_string())
    );
    exit(1);
}

fn main() -> AResult<()> {
    eprintln!("{} memory dump tool", name(true));

    let mut args = Arguments::from_env();
    if args.contains("--help") {
        exit_usage();
    }
    let verbose = args.contains("--verbose");
    let write_idc = args.contains("--idc");
    let lenient = args.contains("--lenient");
    let free = args.free()?;

    let (input, output) = match free.as_slice() {
        [input, output] => (PathBuf::from(input), PathBuf::from(output)),
        _ => {
            eprintln!("Expected an input executable and an output dump file");
            exit_usage();
        }
    };

    let mut sink: Box<dyn io::Write> = if verbose {
        Box::new(io::stdout())
    } else {
        Box::new(io::sink())
    };

    let options = LoadOptions {
        lenient_static_data: lenient,
    };
    let mut executable = Executable::open_with(&input, options)
        .with_context(|| format!("Could not load executable {}", input.display()))?;

    if verbose {
        executable.output_info(&mut *sink)?;
    }

    executable
        .write_memory_dump(&output, &mut *sink)
        .with_context(|| format!("Could not write memory dump {}", output.display()))?;

    if write_idc {
        idc::write_jump_mark_table_script(&executable, &output)
            .context("Could not write IDC script")?;
    }

    Ok(())
}
