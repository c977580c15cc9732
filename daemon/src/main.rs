mod config;
mod error;
mod extcon;
mod hw;
mod runtime;

use std::env;
use std::process::ExitCode;

use config::{USAGE, parse_args};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match parse_args(env::args().skip(1)) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            eprintln!("{USAGE}");
            return error.exit_code();
        }
    };

    match runtime::start(config) {
        Ok(never) => match never {},
        Err(error) => {
            log::error!("{error}");
            error.exit_code()
        }
    }
}
