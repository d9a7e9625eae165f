pub mod cancel;
pub mod cli;
pub mod client;
pub mod fingerprint;
pub mod io_utils;
pub mod limiter;
pub mod logger;
pub mod reader;
pub mod render;
pub mod request;
pub mod run;
pub mod runner;
pub mod schema;
pub mod template;
pub mod validate;
pub mod validator;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csvfire", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate(args) => validate::execute(&args),
        Commands::Render(args) => render::execute(&args),
        Commands::Run(args) => run::execute(&args),
    }
}
