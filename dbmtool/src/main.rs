//! Command-line front end for dbmbridge stores.

mod args;

use std::process::ExitCode;

use clap::Parser;
use dbmbridge::{AsyncDbm, Context, Dbm, File, Params, Result, Status, StatusCode};
use tracing::{debug, error, info};

use crate::args::{Cli, Command};

fn open_file(ctx: &Context, path: &str, writable: bool) -> Result<File> {
    let mut file = File::new(ctx);
    let params = if writable {
        Params::parse("truncate=true")
    } else {
        Params::new()
    };
    file.open(path, writable, &params)?.or_die()?;
    Ok(file)
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = Context::default();
    let mut dbm = Dbm::new(&ctx);
    dbm.open(&cli.path, cli.command.is_writing(), &cli.params)?
        .or_die()?;
    debug!(store = %dbm, command = cli.command.name(), "store ready");

    match cli.command {
        Command::Set { key, value } => dbm.set(key, value, true)?.or_die()?,
        Command::Get { key } => {
            let value = dbm.get(key)?.into_result()?;
            println!("{}", String::from_utf8_lossy(&value.unwrap_or_default()));
        }
        Command::Remove { key } => dbm.remove(key)?.or_die()?,
        Command::Incr { key, delta } => {
            let current = dbm.increment(key, delta, 0)?.into_result()?;
            println!("{}", current.unwrap_or_default());
        }
        Command::List => {
            let mut iter = dbm.make_iterator()?;
            iter.first()?.or_die()?;
            loop {
                let record = iter.step()?;
                let Some((key, value)) = record.value else {
                    if record.status != StatusCode::NotFoundError {
                        record.status.or_die()?;
                    }
                    break;
                };
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Command::Search { mode, pattern } => {
            for key in dbm.search(mode.as_str(), pattern, 0)? {
                println!("{}", String::from_utf8_lossy(&key));
            }
        }
        Command::Export { file } => {
            let mut file = open_file(&ctx, &file, true)?;
            dbm.export_to_flat_records(&file)?.or_die()?;
            file.close()?.or_die()?;
        }
        Command::Import { file } => {
            let mut file = open_file(&ctx, &file, false)?;
            dbm.import_from_flat_records(&file)?.or_die()?;
            file.close()?.or_die()?;
        }
        Command::Keys { file } => {
            let mut file = open_file(&ctx, &file, true)?;
            dbm.export_keys_as_lines(&file)?.or_die()?;
            file.close()?.or_die()?;
        }
        Command::Inspect => {
            for (name, value) in dbm.inspect()? {
                println!("{name}={value}");
            }
        }
        Command::Batch { records } => {
            let mut engine = AsyncDbm::new(&dbm, cli.workers)?;
            let mut futures = Vec::with_capacity(records.len());
            for (key, value) in &records {
                futures.push(engine.set(key, value, true)?);
            }
            engine.destruct()?;
            let mut status = Status::success();
            for future in futures {
                status |= future.await?;
            }
            status.or_die()?;
            info!(count = records.len(), "batch stored");
        }
    }

    dbm.close()?.or_die()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}
