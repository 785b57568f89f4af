pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod filter;
pub mod notify;
pub mod render;
pub mod stats;
pub mod store;
pub mod task;
pub mod view;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting taskdeck"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.taskrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let datastore = Arc::new(
    datastore::DataStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open datastore at \
         {}",
        data_dir.display()
      )
    })?
  );

  let tz = datetime::resolve_timezone(
    cfg.get("timezone").as_deref()
  );
  let renderer =
    render::Renderer::new(&cfg, tz)?;
  let mut session =
    commands::Session::open(
      datastore,
      &cfg,
      tz,
      Arc::new(clock::SystemClock)
    )?;

  let command = cli.command.unwrap_or(
    cli::Command::List(
      cli::ListArgs::default()
    )
  );
  commands::dispatch(
    &mut session,
    &renderer,
    command
  )?;

  info!("done");
  Ok(())
}
