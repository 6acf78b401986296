pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod import;
pub mod render;
pub mod session;
pub mod table;
pub mod task;

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
    cli.rcfile.as_deref()
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

  let session =
    session::Session::open(&data_dir)
      .with_context(|| {
        format!(
          "failed to open session \
           store at {}",
          data_dir.display()
        )
      })?;

  let backend = Arc::new(
    api::HttpBackend::new(
      &cfg.api_settings()?,
      session.bearer()
    )?
  );
  let renderer =
    render::Renderer::new(&cfg)?;

  let ctx = commands::Context {
    cfg,
    session,
    backend,
    renderer
  };

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async \
         runtime"
      )?;
  runtime.block_on(
    commands::dispatch(
      &ctx,
      cli.command
    )
  )?;

  info!("done");
  Ok(())
}
