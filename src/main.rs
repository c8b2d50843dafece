use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;
use loxi::experts::{LocalExpertOI, OiConfigFile};
use loxi::LOXI_LOG;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Json file holding `oi_config` and `run_kwargs`
    #[arg(short, long)]
    config: PathBuf,
    /// Results store, overrides `run_kwargs.store_path`
    #[arg(short, long)]
    store: Option<PathBuf>,
    /// Do not check the configuration against the store one
    #[arg(long, default_value_t = false)]
    no_check: bool,
}

fn main() -> Result<()> {
    let env = Env::new().filter_or(LOXI_LOG, "info");
    let mut builder = Builder::from_env(env);
    let builder = builder.target(env_logger::Target::Stdout);
    builder.try_init().ok();

    let args = Args::parse();
    let OiConfigFile {
        oi_config,
        mut run_kwargs,
    } = OiConfigFile::from_file(&args.config)
        .with_context(|| format!("cannot read configuration {:?}", args.config))?;
    if let Some(store) = args.store {
        run_kwargs.store_path = store;
    }
    if args.no_check {
        run_kwargs.check_config_compatible = false;
    }

    let oi = LocalExpertOI::new(oi_config).context("cannot set up local experts")?;
    let summary = oi
        .run(&run_kwargs)
        .with_context(|| format!("run failed, results in {:?}", run_kwargs.store_path))?;
    info!("{}", summary);
    if !summary.unflushed.is_empty() || !summary.unrecorded.is_empty() {
        anyhow::bail!(
            "{} locations have results not written, {} are not recorded as processed",
            summary.unflushed.len(),
            summary.unrecorded.len()
        );
    }
    Ok(())
}
