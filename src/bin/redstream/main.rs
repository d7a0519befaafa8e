use anyhow::Result;
use options::{Command, LogFormat};
use redstream::harness::ModuleRunner;
use redstream::module::storefront::Storefront;
use structopt::StructOpt;
use tracing::info;

mod options;

#[tokio::main]
async fn main() -> Result<()> {
    let (command, runner) = init()?;

    let success = match command {
        Command::Storefront(options) => runner.run(Storefront::new(options)).await,
    };

    if !success {
        anyhow::bail!("module terminated unsuccessfully");
    }

    Ok(())
}

fn init() -> Result<(Command, ModuleRunner)> {
    let options = options::MainOptions::from_args();

    let formatter = tracing_subscriber::fmt().with_env_filter(options.log);

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
        LogFormat::Json => formatter.json().init(),
    };

    info!("redstream {}", env!("CARGO_PKG_VERSION"));

    Ok((options.command, ModuleRunner::default()))
}
