use anyhow::Result;
use clap::Parser;
use runwatch::cli;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr so JSON on stdout stays clean. RUST_LOG wins over -v.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "runwatch=warn",
        1 => "runwatch=debug",
        _ => "runwatch=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);
    let is_silent = args.silent;

    match cli::run(args).await {
        // Exit explicitly so a pending Ctrl-C listener cannot hold the runtime open.
        Ok(()) => std::process::exit(0),
        Err(e) => {
            if is_silent {
                println!("{}", e);
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
