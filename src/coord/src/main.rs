use clap::{Parser, Subcommand};

use common::telemetry::init_telemetry;

use coord::command::gc::{GcArgs, gc};
use coord::command::serve::{ServeArgs, serve};
use coord::command::verify::{VerifyArgs, verify};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
enum Cmd {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Check every chunk replica referenced by the index (coordinator stopped)
    Verify(VerifyArgs),
    /// Delete chunks no file references (coordinator stopped)
    Gc(GcArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry("coord");

    let args = Args::parse();

    match args.cmd {
        Cmd::Serve(serve_args) => {
            serve(serve_args).await?;
        }
        Cmd::Verify(verify_args) => {
            let report = verify(verify_args).await?;
            if report.lost > 0 {
                anyhow::bail!("{} chunk(s) lost on every replica", report.lost);
            }
        }
        Cmd::Gc(gc_args) => {
            gc(gc_args).await?;
        }
    }

    Ok(())
}
