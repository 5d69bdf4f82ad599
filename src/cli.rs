//! Command-line surface: `serve` runs the HTTP
//! facade alongside the scheduler workers, `check` validates configuration
//! without binding a socket, `admin counts` prints aggregate counts for a
//! tenant.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "autoscale-core")]
#[command(about = "Autoscaling control-plane core")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP facade and scheduler workers.
    Serve,
    /// Validate configuration and store connectivity, then exit.
    Check,
    /// Admin-only inspection commands.
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
pub enum AdminAction {
    /// Print aggregate group/policy/webhook counts for a tenant.
    Counts {
        #[arg(long)]
        tenant: String,
    },
}
