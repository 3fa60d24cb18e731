use clap::Parser;

/// Count Sentinel CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "count-sentinel",
    version,
    about = "Count reconciliation and alert engine for surgical instrument tracking"
)]
pub struct Cli {
    /// SQLite database URL
    #[arg(long)]
    pub database_url: Option<String>,

    /// Address the HTTP server binds to
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// Days to keep resolved alerts before cleanup
    #[arg(long)]
    pub retention_days: Option<i64>,
}
