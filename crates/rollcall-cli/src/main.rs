use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

// `#[zbus::proxy]` generates `AttendanceProxy` for the daemon interface.
#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn status(&self) -> zbus::Result<String>;
    async fn absent(&self) -> zbus::Result<Vec<String>>;
    async fn report(&self) -> zbus::Result<String>;
    async fn clear(&self) -> zbus::Result<()>;
    async fn submit_enrollment(&self, name: &str) -> zbus::Result<()>;
    async fn cancel_enrollment(&self) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// List roster members not yet marked present
    Absent,
    /// Write the attendance report to a file
    Report {
        /// Output path (default: Attendance-<date>.txt)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Clear the attendance ledger
    Clear,
    /// Name the pending unknown-face capture and enroll it
    Submit {
        /// Name for the captured face
        name: String,
    },
    /// Discard the pending unknown-face capture
    Cancel,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to session bus — is rollcalld running?")?;
    let proxy = AttendanceProxy::new(&conn).await?;

    match cli.command {
        Commands::Status => {
            println!("{}", proxy.status().await?);
        }
        Commands::Absent => {
            let absent = proxy.absent().await?;
            if absent.is_empty() {
                println!("🎉 Everyone is present!");
            } else {
                for name in absent {
                    println!("{name}");
                }
            }
        }
        Commands::Report { output } => {
            let report = proxy.report().await?;
            let path = output.unwrap_or_else(|| {
                PathBuf::from(format!(
                    "Attendance-{}.txt",
                    chrono::Local::now().format("%d-%m-%Y")
                ))
            });
            std::fs::write(&path, report)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        Commands::Clear => {
            proxy.clear().await?;
            println!("Attendance cleared");
        }
        Commands::Submit { name } => {
            proxy.submit_enrollment(&name).await?;
            println!("✅ Face registered successfully");
        }
        Commands::Cancel => {
            if proxy.cancel_enrollment().await? {
                println!("Pending capture discarded");
            } else {
                println!("Nothing to cancel");
            }
        }
    }

    Ok(())
}
