use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::{AttendanceRecord, DetectionResult, Identity, RegisterOutcome};
use std::path::{Path, PathBuf};

// `#[zbus::proxy]` generates `AttendanceProxy` (async) and `AttendanceProxyBlocking`.
#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn process_frame(&self, session: &str, frame: &[u8]) -> zbus::Result<String>;
    async fn end_session(&self, session: &str) -> zbus::Result<bool>;
    async fn identify(&self, frame: &[u8]) -> zbus::Result<String>;
    async fn register(&self, identity: &str, image: &[u8]) -> zbus::Result<String>;
    async fn list_attendance(&self, day: &str) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person with a reference photo
    Register {
        /// Reference image (JPEG or PNG)
        image: PathBuf,
        #[arg(long)]
        roll_no: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        department: String,
        #[arg(long, default_value = "")]
        classroom: String,
        /// Date of birth, YYYY-MM-DD
        #[arg(long)]
        dob: Option<NaiveDate>,
        #[arg(long, default_value = "")]
        contact: String,
    },
    /// Identify faces in an image without logging attendance
    Identify { image: PathBuf },
    /// Stream a directory of frames, in file name order, through one session
    Feed {
        dir: PathBuf,
        /// Session id (default: derived from this process)
        #[arg(long)]
        session: Option<String>,
    },
    /// List attendance records
    Attendance {
        /// Only this day, YYYY-MM-DD
        #[arg(long)]
        day: Option<NaiveDate>,
    },
    /// List registered identities
    Identities,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await?
    } else {
        zbus::Connection::session().await?
    };
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("connecting to rollcalld")?;

    match cli.command {
        Commands::Register {
            image,
            roll_no,
            name,
            department,
            classroom,
            dob,
            contact,
        } => {
            let identity = Identity {
                roll_no,
                name,
                department,
                classroom,
                date_of_birth: dob,
                contact,
            };
            let bytes = read(&image)?;
            let reply = proxy
                .register(&serde_json::to_string(&identity)?, &bytes)
                .await?;
            let outcome: RegisterOutcome = serde_json::from_str(&reply)?;
            match outcome {
                RegisterOutcome::Registered { roll_no, profiles } => {
                    println!("Registered {roll_no} ({profiles} profiles in gallery)");
                }
                RegisterOutcome::Conflict { existing } => {
                    bail!("face is already registered as {existing}");
                }
                RegisterOutcome::InvalidImage { reason } => {
                    bail!("{}: {reason}", image.display());
                }
            }
        }
        Commands::Identify { image } => {
            let reply = proxy.identify(&read(&image)?).await?;
            let results: Vec<DetectionResult> = serde_json::from_str(&reply)?;
            if results.is_empty() {
                println!("No faces found");
            }
            for r in &results {
                println!("{}", describe(r));
            }
        }
        Commands::Feed { dir, session } => {
            let session = session.unwrap_or_else(|| format!("cli-{}", std::process::id()));
            let frames = frame_files(&dir)?;
            tracing::info!(session = %session, frames = frames.len(), "streaming frames");
            let mut logged = 0usize;
            for path in &frames {
                let reply = proxy.process_frame(&session, &read(path)?).await?;
                let report: serde_json::Value = serde_json::from_str(&reply)?;
                for entry in report["logs"].as_array().into_iter().flatten() {
                    let status = entry["status"].as_str().unwrap_or("?");
                    if status == "NEW_LOG" {
                        logged += 1;
                    }
                    println!(
                        "{}: {} {}",
                        path.display(),
                        entry["roll_no"].as_str().unwrap_or("?"),
                        status
                    );
                }
            }
            proxy.end_session(&session).await?;
            println!("{} frames, {logged} new attendance records", frames.len());
        }
        Commands::Attendance { day } => {
            let day = day.map(|d| d.to_string()).unwrap_or_default();
            let records: Vec<AttendanceRecord> =
                serde_json::from_str(&proxy.list_attendance(&day).await?)?;
            if records.is_empty() {
                println!("No attendance records");
            }
            for r in &records {
                println!(
                    "{}  {:<12} {:<24} {:<12} {}",
                    r.logged_at, r.roll_no, r.name, r.department, r.classroom
                );
            }
        }
        Commands::Identities => {
            let identities: Vec<Identity> =
                serde_json::from_str(&proxy.list_identities().await?)?;
            if identities.is_empty() {
                println!("No identities registered");
            }
            for i in &identities {
                println!("{:<12} {:<24} {:<12} {}", i.roll_no, i.name, i.department, i.classroom);
            }
        }
        Commands::Status => {
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

/// Image files directly inside `dir`, sorted by name.
fn frame_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        })
        .collect();
    frames.sort();
    Ok(frames)
}

fn describe(r: &DetectionResult) -> String {
    let [top, right, bottom, left] = r.location;
    let score = r
        .score
        .map(|s| format!(" score={s:.1}"))
        .unwrap_or_default();
    format!(
        "{} at ({left},{top})-({right},{bottom}) eyes={}{score}",
        r.label(),
        r.eyes.len()
    )
}
