// CourseCache - Local-folder course learning cache
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use course_cache::{
    CacheConfig, CourseView, CourseWorkspace, HandleReadiness, LocalDirectory, LocalOpener,
    NativeDetector, ProgressRecord,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "course-cache")]
#[command(about = "Course cache CLI - inspect and drive a local course library", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the database location
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pick the folder holding a course's videos
    Select {
        course: String,
        folder: PathBuf,
    },
    /// List a course's videos, scanning only if the folder changed
    Scan {
        course: String,
        /// Drop the cached scan first
        #[arg(long)]
        force: bool,
    },
    /// Show saved progress
    Progress {
        course: String,
        /// Single lecture, reconciled with the folder's progress file
        #[arg(short, long)]
        lecture: Option<String>,
    },
    /// Record a playback position
    Record {
        course: String,
        lecture: String,
        /// Position in seconds
        position: f64,
        /// Video length in seconds
        duration: f64,
    },
    /// Send queued progress to the sync endpoint
    Drain,
    /// Forget the folder picked for a course
    Forget {
        course: String,
    },
    /// Run SQLite's integrity check on the cache database
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CacheConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(database) = cli.database {
        config = config.with_database_path(database);
    }

    let workspace = CourseWorkspace::open(config, Arc::new(LocalOpener::new()), &NativeDetector).await?;
    let outcome = run(&workspace, cli.command).await;
    workspace.shutdown().await?;
    outcome
}

async fn run(workspace: &CourseWorkspace, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Select { course, folder } => {
            let folder = folder
                .canonicalize()
                .with_context(|| format!("resolving {}", folder.display()))?;
            let readiness = workspace
                .select_directory(&course, Arc::new(LocalDirectory::new(folder.clone())))
                .await?;

            match readiness {
                HandleReadiness::Ready(_) => println!("{} -> {}", course, folder.display()),
                HandleReadiness::NotSelected => bail!("folder was not saved"),
                HandleReadiness::NeedsRegrant { status, .. } => {
                    bail!("saved, but access is {:?}", status)
                }
            }
        }
        Commands::Scan { course, force } => {
            if force {
                workspace.metadata().invalidate(&course).await?;
            }

            match workspace.resume_course(&course).await? {
                CourseView::Ready {
                    videos, progress, ..
                } => {
                    for video in &videos {
                        let done = progress
                            .iter()
                            .find(|p| p.lecture_key == video.path)
                            .map(|p| format!("{:>5.1}%", p.progress_percent))
                            .unwrap_or_else(|| "    -".to_string());
                        println!("{}  {:>12}  {}", done, video.size, video.path);
                    }
                    println!("{} videos", videos.len());
                }
                CourseView::NotSelected => bail!("no folder selected for '{}'", course),
                CourseView::NeedsRegrant { status } => {
                    bail!("access to the folder of '{}' is {:?}; select it again", course, status)
                }
            }
        }
        Commands::Progress { course, lecture } => {
            // Attaches the folder so the portable file takes part
            workspace.resume_course(&course).await?;

            let records = match lecture {
                Some(lecture) => workspace
                    .progress()
                    .get(&course, &lecture)
                    .await?
                    .into_iter()
                    .collect(),
                None => workspace.progress().list(&course).await?,
            };
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Record {
            course,
            lecture,
            position,
            duration,
        } => {
            workspace.resume_course(&course).await?;
            let saved = workspace
                .progress()
                .save(ProgressRecord::from_position(course.clone(), lecture, position, duration))
                .await?;
            workspace.progress().flush(&course).await?;
            println!(
                "{}: {:.1}%{}",
                saved.lecture_key,
                saved.progress_percent,
                if saved.completed { " (completed)" } else { "" }
            );
        }
        Commands::Drain => {
            if workspace.sync().is_none() {
                println!("sync disabled (no device id or endpoint configured)");
                return Ok(());
            }
            let report = workspace.drain_sync().await?;
            println!("sent {}, remaining {}", report.sent, report.remaining);
            if let Some(error) = report.last_error {
                println!("stopped: {}", error);
            }
        }
        Commands::Forget { course } => {
            if workspace.forget(&course).await? {
                println!("forgot folder for '{}'", course);
            } else {
                println!("no folder stored for '{}'", course);
            }
        }
        Commands::Check => {
            if !workspace.check_integrity().await? {
                bail!("cache database failed its integrity check");
            }
            println!("cache database ok");
        }
    }

    Ok(())
}
