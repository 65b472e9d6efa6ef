use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Result, bail};
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use futures::StreamExt;
use iocraft::prelude::*;
use tokio::sync::watch;
use upchunk::{SessionRegistry, UploadClient, UploadEvent, UploadSession, UploadState};
use url::Url;

use crate::ui::{ConfigHeader, ErrorMessage, InputPrompt, SuccessMessage, UploadView};

mod config;
mod ui;

const DEFAULT_SERVER_URL: &str = "http://localhost:8000";

#[derive(Parser)]
#[command(name = "upchunk")]
#[command(version)]
#[command(about = "A tool for resumable chunked file uploads")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files in 1 MiB chunks, resuming partial uploads
    Upload {
        #[arg(value_hint = ValueHint::FilePath, num_args = 1.., required = true)]
        files: Vec<PathBuf>,
        /// Upload server base URL (overrides configuration)
        #[arg(short, long)]
        server: Option<Url>,
    },
    /// Show how many bytes the server already holds for a file
    Status {
        filename: String,
        /// Upload server base URL (overrides configuration)
        #[arg(short, long)]
        server: Option<Url>,
    },
    /// Configure upchunk interactively
    Config,
}

fn main() -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let _rt_guard = rt.enter();
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    let cli = Cli::parse();

    rt.block_on(async {
        match cli.command {
            Commands::Config => interactive_config(),
            Commands::Upload { files, server } => {
                let client = UploadClient::new(server_url(server)?);
                upload_files(&client, files).await
            }
            Commands::Status { filename, server } => {
                let client = UploadClient::new(server_url(server)?);
                show_status(&client, &filename).await
            }
        }
    })
}

fn server_url(flag: Option<Url>) -> Result<Url> {
    match flag {
        Some(url) => Ok(url),
        None => Ok(config::read_config()?.server_url),
    }
}

async fn upload_files(client: &UploadClient, files: Vec<PathBuf>) -> Result<()> {
    let mut registry = SessionRegistry::new();
    let mut failed = 0usize;

    for path in files {
        if upload_one(client, &mut registry, &path).await == UploadState::Failed {
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{failed} upload(s) failed");
    }
    Ok(())
}

async fn upload_one(
    client: &UploadClient,
    registry: &mut SessionRegistry,
    path: &Path,
) -> UploadState {
    let file_name = match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => {
            element!(ErrorMessage(message: format!("{}: not a file", path.display()))).print();
            return UploadState::Failed;
        }
    };

    let session = registry.open(&file_name);
    let started = Instant::now();

    let ctrl_c_session = session.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_session.cancel();
        }
    });

    let outcome = run_transfer(client, session, path, &file_name).await;
    ctrl_c.abort();
    registry.remove(&file_name);

    match outcome {
        Ok(UploadState::Canceled) => {
            println!("{file_name}: Upload canceled.");
            UploadState::Canceled
        }
        Ok(state) => {
            let elapsed = Duration::from_secs(started.elapsed().as_secs());
            element!(SuccessMessage(
                message: format!(
                    "{file_name}: Upload complete! ({})",
                    humantime::format_duration(elapsed)
                )
            ))
            .print();
            state
        }
        Err(e) => {
            element!(ErrorMessage(message: format!("{file_name}: Upload failed. ({e:#})"))).print();
            UploadState::Failed
        }
    }
}

async fn run_transfer(
    client: &UploadClient,
    session: Arc<UploadSession>,
    path: &Path,
    file_name: &str,
) -> Result<UploadState> {
    let mut stream = client.upload_file(session.clone(), path)?;
    let (tx, rx) = watch::channel(0.0f32);

    let process_stream = async {
        let mut state = UploadState::Uploading;
        while let Some(event) = stream.next().await {
            match event? {
                UploadEvent::Progress(p) => {
                    let _ = tx.send(p.percent() as f32);
                }
                UploadEvent::Complete => {
                    state = UploadState::Complete;
                    break;
                }
                UploadEvent::Canceled => {
                    state = UploadState::Canceled;
                    break;
                }
            }
        }
        if state == UploadState::Uploading {
            bail!("Upload stream ended without a terminal event");
        }
        Ok::<_, anyhow::Error>(state)
    };

    let mut view = element!(UploadView(
        file_name: file_name.to_string(),
        progress: Some(rx),
        session: Some(session),
    ));

    let state = tokio::select! {
        result = process_stream => result?,
        _ = view.render_loop() => {
            unreachable!("render_loop should not terminate")
        }
    };

    Ok(state)
}

async fn show_status(client: &UploadClient, filename: &str) -> Result<()> {
    let status = client.upload_status(filename).await?;
    println!("{filename}: {} bytes uploaded", status.uploaded_bytes);
    Ok(())
}

fn read_input(prompt: &str, default: Option<&str>, description: Option<&str>) -> Result<String> {
    element! {
        InputPrompt(
            prompt: prompt.to_string(),
            default: default.map(|s| s.to_string()),
            description: description.map(|s| s.to_string())
        )
    }
    .print();

    print!("> ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_string();

    if input.is_empty() {
        if let Some(def) = default {
            Ok(def.to_string())
        } else {
            Ok(input)
        }
    } else {
        Ok(input)
    }
}

fn interactive_config() -> Result<()> {
    element!(ConfigHeader()).print();

    let server_url = loop {
        let url_str = read_input(
            "Server URL",
            Some(DEFAULT_SERVER_URL),
            Some("The base URL of the chunked-upload server"),
        )?;

        match Url::parse(&url_str) {
            Ok(url) => break url,
            Err(e) => {
                element!(ErrorMessage(message: format!("Invalid URL: {}", e))).print();
                println!();
            }
        }
    };

    config::write_config(config::ConfigFile {
        server_url: Some(server_url),
    })?;

    element!(SuccessMessage(message: "Configuration complete!".to_string())).print();

    Ok(())
}
