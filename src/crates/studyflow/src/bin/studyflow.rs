//! studyflow CLI
//!
//! Main entry point for the studyflow command-line tool.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use studyflow::{build_backend, load_config, logging, version_info, StudyService};
use studyflow_core::{ImageRef, ProcessOutput, ProcessStatus};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "studyflow")]
#[command(about = "studyflow - guided study sessions with review checkpoints", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file overriding the user and project files
    #[arg(short, long, global = true, env = "STUDYFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `studyflow_core=debug`
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session: every line is sent to the thread
    Chat {
        /// Thread to continue (a new one is created otherwise)
        #[arg(short, long)]
        thread: Option<String>,
        /// Image of notes to attach to the first message
        #[arg(short, long)]
        image: Vec<String>,
    },

    /// Send a single message and print the reply
    Ask {
        /// Question on a new thread, feedback on a suspended one
        text: String,
        #[arg(short, long)]
        thread: Option<String>,
        #[arg(short, long)]
        image: Vec<String>,
    },

    /// Show the persisted state of a thread
    State {
        thread: String,
        /// Output format: text (default), json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete a thread and everything recorded for it
    Delete { thread: String },

    /// List persisted threads
    Threads,

    /// Continue threads whose last run stopped between stages
    Recover,

    /// Check that the completion backend is reachable
    Check,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())
        .await
        .context("failed to load configuration")?;
    logging::init(&config.logging, cli.log_level.as_deref())?;

    match cli.command {
        Commands::Version => {
            println!("{}", version_info());
            Ok(())
        }
        Commands::Check => {
            let backend = build_backend(&config.llm)?;
            let utils = backend.utils;
            println!("Provider: {}", utils.provider());
            println!("Model:    {}", utils.current_model());

            if !utils.ping().await? {
                println!("✗ Backend unreachable at {}", config.llm.base_url());
                return Err(anyhow::anyhow!("completion backend unreachable"));
            }
            println!("✓ Backend reachable");

            let models = utils.fetch_models().await?;
            println!();
            println!("Available models:");
            for model in &models {
                let marker = if model.id == utils.current_model() { "*" } else { " " };
                match &model.detail {
                    Some(detail) => println!(" {} {:<40} {}", marker, model.id, detail),
                    None => println!(" {} {}", marker, model.id),
                }
            }
            Ok(())
        }
        Commands::Ask { text, thread, image } => {
            let service = StudyService::from_config(&config).await?;
            let output = service.submit(thread.as_deref(), &text, images(image)).await?;
            print_output(&output);
            Ok(())
        }
        Commands::Chat { thread, image } => {
            let service = StudyService::from_config(&config).await?;
            chat(&service, thread, images(image)).await
        }
        Commands::State { thread, format } => {
            let service = StudyService::from_config(&config).await?;
            let snapshot = service.state(&thread).await?;

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                return Ok(());
            }

            println!("Thread:   {}", snapshot.thread_id);
            println!("Session:  {}", snapshot.session_id);
            println!("Version:  {}", snapshot.version);
            println!("Updated:  {}", snapshot.updated_at.to_rfc3339());
            println!(
                "Stage:    {}",
                snapshot.stage_label.as_deref().unwrap_or("(none)")
            );
            println!("Pending:  {}", if snapshot.pending { "yes" } else { "no" });
            println!("Question: {}", snapshot.state.question);
            if !snapshot.state.follow_up_questions.is_empty() {
                println!();
                println!("Follow-up questions:");
                for (i, question) in snapshot.state.follow_up_questions.iter().enumerate() {
                    println!("  {}. {}", i + 1, question);
                }
            }
            for message in &snapshot.messages {
                println!();
                println!("{}", message);
            }
            Ok(())
        }
        Commands::Delete { thread } => {
            let service = StudyService::from_config(&config).await?;
            if service.delete_thread(&thread).await? {
                println!("✓ Thread {} deleted", thread);
            } else {
                println!("Thread {} did not exist", thread);
            }
            Ok(())
        }
        Commands::Threads => {
            let service = StudyService::from_config(&config).await?;
            let threads = service.threads().await?;
            if threads.is_empty() {
                println!("No threads.");
            }
            for thread in threads {
                println!("{}", thread);
            }
            Ok(())
        }
        Commands::Recover => {
            let service = StudyService::from_config(&config).await?;
            let recovered = service.recover_interrupted().await?;
            if recovered.is_empty() {
                println!("Nothing to recover.");
            }
            for output in &recovered {
                print_output(output);
            }
            Ok(())
        }
    }
}

fn images(paths: Vec<String>) -> Vec<ImageRef> {
    paths.into_iter().map(ImageRef::new).collect()
}

fn print_output(output: &ProcessOutput) {
    for message in &output.messages {
        println!("{}", message);
        println!();
    }
    match &output.status {
        ProcessStatus::Suspended { stage } => {
            println!("[thread {} waiting at {}]", output.thread_id, stage);
        }
        ProcessStatus::Completed => println!("[thread {} completed]", output.thread_id),
    }
}

async fn chat(service: &StudyService, thread: Option<String>, images: Vec<ImageRef>) -> anyhow::Result<()> {
    let mut thread = thread;
    let mut images = images;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Type a question. Reply `approve` or `skip` to a review, anything else to request changes. Ctrl-D exits.");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match service
            .submit(thread.as_deref(), &line, std::mem::take(&mut images))
            .await
        {
            Ok(output) => {
                print_output(&output);
                thread = match output.status {
                    ProcessStatus::Suspended { .. } => Some(output.thread_id),
                    ProcessStatus::Completed => None,
                };
            }
            Err(err) => eprintln!("✗ {}", err),
        }
    }
    Ok(())
}
