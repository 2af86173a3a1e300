//! picotts - command line front end for the Pico TTS glue
//!
//! Checks installed lingware, installs the language pack and synthesizes to WAV files.

use clap::{Parser, Subcommand};
use picotts_ng::backends::CommandLoader;
use picotts_ng::config_loader::{self, Settings};
use picotts_ng::installer::{
    CompletionNotifier, FileArchive, InstallState, InstallStatus, Installer, InstallerHost,
    InstallerPhase,
};
use picotts_ng::service::{SettingsConfigProvider, SynthesisRequest, TtsService};
use picotts_ng::voice_data::{self, CheckResult, VoiceDataChecker};
use picotts_ng::wav_sink::WavFileSink;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Pico TTS voice data and synthesis utility
#[derive(Parser)]
#[command(name = "picotts")]
#[command(author = "StarTuz")]
#[command(version)]
#[command(about = "Pico TTS voice data and synthesis utility", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check which voices have their lingware installed
    Check {
        /// Voices to check, e.g. eng-USA deu-DEU (all when omitted)
        langs: Vec<String>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Install the language pack into the voice data root
    Install {
        /// Destination root (defaults to the configured voice_data_root)
        #[arg(short, long)]
        root: Option<PathBuf>,
        /// Language pack zip (defaults to the configured langpack_archive)
        #[arg(short, long)]
        archive: Option<PathBuf>,
    },

    /// Synthesize text into a WAV file
    Speak {
        /// Text to speak
        text: String,
        /// ISO-3 language, e.g. eng
        #[arg(short, long, default_value = "eng")]
        lang: String,
        /// ISO-3 country, e.g. USA
        #[arg(short, long, default_value = "")]
        country: String,
        /// Speech rate, 100 is normal
        #[arg(long, default_value = "100")]
        rate: i32,
        /// Pitch, 100 is normal
        #[arg(long, default_value = "100")]
        pitch: i32,
        /// Output file
        #[arg(short, long, default_value = "picotts.wav")]
        out: PathBuf,
    },

    /// Print the sample sentence for a language
    Sample {
        lang: String,
        country: Option<String>,
    },
}

/// Installer front end on the terminal.
struct ConsoleHost;

impl InstallerHost for ConsoleHost {
    fn show_installing(&self) {
        println!("Installing language pack...");
    }

    fn offer_retry(&self) {
        println!("✗ Installation failed.");
    }

    fn close(&self) {
        println!("✓ Language pack installed");
    }
}

#[derive(Default)]
struct ConsoleNotifier {
    status: Mutex<Option<InstallStatus>>,
}

impl CompletionNotifier for ConsoleNotifier {
    fn data_installed(&self, status: InstallStatus) {
        tracing::info!("Voice data install finished: {:?}", status);
        if let Ok(mut slot) = self.status.lock() {
            *slot = Some(status);
        }
    }
}

fn ask_retry() -> bool {
    print!("Retry? [y/N] ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => matches!(line.trim(), "y" | "Y" | "yes"),
        Err(_) => false,
    }
}

fn install(
    settings: &Settings,
    root: Option<PathBuf>,
    archive: Option<PathBuf>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let root = root.unwrap_or_else(|| PathBuf::from(&settings.voice_data_root));
    let archive = archive.unwrap_or_else(|| PathBuf::from(&settings.langpack_archive));
    std::fs::create_dir_all(&root)?;

    let notifier = Arc::new(ConsoleNotifier::default());
    let installer = Installer::new(
        InstallState::shared(),
        Arc::new(FileArchive::new(archive)),
        Arc::new(ConsoleHost),
        notifier.clone(),
    );

    let mut handle = installer.on_root_resolved(root);
    while let Some(running) = handle.take() {
        if running.join().is_err() {
            eprintln!("Extraction thread panicked");
            break;
        }
        if installer.phase() == InstallerPhase::AwaitingRetry {
            if ask_retry() {
                handle = installer.retry();
            } else {
                installer.close();
            }
        }
    }

    let status = notifier.status.lock().ok().and_then(|s| *s);
    Ok(match status {
        Some(InstallStatus::Success) => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn speak(
    settings: &Settings,
    request: SynthesisRequest,
    out: PathBuf,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let service = TtsService::new(
        Arc::new(CommandLoader),
        Arc::new(SettingsConfigProvider),
        settings.engine_binary.clone(),
    );
    service.on_create()?;

    let sink = Arc::new(WavFileSink::new(out));
    let result = service.on_synthesize_text(&request, sink.clone());
    service.on_destroy();
    result?;

    println!("Wrote {}", sink.path().display());
    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = config_loader::SETTINGS
        .read()
        .map(|s| s.clone())
        .unwrap_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Check { langs, json } => {
            let checker = VoiceDataChecker::new(
                &settings.voice_data_root,
                &settings.system_lingware_path,
            );
            let check = checker.check(&langs);

            if json {
                println!("{}", serde_json::to_string_pretty(&check)?);
            } else {
                println!("Voice Data ({})", check.root_directory.display());
                println!("──────────────────────────────");
                for voice in &check.available {
                    println!("  ✓ {}", voice);
                }
                for voice in &check.unavailable {
                    println!("  ✗ {}", voice);
                }
            }

            Ok(match check.result {
                CheckResult::Pass => ExitCode::SUCCESS,
                CheckResult::MissingData => ExitCode::from(1),
                CheckResult::Fail => ExitCode::from(2),
            })
        }

        Commands::Install { root, archive } => install(&settings, root, archive),

        Commands::Speak {
            text,
            lang,
            country,
            rate,
            pitch,
            out,
        } => {
            let mut request = SynthesisRequest::new(text);
            request.language = lang;
            request.country = country;
            request.speech_rate = rate;
            request.pitch = pitch;
            speak(&settings, request, out)
        }

        Commands::Sample { lang, country } => {
            match voice_data::sample_text(&lang, country.as_deref().unwrap_or("")) {
                Some(text) => {
                    println!("{}", text);
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("No sample text for {}", lang);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}
