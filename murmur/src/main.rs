//! murmur - transcribe audio files on the command line

// Without the engine feature the transcription options are parsed but unused.
#![cfg_attr(not(feature = "whisper-cpp"), allow(dead_code))]

use clap::{Parser, Subcommand};
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};
use murmur_core::{GgmlModel, ModelManager, Quantization, WaveReader};
use owo_colors::OwoColorize as _;
use std::path::PathBuf;
use std::process;
use std::str::FromStr as _;
use strum::IntoEnumIterator as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_env_filter(
                EnvFilter::builder().parse("info,whisper_rs::whisper_logging_hook=warn")?,
            )
            .compact()
            .without_time()
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
    debug!("Command line arguments: {:?}", cli);

    match cli.command {
        Commands::Transcribe(args) => handle_transcribe(args, cli.verbose).await,
        Commands::Models { command } => handle_model_command(command, cli.verbose).await,
        Commands::Wave { command } => handle_wave_command(command).await,
        #[cfg(feature = "whisper-cpp")]
        Commands::SystemInfo => handle_system_info(),
    }
}

const ABOUT: &str = "Transcribe audio files using whisper.cpp";

#[derive(Parser, Debug)]
#[command(name = env!("CARGO_PKG_NAME"), author = env!("CARGO_PKG_AUTHORS"))]
#[command(about = ABOUT)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transcribe an audio file
    Transcribe(TranscribeArgs),
    /// Model management commands
    Models {
        #[command(subcommand)]
        command: ModelCommands,
    },
    /// Inspect wave containers
    Wave {
        #[command(subcommand)]
        command: WaveCommands,
    },
    /// Show the native build configuration
    #[cfg(feature = "whisper-cpp")]
    SystemInfo,
}

#[derive(clap::Args, Debug)]
struct TranscribeArgs {
    /// Path to the audio file to transcribe
    #[arg(value_name = "AUDIO_FILE")]
    audio_file: PathBuf,

    /// Path to a ggml model file. Defaults to a downloaded model
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Language code (e.g., en, es, fr). Auto-detect if not specified
    #[arg(short, long)]
    language: Option<String>,

    /// Translate the transcription to English
    #[arg(long)]
    translate: bool,

    /// Number of threads to use
    #[arg(short, long)]
    threads: Option<usize>,

    /// Disable GPU acceleration
    #[arg(long)]
    no_gpu: bool,

    /// Use beam search with the given beam size instead of greedy sampling
    #[arg(long, value_name = "N")]
    beam: Option<i32>,

    /// Temperature for sampling (0.0 = deterministic)
    #[arg(long, default_value = "0.0")]
    temperature: f32,

    /// Mark speaker turns (requires a tinydiarize model)
    #[arg(long)]
    diarize: bool,

    /// Aggregate token probabilities per segment (visible in json output)
    #[arg(long)]
    probabilities: bool,

    /// Output format: text, json, srt, vtt
    #[arg(short, long, default_value = "text")]
    output: OutputFormat,

    /// Output file path (writes to file instead of stdout)
    #[arg(short = 'f', long = "output-file")]
    output_file: Option<PathBuf>,

    /// Omit timestamps in text output
    #[arg(long)]
    no_timestamps: bool,

    /// Convert the input to 16 kHz mono wave with ffmpeg first
    #[arg(long)]
    transcode: bool,
}

#[derive(Subcommand, Debug)]
enum ModelCommands {
    /// Download a ggml model
    Download {
        /// Model to download (e.g., base, small.en, large-v3)
        #[arg(value_name = "MODEL")]
        model: String,

        /// Quantization variant (none, q5_0, q5_1, q8_0)
        #[arg(short, long, default_value = "none")]
        quant: String,

        /// Force download even if the model is already downloaded
        #[arg(short, long)]
        force: bool,
    },
    /// List models (downloaded by default, use --available for the catalog)
    List {
        /// List every known model instead of downloaded models
        #[arg(short, long)]
        available: bool,
    },
    /// Delete a downloaded model
    Delete {
        /// Model to delete (e.g., base, small.en, large-v3)
        #[arg(value_name = "MODEL")]
        model: String,

        /// Quantization variant (none, q5_0, q5_1, q8_0)
        #[arg(short, long, default_value = "none")]
        quant: String,
    },
    /// Show model information
    Info {
        /// Model to show info for (e.g., base, small.en, large-v3)
        #[arg(value_name = "MODEL")]
        model: String,

        /// Quantization variant (none, q5_0, q5_1, q8_0)
        #[arg(short, long, default_value = "none")]
        quant: String,
    },
}

#[derive(Subcommand, Debug)]
enum WaveCommands {
    /// Print wave container header information
    Info {
        /// Path to the wave file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    /// Plain text with per-segment timestamps
    Text,
    /// JSON with segment metadata
    Json,
    /// SRT subtitle format
    Srt,
    /// WebVTT subtitle format
    Vtt,
}

#[cfg(not(feature = "whisper-cpp"))]
async fn handle_transcribe(args: TranscribeArgs, _verbose: bool) -> anyhow::Result<()> {
    if !args.audio_file.exists() {
        error!("Audio file not found: {}", args.audio_file.display());
        process::exit(1);
    }

    error!(
        "This build has no inference engine. Rebuild with {}.",
        "--features whisper-cpp".cyan()
    );
    process::exit(1);
}

#[cfg(feature = "whisper-cpp")]
struct PassOutcome {
    segments: Vec<murmur_core::Segment>,
    audio_duration: std::time::Duration,
    elapsed: std::time::Duration,
    cancelled: bool,
}

#[cfg(feature = "whisper-cpp")]
async fn handle_transcribe(args: TranscribeArgs, verbose: bool) -> anyhow::Result<()> {
    use futures::StreamExt as _;
    use murmur_core::{
        ContextParams, DecodeParams, FfmpegTranscoder, MurmurError, SamplingStrategy,
        SpeechProcessor, SubtitleFormat, SubtitleTrack, Transcoder as _, WhisperEngine,
        WhisperModel,
    };
    use std::io::{self, Write as _};
    use std::sync::Arc;
    use std::time::Instant;

    if !args.audio_file.exists() {
        error!("Audio file not found: {}", args.audio_file.display());
        process::exit(1);
    }

    // Resolve the model: explicit path or the best downloaded one.
    let model_path = match args.model.clone() {
        Some(path) => path,
        None => {
            let manager = ModelManager::new()?;
            match manager.find_default() {
                Some(path) => path,
                None => {
                    error!(
                        "No model available. Download one with: {}{}",
                        env!("CARGO_PKG_NAME").cyan(),
                        " models download base".cyan()
                    );
                    process::exit(1);
                }
            }
        }
    };

    if verbose {
        eprintln!("{}", "Murmur - Audio Transcription".blue().bold());
        eprintln!("Model: {}", model_path.display());
        if args.no_gpu {
            eprintln!("GPU acceleration: {}", "disabled".red());
        } else {
            eprintln!("GPU acceleration: {}", "enabled".green());
        }
        if let Some(lang) = &args.language {
            eprintln!("Language: {}", lang);
        }
        eprintln!();
    }

    let context = ContextParams::new().with_gpu(!args.no_gpu);
    let model_file = model_path.clone();
    let model = match tokio::task::spawn_blocking(move || {
        WhisperModel::from_file_with_params(&model_file, &context)
    })
    .await
    {
        Ok(Ok(model)) => model,
        Ok(Err(e)) => {
            error!("{}", e);
            process::exit(1);
        }
        Err(e) => {
            error!("Model load task failed: {}", e);
            process::exit(1);
        }
    };

    // Convert the input up front when asked to; wave files pass through.
    let (wave_path, is_temporary) = if args.transcode {
        match FfmpegTranscoder::new().to_wave(&args.audio_file).await {
            Ok(out) => out,
            Err(e) => {
                error!("Transcoding failed: {}", e);
                process::exit(1);
            }
        }
    } else {
        (args.audio_file.clone(), false)
    };

    let mut params = DecodeParams::new()
        .with_threads(args.threads.unwrap_or_else(num_cpus::get))
        .with_translate(args.translate)
        .with_diarize(args.diarize)
        .with_temperature(args.temperature);
    if let Some(ref language) = args.language {
        params = params.with_language(language.clone());
    }
    if let Some(beam_size) = args.beam {
        params = params.with_strategy(SamplingStrategy::BeamSearch {
            beam_size,
            patience: -1.0,
        });
    }

    let progress = ProgressBar::new(100);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent}%")
            .unwrap()
            .progress_chars("#>-"),
    );

    let engine = Arc::new(WhisperEngine::new(Arc::new(model)));
    let bar = progress.clone();
    let processor = SpeechProcessor::new(engine, params)
        .with_probabilities(args.probabilities)
        .with_progress(move |percent| {
            bar.set_position(percent.clamp(0, 100) as u64);
        });

    // Ctrl-C requests cooperative cancellation; the pass stops at the next
    // checkpoint and whatever was decoded so far is kept.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let live = matches!(args.output, OutputFormat::Text) && args.output_file.is_none();

    let outcome: anyhow::Result<PassOutcome> = async {
        let mut header = WaveReader::new(tokio::fs::File::open(&wave_path).await?);
        header.initialize_async(&cancel).await?;
        let audio_duration = header.duration();
        drop(header);

        let file = tokio::fs::File::open(&wave_path).await?;
        let mut stream = processor.process_wave(file, cancel.clone()).await?;

        let started = Instant::now();
        let mut segments = Vec::new();
        let mut cancelled = false;
        let mut stdout = io::stdout();

        while let Some(item) = stream.next().await {
            match item {
                Ok(segment) => {
                    if live {
                        if args.no_timestamps {
                            write!(stdout, "{} ", segment.text)?;
                            stdout.flush()?;
                        } else {
                            writeln!(stdout, "{}", format_text_line(&segment))?;
                        }
                    }
                    segments.push(segment);
                }
                Err(e) if e.is_cancelled() => {
                    cancelled = true;
                    break;
                }
                Err(e) => {
                    let _ = processor.shutdown().await;
                    return Err(e.into());
                }
            }
        }
        if live && args.no_timestamps && !segments.is_empty() {
            writeln!(stdout)?;
        }

        processor.shutdown().await?;

        Ok(PassOutcome {
            segments,
            audio_duration,
            elapsed: started.elapsed(),
            cancelled,
        })
    }
    .await;

    if is_temporary {
        let _ = tokio::fs::remove_file(&wave_path).await;
    }
    progress.finish_and_clear();

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            match e.downcast_ref::<MurmurError>() {
                Some(MurmurError::CorruptWave(_) | MurmurError::UnsupportedWave(_))
                    if !args.transcode =>
                {
                    error!("{}", e);
                    eprintln!(
                        "{} Retry with {} to convert the input with ffmpeg.",
                        "Notice:".yellow().bold(),
                        "--transcode".cyan()
                    );
                }
                _ => error!("Transcription failed: {}", e),
            }
            process::exit(1);
        }
    };

    if outcome.cancelled {
        eprintln!(
            "{} Transcription cancelled, keeping segments decoded so far.",
            "Warning:".yellow().bold()
        );
    }

    // Prepare output content
    let output_content = match args.output {
        OutputFormat::Text => {
            if args.no_timestamps {
                outcome
                    .segments
                    .iter()
                    .map(|segment| segment.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            } else {
                outcome
                    .segments
                    .iter()
                    .map(format_text_line)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        OutputFormat::Json => {
            let text = outcome
                .segments
                .iter()
                .map(|segment| segment.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let language = outcome
                .segments
                .iter()
                .find(|segment| !segment.language.is_empty())
                .map(|segment| segment.language.clone());
            serde_json::to_string_pretty(&serde_json::json!({
                "text": text,
                "segments": &outcome.segments,
                "audio_duration": outcome.audio_duration.as_secs_f64(),
                "processing_time": outcome.elapsed.as_secs_f64(),
                "language": language,
            }))?
        }
        OutputFormat::Srt => {
            SubtitleTrack::from_segments(&outcome.segments).render(SubtitleFormat::Srt)
        }
        OutputFormat::Vtt => {
            SubtitleTrack::from_segments(&outcome.segments).render(SubtitleFormat::Vtt)
        }
    };

    // Write output to file or stdout
    if let Some(output_file) = &args.output_file {
        std::fs::write(output_file, &output_content)?;
        if verbose {
            eprintln!(
                "{} Output written to: {}",
                "Success:".green().bold(),
                output_file.display()
            );
        }
    } else if !live {
        print!("{}", output_content);
    }

    // Print summary if verbose
    if verbose {
        eprintln!();
        eprintln!("{}", "Transcription Summary:".green().bold());
        eprintln!(
            "Audio duration: {:.2}s",
            outcome.audio_duration.as_secs_f64()
        );
        eprintln!("Processing time: {:.2}s", outcome.elapsed.as_secs_f64());
        eprintln!(
            "Real-time factor: {:.2}x",
            outcome.elapsed.as_secs_f64() / outcome.audio_duration.as_secs_f64()
        );
        if let Some(language) = outcome
            .segments
            .iter()
            .find(|segment| !segment.language.is_empty())
        {
            eprintln!("Detected language: {}", language.language);
        }
        eprintln!("Segments: {}", outcome.segments.len());
    }

    Ok(())
}

/// One timestamped transcript line for text output.
#[cfg(feature = "whisper-cpp")]
fn format_text_line(segment: &murmur_core::Segment) -> String {
    format!(
        "[{:.2}s -> {:.2}s] {}{}",
        segment.start.as_secs_f64(),
        segment.end.as_secs_f64(),
        segment.text,
        if segment.speaker_turn {
            " [SPEAKER_TURN]"
        } else {
            ""
        }
    )
}

/// Handle model management subcommands
async fn handle_model_command(command: ModelCommands, verbose: bool) -> anyhow::Result<()> {
    let manager = ModelManager::new()?;

    match command {
        ModelCommands::Download {
            model,
            quant,
            force,
        } => {
            let (model, quant) = parse_model_spec(&model, &quant)?;

            // check if it is already downloaded
            if !force && manager.is_downloaded(model, quant) {
                println!(
                    "{} Model {} is already downloaded.",
                    "Info:".blue().bold(),
                    model_label(model, quant)
                );
                return Ok(());
            }

            println!(
                "{} Downloading model: {} ({})",
                "Info:".blue().bold(),
                model_label(model, quant),
                model.description()
            );

            // Create progress bar
            let progress_bar = ProgressBar::new(0);
            progress_bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                    .unwrap()
                    .progress_chars("#>-")
            );

            manager
                .download_with_progress(model, quant, |downloaded, total| {
                    if let Some(total) = total {
                        if progress_bar.length().unwrap_or(0) != total {
                            progress_bar.set_length(total);
                        }
                        progress_bar.set_position(downloaded);
                    } else {
                        // If total size is unknown, show as spinner with downloaded bytes
                        progress_bar.set_style(
                            ProgressStyle::default_spinner()
                                .template(
                                    "{spinner:.green} [{elapsed_precise}] {bytes} downloaded...",
                                )
                                .unwrap(),
                        );
                        progress_bar.set_position(downloaded);
                    }
                })
                .await?;

            let per_sec = progress_bar
                .length()
                .map(|len| len as f64 / progress_bar.elapsed().as_secs_f64());
            let elapsed = progress_bar.elapsed();
            progress_bar.finish_and_clear();

            println!(
                "{} Model downloaded in {}{}.",
                "Success:".green().bold(),
                HumanDuration(elapsed).cyan(),
                if let Some(per_sec) = per_sec {
                    format!(
                        " ({}{} avg)",
                        HumanBytes(per_sec as u64).cyan(),
                        "/s".cyan()
                    )
                } else {
                    "".to_string()
                }
            );
        }

        ModelCommands::List { available } => {
            if available {
                // List the full catalog
                println!("{}", "Available Models:".blue().bold());
                println!();

                for model in GgmlModel::iter() {
                    println!(
                        "  {} - {}, {}",
                        model.to_string().green().bold(),
                        model.description(),
                        format_file_size(model.approx_size(Quantization::None)).yellow()
                    );
                }

                println!();
                println!(
                    "{}{}{}",
                    "Usage: ".dimmed(),
                    env!("CARGO_PKG_NAME").cyan().dimmed(),
                    " models download <model>".cyan().dimmed()
                );
                println!(
                    "{}",
                    "Add --quant q5_0, q5_1 or q8_0 for a smaller download.".dimmed()
                );
            } else {
                // List downloaded models (default behavior)
                let downloaded = manager.list_downloaded();

                if downloaded.is_empty() {
                    println!("{} No models downloaded yet.", "Info:".blue().bold());
                    println!(
                        "Use {}{} to download one.",
                        env!("CARGO_PKG_NAME").cyan(),
                        " models download base".cyan()
                    );
                } else {
                    println!("{} Downloaded models:", "Info:".blue().bold());
                    println!();

                    for (model, quant) in downloaded {
                        let path = manager.path_for(model, quant);
                        let size = if let Ok(metadata) = std::fs::metadata(&path) {
                            format_file_size(metadata.len())
                        } else {
                            "unknown size".to_string()
                        };

                        println!(
                            "  {} - {} ({})",
                            model_label(model, quant).green(),
                            model.description().dimmed(),
                            size.yellow()
                        );

                        if verbose {
                            println!("    Path: {}", path.display().to_string().dimmed());
                        }
                    }

                    println!();
                    println!(
                        "Models directory: {}",
                        manager.models_dir().display().to_string().dimmed()
                    );
                }
            }
        }

        ModelCommands::Delete { model, quant } => {
            let (model, quant) = parse_model_spec(&model, &quant)?;

            if !manager.is_downloaded(model, quant) {
                println!(
                    "{} Model {} is not downloaded.",
                    "Warning:".yellow().bold(),
                    model_label(model, quant)
                );
                return Ok(());
            }

            manager.delete(model, quant).await?;

            println!(
                "{} Model {} deleted successfully.",
                "Success:".green().bold(),
                model_label(model, quant)
            );
        }

        ModelCommands::Info { model, quant } => {
            let (model, quant) = parse_model_spec(&model, &quant)?;

            println!("{} Model Information", "Info:".blue().bold());
            println!();
            println!("Name: {}", model_label(model, quant).green().bold());
            println!("Description: {}", model.description());
            println!("Filename: {}", model.filename(quant).yellow());
            println!("URL: {}", model.url(quant));
            println!(
                "Approx. size: {}",
                format_file_size(model.approx_size(quant)).yellow()
            );

            let is_downloaded = manager.is_downloaded(model, quant);
            println!(
                "Downloaded: {}",
                if is_downloaded {
                    "yes".green().to_string()
                } else {
                    "no".red().to_string()
                }
            );

            if is_downloaded {
                let path = manager.path_for(model, quant);
                println!("Path: {}", path.display());

                if let Ok(metadata) = std::fs::metadata(&path) {
                    println!("Size: {}", format_file_size(metadata.len()).yellow());
                }
            }
        }
    }

    Ok(())
}

/// Handle wave inspection subcommands
async fn handle_wave_command(command: WaveCommands) -> anyhow::Result<()> {
    match command {
        WaveCommands::Info { file } => {
            if !file.exists() {
                error!("File not found: {}", file.display());
                process::exit(1);
            }

            let mut reader = WaveReader::new(tokio::fs::File::open(&file).await?);
            if let Err(e) = reader.initialize_async(&CancellationToken::new()).await {
                error!("{}", e);
                process::exit(1);
            }

            println!("{} {}", "Info:".blue().bold(), file.display());
            println!();
            println!("Channels: {}", reader.channels());
            println!("Sample rate: {} Hz", reader.sample_rate());
            println!("Bit depth: {} bits", reader.bits_per_sample());
            println!("Frames: {}", reader.frame_count());
            println!(
                "Data size: {}",
                format_file_size(reader.data_len()).yellow()
            );
            println!("Duration: {:.2}s", reader.duration().as_secs_f64());
        }
    }

    Ok(())
}

#[cfg(feature = "whisper-cpp")]
fn handle_system_info() -> anyhow::Result<()> {
    println!("{}", "Native build configuration:".blue().bold());
    println!("{}", murmur_core::system_info());
    Ok(())
}

fn parse_model_spec(model: &str, quant: &str) -> anyhow::Result<(GgmlModel, Quantization)> {
    let model = GgmlModel::from_str(model).map_err(|_| {
        anyhow::anyhow!(
            "Unknown model: {}. Use 'models list --available' to see available models.",
            model
        )
    })?;
    let quant = Quantization::from_str(quant).map_err(|_| {
        anyhow::anyhow!(
            "Unknown quantization: {}. Expected none, q5_0, q5_1 or q8_0.",
            quant
        )
    })?;
    Ok((model, quant))
}

/// Display label for a model/quantization pair, e.g. `base.en-q5_1`.
fn model_label(model: GgmlModel, quant: Quantization) -> String {
    match quant {
        Quantization::None => model.to_string(),
        quant => format!("{}-{}", model, quant),
    }
}

/// Format file size in human readable format
fn format_file_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sizes_format_with_scaled_units() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(2048), "2.0 KB");
        assert_eq!(format_file_size(142 * 1024 * 1024), "142.0 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn model_labels_carry_the_quantization() {
        assert_eq!(model_label(GgmlModel::Base, Quantization::None), "base");
        assert_eq!(
            model_label(GgmlModel::SmallEn, Quantization::Q5_1),
            "small.en-q5_1"
        );
    }

    #[test]
    fn model_specs_parse_or_explain() {
        assert!(parse_model_spec("base", "none").is_ok());
        assert!(parse_model_spec("base", "q8_0").is_ok());
        assert!(parse_model_spec("gigantic", "none").is_err());
        assert!(parse_model_spec("base", "q2_k").is_err());
    }
}
