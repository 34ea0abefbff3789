use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bonegpt::voice::{Microphone, SttProvider, calculate_energy};
use bonegpt::{Assistant, Config, Overrides, banner};

/// BoneGPT - a talking skeleton voice assistant
#[derive(Parser)]
#[command(name = "bonegpt", version, about)]
struct Cli {
    /// Config file (default: ~/.config/bonegpt/config.toml)
    #[arg(short, long, env = "BONEGPT_CONFIG")]
    config: Option<PathBuf>,

    /// JSON file of seed turns for the conversation
    #[arg(short, long)]
    prompt: Option<PathBuf>,

    /// OpenAI API key (overrides OPENAI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// OpenAI organization
    #[arg(long)]
    organization: Option<String>,

    /// Speech recognition provider
    #[arg(long, value_enum)]
    stt: Option<SttProvider>,

    /// Chat model
    #[arg(short, long)]
    model: Option<String>,

    /// Wait for whole replies instead of speaking as they stream
    #[arg(long)]
    no_stream: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Speak text through the voice pipeline
    Say {
        /// Text to speak
        #[arg(default_value = "Greetings from beyond the grave!")]
        text: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Send one typed message and speak the reply
    Chat {
        /// Message text
        text: String,
    },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            config_path: self.config.clone(),
            prompt_path: self.prompt.clone(),
            api_key: self.api_key.clone(),
            organization: self.organization.clone(),
            stt_provider: self.stt,
            model: self.model.clone(),
            no_stream: self.no_stream,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,bonegpt=info",
        1 => "info,bonegpt=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            let is_config_error = e
                .downcast_ref::<bonegpt::Error>()
                .is_some_and(bonegpt::Error::is_fatal);
            if is_config_error {
                eprintln!();
                let _ = Cli::command().print_help();
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Command::TestMic { duration }) = cli.command {
        return test_mic(duration).await;
    }

    let config = Config::load(&cli.overrides())?;
    tracing::debug!(?config, "loaded configuration");
    let assistant = Assistant::new(config);

    match cli.command {
        Some(Command::Say { text }) => assistant.say(&text).await?,
        Some(Command::Chat { text }) => {
            let reply = assistant.chat_once(&text).await?;
            println!("{}", reply.text);
        }
        Some(Command::TestMic { .. }) => {}
        None => {
            let config = assistant.config();
            println!(
                "{}",
                banner::render(&config.openai.model, config.stt.provider, config.openai.stream)
            );
            assistant.run().await?;
        }
    }

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut microphone = Microphone::open()?;
    microphone.start()?;

    println!("Device: {}", microphone.device_name());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = microphone.drain();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    microphone.stop();

    println!("\n---");
    println!("If the meter moved, the skeleton can hear you.");
    println!("If RMS stayed near 0, check:");
    println!("  1. Run: arecord -l (to list devices)");
    println!("  2. Run: pactl info | grep 'Default Source'");

    Ok(())
}
