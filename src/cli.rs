use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Chat with the tutor. Without a message, starts an interactive session.
    Chat {
        /// Single message to send
        message: Option<String>,
    },

    /// Generate a multiple-choice quiz from a saved conversation
    Quiz {
        /// JSON file with an array of {role, content} turns
        transcript: PathBuf,

        /// Number of questions to ask for
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,

        /// Answer the questions in the terminal
        #[arg(short, long)]
        interactive: bool,
    },

    /// Generate a learning flowchart from a saved conversation
    Flowchart {
        /// JSON file with an array of {role, content} turns
        transcript: PathBuf,

        /// Reference stored on the flowchart
        #[arg(long)]
        conversation_id: Option<String>,

        /// Write the export document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Suggest a tutoring mode for a message
    Detect { message: String },

    /// List the available tutoring modes
    Personas,

    /// Show or change the stored settings
    Config {
        /// Store an API key, as VENDOR=KEY
        #[arg(long, value_name = "VENDOR=KEY")]
        set_key: Vec<String>,

        /// Persist --provider/--model/--mode as the new defaults
        #[arg(long)]
        save: bool,
    },
}

#[derive(Parser, Debug)]
#[command(version, about = "AI tutor in the terminal", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// LLM vendor to use (openai, groq, gemini)
    #[arg(short = 'p', long)]
    pub provider: Option<String>,

    /// Model name to use (vendor-specific)
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Tutoring mode (standard, exam, mentor, creative)
    #[arg(long)]
    pub mode: Option<String>,

    /// Settings store file (defaults to the platform config directory)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Enable verbose logging (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
