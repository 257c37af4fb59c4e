//! Command-line arguments

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use hitl_common::EventType;

#[derive(Debug, Parser)]
#[command(name = "hitl")]
#[command(version)]
#[command(about = "Ask a human before your agent acts")]
pub struct Cli {
    /// Path to configuration file (default: <config dir>/hitl/config.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the approval service
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// API key
    #[arg(long, global = true, env = "HUMANLAYER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Run id that groups the requests made by this invocation
    #[arg(long, global = true)]
    pub run_id: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG directives take precedence
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Total attempts for retryable failures (1 disables retries)
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Request approval for a function call
    Create {
        /// Function name
        #[arg(long = "fn", value_name = "NAME")]
        fn_name: String,

        /// Arguments as a JSON object
        #[arg(long, value_name = "JSON")]
        kwargs: Option<String>,

        /// Single argument as key=value; the value is parsed as JSON when possible
        #[arg(short, long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,

        #[command(flatten)]
        channel: ChannelArgs,

        /// Block until a human decides
        #[arg(long)]
        wait: bool,
    },

    /// Show a function call
    Get { call_id: String },

    /// Show the decision state of a function call
    Decision { call_id: String },

    /// Poll until a function call is decided
    Wait {
        call_id: String,

        /// Poll interval in milliseconds (default from config)
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Notify more people about an undecided function call
    Escalate {
        call_id: String,

        #[command(flatten)]
        escalation: EscalationArgs,
    },

    /// Approve a function call
    Approve {
        call_id: String,

        #[arg(long)]
        comment: Option<String>,
    },

    /// Deny a function call
    Deny {
        call_id: String,

        /// Why the call was denied
        #[arg(long)]
        reason: String,
    },

    /// List requests waiting for a human
    Pending {
        /// List human contacts instead of function calls
        #[arg(long)]
        contacts: bool,
    },

    /// Ask a human a free-form question
    Contact {
        /// The question
        #[arg(long)]
        msg: String,

        #[arg(long)]
        subject: Option<String>,

        #[command(flatten)]
        channel: ChannelArgs,

        /// Block until the human answers and print the answer
        #[arg(long)]
        wait: bool,
    },

    /// Show a human contact
    ContactGet { call_id: String },

    /// Notify more people about an unanswered human contact
    ContactEscalate {
        call_id: String,

        #[command(flatten)]
        escalation: EscalationArgs,
    },

    /// Answer a human contact
    Respond {
        call_id: String,

        #[arg(long)]
        response: String,

        /// Name of the chosen response option
        #[arg(long)]
        option: Option<String>,
    },

    /// Print live events until interrupted
    Watch {
        /// Event types to receive (default: all)
        #[arg(long = "type", value_name = "TYPE", value_parser = parse_event_type)]
        types: Vec<EventType>,

        #[arg(long)]
        session: Option<String>,

        /// Only events for this run
        #[arg(long = "for-run", value_name = "RUN_ID")]
        for_run: Option<String>,
    },

    /// Review pending function calls interactively
    Review,

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (the API key is never printed)
    Show,

    /// Write an example configuration file
    Init {
        /// Destination (default: <config dir>/hitl/config.toml)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Delivery target; falls back to the configured default when omitted
#[derive(Debug, Clone, Default, Args)]
pub struct ChannelArgs {
    /// Email address to notify
    #[arg(long)]
    pub email: Option<String>,

    /// Slack channel or user id to notify
    #[arg(long)]
    pub slack: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct EscalationArgs {
    /// Message sent with the escalation
    #[arg(long)]
    pub msg: String,

    /// Additional recipient on the To line
    #[arg(long, value_name = "ADDRESS")]
    pub to: Vec<String>,

    #[arg(long, value_name = "ADDRESS")]
    pub cc: Vec<String>,

    #[arg(long, value_name = "ADDRESS")]
    pub bcc: Vec<String>,

    /// Send the escalation to a different email channel
    #[arg(long, value_name = "ADDRESS")]
    pub email: Option<String>,
}

fn parse_event_type(s: &str) -> Result<EventType, String> {
    s.parse::<EventType>()
        .map_err(|_| format!("unknown event type '{}'", s))
}
