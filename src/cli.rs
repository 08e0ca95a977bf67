use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

const DEFAULT_STAGING_DIR: &str = "./workout-staging";

#[derive(Parser, Debug)]
#[command(
    name = "workout-relay",
    about = "Stage finished workouts for transfer and reconcile received ones into an inbox"
)]
pub struct Cli {
    /// Staging root holding `outgoing/` and `incoming/`.
    #[arg(
        long,
        global = true,
        env = "WORKOUT_RELAY_DIR",
        default_value = DEFAULT_STAGING_DIR
    )]
    pub staging_dir: PathBuf,

    /// Increase log verbosity (-v, -vv). Defaults to INFO.
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Decrease log verbosity (-q, -qq). Defaults to INFO.
    #[arg(short = 'q', long, action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Stage a payload JSON file for sending and print its envelope.
    Stage {
        #[arg(value_name = "PAYLOAD_JSON")]
        payload: PathBuf,
    },

    /// Build a payload from a GPX track and stage it for sending.
    ImportGpx {
        #[arg(value_name = "GPX")]
        gpx: PathBuf,

        /// Sport tag, e.g. "running".
        #[arg(long)]
        sport: Option<String>,
    },

    /// Accept a delivered file into the inbox.
    Receive {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Envelope JSON sent alongside the file, e.g. '{"type":"workout","id":"..."}'.
        #[arg(long)]
        envelope: Option<String>,
    },

    /// List inbox workouts, most recent first.
    Inbox {
        /// Show at most this many entries.
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,

        /// Print id, start, duration, distance and sport for each entry.
        #[arg(long)]
        details: bool,
    },

    /// Print one inbox workout as JSON.
    Show {
        #[arg(value_name = "ID")]
        id: Uuid,
    },
}
