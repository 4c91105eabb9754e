use clap::{Parser, Subcommand};

/// taskpush: Web Push reminders for due tasks
#[derive(Parser)]
#[command(name = "taskpush", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server and the daily reminder job
    Serve {
        /// Port to bind (defaults to TASKPUSH_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage VAPID keys
    Vapid {
        #[command(subcommand)]
        command: VapidCommands,
    },

    /// Send the test notification to every device of one user
    SendTest {
        #[arg(long)]
        user_id: String,
    },

    /// Run one reminder sweep now, ignoring the time of day
    Sweep,
}

#[derive(Subcommand)]
pub enum VapidCommands {
    /// Generate a new key pair and print it as env lines
    Generate {
        /// Contact subject (mailto: or https: URL)
        #[arg(long, default_value = "mailto:admin@localhost")]
        subject: String,
    },
}
