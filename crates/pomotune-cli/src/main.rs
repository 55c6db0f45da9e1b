use clap::{Parser, Subcommand};
use clap_complete::Shell;
use pomotune_core::Target;

mod commands;

#[derive(Parser)]
#[command(name = "pomotune", version, about = "Pomodoro timing recommendations")]
struct Cli {
    /// Log optimizer progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report a round's focus score and get the next work/break times
    Round {
        user: String,
        /// Focus score of the last round
        #[arg(long, allow_negative_numbers = true)]
        score: f64,
    },
    /// Report a session's average focus score and get the next session shape
    Session {
        user: String,
        /// Average focus score of the last session
        #[arg(long, allow_negative_numbers = true)]
        score: f64,
    },
    /// Run one optimization step for a target by name
    Propose {
        /// "round" or "session"
        target: String,
        user: String,
        /// Score of the pending proposal, if any
        #[arg(long, allow_negative_numbers = true)]
        score: Option<f64>,
    },
    /// Show stored trials
    History {
        /// "round" or "session"
        target: String,
        user: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(verbose: bool) {
    if !verbose {
        return;
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("pomotune_core=debug"))
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Round { user, score } => {
            commands::optimize::run_target(Target::Round, &user, score)
        }
        Commands::Session { user, score } => {
            commands::optimize::run_target(Target::Session, &user, score)
        }
        Commands::Propose {
            target,
            user,
            score,
        } => commands::optimize::run_propose(&target, &user, score),
        Commands::History { target, user, json } => commands::history::run(&target, &user, json),
        Commands::Config { action } => commands::config::run(action),
        Commands::Completions { shell } => commands::completions::run(shell),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
