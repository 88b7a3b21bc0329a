pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "shopdesk",
    about = "Shopdesk operator CLI",
    long_about = "Operate the shopdesk assistant: readiness checks, migrations, demo data, config inspection, and conversational turns.",
    after_help = "Examples:\n  shopdesk seed\n  shopdesk ask list products\n  shopdesk ask --yes create customer Ada Lovelace ada@example.com\n  shopdesk chat"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run startup preflight checks and return structured status output")]
    Start,
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo catalogue (products, Blue Widget, customers) idempotently")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Run one conversational turn and print the reply JSON")]
    Ask {
        #[arg(long, help = "Approve and execute the plan the turn proposes")]
        yes: bool,
        #[arg(required = true, num_args = 1.., help = "What to ask, e.g. `list products`")]
        text: Vec<String>,
    },
    #[command(about = "Interactive conversation over stdin for one session")]
    Chat {
        #[arg(long, help = "Session id to use instead of a generated one")]
        session: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start => commands::start::run(),
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => commands::config::run(),
        Command::Ask { yes, text } => commands::ask::run(&text.join(" "), yes),
        Command::Chat { session } => commands::chat::run(session),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
