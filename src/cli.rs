use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use crate::commands::{CompletionsCommand, ContextCommand, ObtainCommand, RemoveCommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "rolehop", version, about = "Obtain temporary AWS credentials through role chains", long_about = None)]
pub struct Cli {
    #[arg(
        short = 'c',
        long,
        global = true,
        help = "Context to use instead of the active one"
    )]
    pub context: Option<String>,

    #[arg(short = 'v', long, global = true, action = ArgAction::Count, help = "Increase verbosity (-v info, -vv debug, -vvv trace)")]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    #[command(about = "Obtain credentials for an account and write its AWS profile")]
    Obtain(ObtainCommand),
    #[command(about = "Remove the managed AWS profile of an account")]
    Remove(RemoveCommand),
    #[command(about = "Manage rolehop contexts")]
    Context(ContextCommand),
    #[command(about = "Generate shell completion scripts for rolehop")]
    Completions(CompletionsCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Obtain(cmd) => cmd.execute(self.context.as_deref()).await,
            Commands::Remove(cmd) => cmd.execute(),
            Commands::Context(cmd) => cmd.execute(),
            Commands::Completions(cmd) => {
                cmd.execute();
                Ok(())
            }
        }
    }
}
