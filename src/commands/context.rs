use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};

use super::StatePaths;
use crate::config::{self, ContextStore};

#[derive(Debug, Clone, Args)]
pub struct ContextCommand {
    #[command(subcommand)]
    pub action: ContextAction,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ContextAction {
    #[command(about = "List contexts, marking the active one")]
    List,
    #[command(about = "Make a context the active one")]
    Use {
        #[arg(help = "Context name")]
        name: String,
    },
    #[command(about = "Check the context file for unknown or missing keys")]
    Validate,
    #[command(about = "Print an example context file")]
    Template,
}

impl ContextCommand {
    pub fn execute(self) -> Result<()> {
        match self.action {
            ContextAction::Template => print!("{}", config::template()),
            ContextAction::List => {
                for line in list_lines(&contexts()?)? {
                    println!("{line}");
                }
            }
            ContextAction::Use { name } => {
                contexts()?
                    .switch(&name)
                    .with_context(|| format!("Failed to switch to context '{name}'"))?;
                println!("Switched to context '{name}'.");
            }
            ContextAction::Validate => {
                let store = contexts()?;
                let names = store.validate()?;
                println!(
                    "{} is valid ({} context(s)).",
                    store.context_path().display(),
                    names.len()
                );
            }
        }
        Ok(())
    }
}

fn contexts() -> Result<ContextStore> {
    Ok(StatePaths::resolve()?.contexts().clone())
}

fn list_lines(store: &ContextStore) -> Result<Vec<String>> {
    let active = store.active_context()?;
    Ok(store
        .list()?
        .into_iter()
        .map(|name| {
            let marker = if name == active { '*' } else { ' ' };
            format!("{marker} {name}")
        })
        .collect())
}
