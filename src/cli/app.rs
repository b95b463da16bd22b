//! Main CLI application structure

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use super::node::{self, Target};
use super::output::{Output, OutputFormat};
use crate::logging::{self, Profile};
use crate::storage::{GlobalConfig, LoggingConfig, RepositoryHome};

#[derive(Parser)]
#[command(name = "arbor")]
#[command(author, version, about = "Inspect and edit a hierarchical content store")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (defaults to the global config, then text)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output for debugging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Workspace to log into
    #[arg(long, short = 'w', global = true)]
    pub workspace: Option<String>,

    /// Repository root (defaults to the nearest directory holding .arbor)
    #[arg(long, global = true, env = "ARBOR_HOME")]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new repository home
    Init {
        /// Path to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// List workspaces
    Workspaces,

    /// Show a node's children and properties
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Print a property's values
    Get { path: String },

    /// Add a node
    Add {
        path: String,

        /// Primary node type (e.g. nt:unstructured)
        #[arg(long = "type", short = 't')]
        primary_type: Option<String>,
    },

    /// Set a property
    Set {
        path: String,

        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        values: Vec<String>,

        /// Value type (string, long, double, boolean, date, name, path, reference, binary)
        #[arg(long, short = 'k', default_value = "string")]
        kind: String,

        /// Store as a multi-valued property even with one value
        #[arg(long)]
        multi: bool,
    },

    /// Remove a node or property
    Rm { path: String },

    /// Move a node within its workspace
    Mv { from: String, to: String },
}

/// Logging settings of the repository the command will touch, if any
fn repository_logging(cli: &Cli) -> LoggingConfig {
    let root = cli.home.clone().or_else(|| {
        std::env::current_dir()
            .ok()
            .and_then(|cwd| RepositoryHome::find(&cwd))
    });
    root.and_then(|root| RepositoryHome::open(root).ok())
        .map(|home| home.config().logging.clone())
        .unwrap_or_default()
}

fn init_logging(cli: &Cli) {
    let config = repository_logging(cli);
    let profile = if config.json && !cli.verbose {
        Profile::Production
    } else {
        Profile::Development
    };
    let filter = match (&config.filter, cli.verbose) {
        (Some(filter), _) => Some(filter.as_str()),
        (None, true) => None,
        (None, false) => Some("warn"),
    };
    logging::init_with_filter(profile, filter);
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let global = GlobalConfig::load().unwrap_or_default();
    let format = cli.format.unwrap_or_else(|| global.default_format.into());
    let output = Output::new(format, cli.verbose);

    init_logging(&cli);

    let target = Target {
        home: cli.home.clone(),
        workspace: cli.workspace.clone().or(global.default_workspace),
    };

    match &cli.command {
        Commands::Init { path } => {
            output.verbose_ctx("init", &format!("Initializing repository at: {}", path.display()));
            let home = RepositoryHome::init(path)?;
            output.verbose_ctx(
                "init",
                &format!("Created .arbor directory at: {}", home.home_dir().display()),
            );
            output.success(&format!("Initialized repository at {}", home.root().display()));
            Ok(())
        }
        Commands::Workspaces => node::workspaces(&target, &output),
        Commands::Ls { path } => node::list(&target, &output, path),
        Commands::Get { path } => node::get(&target, &output, path),
        Commands::Add { path, primary_type } => {
            node::add(&target, &output, path, primary_type.as_deref())
        }
        Commands::Set {
            path,
            values,
            kind,
            multi,
        } => node::set(&target, &output, path, values, kind, *multi),
        Commands::Rm { path } => node::remove(&target, &output, path),
        Commands::Mv { from, to } => node::move_node(&target, &output, from, to),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn set_collects_values() {
        let cli = Cli::try_parse_from(["arbor", "set", "/a/tags", "x", "y", "--multi"]).unwrap();
        match cli.command {
            Commands::Set { values, multi, kind, .. } => {
                assert_eq!(values, vec!["x", "y"]);
                assert!(multi);
                assert_eq!(kind, "string");
            }
            _ => panic!("expected set"),
        }
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["arbor", "ls", "/a", "--workspace", "staging", "-f", "json"])
            .unwrap();
        assert_eq!(cli.workspace.as_deref(), Some("staging"));
        assert_eq!(cli.format, Some(OutputFormat::Json));
    }
}
