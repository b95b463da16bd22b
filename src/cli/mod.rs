//! # Command-Line Interface
//!
//! A small inspection tool over a repository home.
//!
//! ## Commands
//!
//! | Command | Purpose |
//! |---------|---------|
//! | `init [PATH]` | Create `.arbor/` with a default config |
//! | `workspaces` | List workspaces, marking the default |
//! | `ls PATH` | Show a node's children and properties |
//! | `get PATH` | Print a property's values |
//! | `add PATH [--type T]` | Add a node and save |
//! | `set PATH VALUE... [--kind K] [--multi]` | Set a property and save |
//! | `rm PATH` | Remove an item and save |
//! | `mv FROM TO` | Move a node |
//!
//! ## Output Formats
//!
//! All commands support `--format`:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! The default can be changed in the global config file.
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod node;
mod output;

pub use app::{run, Cli, Commands};
pub use output::{Output, OutputFormat};
