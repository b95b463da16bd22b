//! arbor - inspect and edit a hierarchical content store

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = arbor_store::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
