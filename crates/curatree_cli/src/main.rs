//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `curatree_core` linkage and that a fresh store bootstraps.
//! - Keep output deterministic for quick local sanity checks.

use curatree_core::{open_db_in_memory, SqliteTreeRepository, TreeService};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("curatree_core ping={}", curatree_core::ping());
    println!("curatree_core version={}", curatree_core::core_version());

    match probe_store() {
        Ok(projects) => {
            println!("curatree_core store=ok projects={projects}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("curatree_core store=error error={err}");
            ExitCode::FAILURE
        }
    }
}

fn probe_store() -> Result<usize, Box<dyn std::error::Error>> {
    let conn = open_db_in_memory()?;
    let repo = SqliteTreeRepository::try_new(&conn)?;
    let service = TreeService::new(repo);
    Ok(service.get_projects()?.len())
}
