//! `envy fetch`: one-shot transfer of a single source URI.

use anyhow::{Context, Result};
use camino::Utf8Path;
use envy_fetch::{fetch, FetchProgress, FetchRequest};
use std::io::{IsTerminal, Write};

pub fn run(source: &str, destination: &Utf8Path) -> Result<()> {
    let request = FetchRequest::new(source, destination);

    let interactive = std::io::stderr().is_terminal();
    let mut progress = move |p: &FetchProgress| {
        if interactive {
            match p {
                FetchProgress::Transfer { transferred, total } => {
                    match total {
                        Some(total) => eprint!("\r{transferred}/{total} bytes"),
                        None => eprint!("\r{transferred} bytes"),
                    }
                    let _ = std::io::stderr().flush();
                }
                FetchProgress::Git {
                    received_objects,
                    total_objects,
                    ..
                } => {
                    eprint!("\r{received_objects}/{total_objects} objects");
                    let _ = std::io::stderr().flush();
                }
            }
        }
        true
    };

    let result = fetch(&request, Some(&mut progress))
        .with_context(|| format!("fetching {source}"))?;
    if interactive {
        eprintln!();
    }
    println!("{}", result.resolved_destination);
    Ok(())
}
