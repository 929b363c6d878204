//! envy CLI binary.
//!
//! All logic lives in the library; main.rs only maps the run outcome to a
//! process exit code.

fn main() {
    std::process::exit(envy::cli::run());
}
