//! Run-file commands
//!
//! Turns model, data and script paths into the AMPL commands that load
//! them.

use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("Don't know how to run {0} (expected .mod, .dat or .run)")]
    UnsupportedExtension(String),
}

/// AMPL statement that loads a file, chosen by extension
fn load_statement(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
        "mod" => Some("model"),
        "dat" => Some("data"),
        "run" => Some("include"),
        _ => None,
    }
}

/// Commands that load `path`.
///
/// With `change_dir` the session first changes into the file's directory
/// and loads it by file name, so relative paths inside scripts resolve.
pub fn run_file(path: &Path, change_dir: bool) -> Result<Vec<String>, CommandError> {
    let statement = load_statement(path)
        .ok_or_else(|| CommandError::UnsupportedExtension(path.display().to_string()))?;

    let mut commands = Vec::with_capacity(2);
    let target = match (change_dir, path.parent(), path.file_name()) {
        (true, Some(dir), Some(name)) if !dir.as_os_str().is_empty() => {
            commands.push(format!("cd \"{}\";", dir.display()));
            Path::new(name).display().to_string()
        }
        _ => path.display().to_string(),
    };
    commands.push(format!("{} \"{}\";", statement, target));
    Ok(commands)
}
