//! # CLI Subcommands
//!
//! Contains modules that run the subcommands.

pub mod stat;
pub mod modify;
pub mod get;
pub mod put;
pub mod xfer;
pub mod mkimg;

use crate::fs::ps2mc::Card;
use crate::DYNERR;

#[derive(thiserror::Error,Debug)]
pub enum CommandError {
    #[error("Command could not be interpreted")]
    InvalidCommand,
    #[error("One of the parameters was out of range")]
    OutOfRange,
    #[error("An --image path is required for this command")]
    MissingImage,
    #[error("File exists")]
    FileExists,
    #[error("File system errors were found")]
    CheckFailed
}

/// the path given by the global `--image` option
pub fn image_path(cmd: &clap::ArgMatches) -> Result<String,DYNERR> {
    match cmd.get_one::<String>("image") {
        Some(p) => Ok(p.clone()),
        None => Err(Box::new(CommandError::MissingImage))
    }
}

/// Open the card named by the global `--image` option, honoring the
/// global `--ignore-ecc` flag.
pub fn open_card(cmd: &clap::ArgMatches,writable: bool) -> Result<Card,DYNERR> {
    let path = image_path(cmd)?;
    let ignore_ecc = cmd.get_flag("ignore-ecc");
    crate::create_card_from_file(&path,writable,ignore_ecc)
}

/// Expand local wildcard arguments that the shell left alone.
pub fn glob_args(args: Vec<String>) -> Vec<String> {
    let mut ret = Vec::new();
    for arg in args {
        let mut matched = Vec::new();
        if let Ok(paths) = glob::glob(&arg) {
            for p in paths {
                if let Ok(path) = p {
                    matched.push(path.to_string_lossy().to_string());
                }
            }
        }
        match matched.len() {
            0 => ret.push(arg),
            _ => ret.append(&mut matched)
        }
    }
    ret
}

/// Expand card-side wildcard arguments through the card's glob.
pub fn glob_card_args(card: &mut Card,args: Vec<String>) -> Result<Vec<String>,DYNERR> {
    let mut ret = Vec::new();
    for arg in args {
        let mut matched = card.glob(&arg)?;
        match matched.len() {
            0 => ret.push(arg),
            _ => ret.append(&mut matched)
        }
    }
    Ok(ret)
}

/// collect a repeated positional argument
pub fn string_args(cmd: &clap::ArgMatches,id: &str) -> Vec<String> {
    match cmd.get_many::<String>(id) {
        Some(vals) => vals.map(|s| s.to_string()).collect(),
        None => Vec::new()
    }
}
