//! # Command Line Interface
//!
//! Dispatch commands to `commands` module.

use env_logger;
use ps2kit::commands;
mod cli;

fn main() -> Result<(),Box<dyn std::error::Error>>
{
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let main_cmd = cli::build_cli();
    let matches = main_cmd.get_matches();

    // List directory contents

    if let Some(cmd) = matches.subcommand_matches("ls") {
        return commands::stat::ls(cmd);
    }

    // Display save information

    if let Some(cmd) = matches.subcommand_matches("dir") {
        return commands::stat::dir(cmd);
    }

    // Display free space

    if let Some(cmd) = matches.subcommand_matches("df") {
        return commands::stat::df(cmd);
    }

    // Check the file system

    if let Some(cmd) = matches.subcommand_matches("check") {
        return commands::stat::check(cmd);
    }

    // Extract files to the local file system

    if let Some(cmd) = matches.subcommand_matches("extract") {
        return commands::get::extract(cmd);
    }

    // Add local files to the card

    if let Some(cmd) = matches.subcommand_matches("add") {
        return commands::put::add(cmd);
    }

    // Create directory inside the card
    if let Some(cmd) = matches.subcommand_matches("mkdir") {
        return commands::modify::mkdir(cmd);
    }

    // Remove a file or empty directory
    if let Some(cmd) = matches.subcommand_matches("remove") {
        return commands::modify::remove(cmd);
    }

    // Recursively delete a save directory
    if let Some(cmd) = matches.subcommand_matches("delete") {
        return commands::modify::delete(cmd);
    }

    // Set mode flags
    if let Some(cmd) = matches.subcommand_matches("set") {
        return commands::modify::setmode(cmd,true);
    }

    // Clear mode flags
    if let Some(cmd) = matches.subcommand_matches("clear") {
        return commands::modify::setmode(cmd,false);
    }

    // Import save archives
    if let Some(cmd) = matches.subcommand_matches("import") {
        return commands::xfer::import(cmd);
    }

    // Export save archives
    if let Some(cmd) = matches.subcommand_matches("export") {
        return commands::xfer::export(cmd);
    }

    // Create a new card image
    if let Some(cmd) = matches.subcommand_matches("format") {
        return commands::mkimg::format(cmd);
    }

    log::error!("No subcommand was found, try `ps2kit --help`");
    return Err(Box::new(commands::CommandError::InvalidCommand));
}
