//! ### mkdir, remove, delete, set, clear

use log::error;
use super::{open_card,glob_card_args,string_args,CommandError};
use crate::fs::ps2mc::*;
use crate::STDRESULT;

pub fn mkdir(cmd: &clap::ArgMatches) -> STDRESULT {
    let mut card = open_card(cmd,true)?;
    for filename in string_args(cmd,"directory") {
        card.mkdir(&filename)?;
    }
    card.close_all()
}

pub fn remove(cmd: &clap::ArgMatches) -> STDRESULT {
    let mut card = open_card(cmd,true)?;
    for filename in string_args(cmd,"filename") {
        card.remove(&filename)?;
    }
    card.close_all()
}

pub fn delete(cmd: &clap::ArgMatches) -> STDRESULT {
    let mut card = open_card(cmd,true)?;
    for dirname in string_args(cmd,"dirname") {
        card.rmdir(&dirname)?;
    }
    card.close_all()
}

/// Shared by `set` and `clear`; `setting` selects which way the named
/// flags go.  A raw hex mode replaces the whole field.
pub fn setmode(cmd: &clap::ArgMatches,setting: bool) -> STDRESULT {
    let mut set_mask: u16 = 0;
    let mut clear_mask: u16 = 0xFFFF;
    for (id,bit) in [("read",DF_READ),("write",DF_WRITE),("execute",DF_EXECUTE),
                     ("protected",DF_PROTECTED),("psx",DF_PSX),
                     ("pocketstation",DF_POCKETSTN),("hidden",DF_HIDDEN)] {
        if cmd.get_flag(id) {
            match setting {
                true => set_mask |= bit,
                false => clear_mask ^= bit
            }
        }
    }
    let value: Option<u16> = match cmd.get_one::<String>("hex-value") {
        Some(s) => {
            let trimmed = s.trim_start_matches("0x").trim_start_matches("0X");
            match u16::from_str_radix(trimmed,16) {
                Ok(v) => Some(v),
                Err(_) => {
                    error!("could not parse hex mode value");
                    return Err(Box::new(CommandError::OutOfRange));
                }
            }
        },
        None => None
    };
    if set_mask==0 && clear_mask==0xFFFF && value.is_none() {
        error!("at least one option must be given");
        return Err(Box::new(CommandError::InvalidCommand));
    }
    if value.is_some() && (set_mask != 0 || clear_mask != 0xFFFF) {
        error!("the -X option can't be combined with other options");
        return Err(Box::new(CommandError::InvalidCommand));
    }
    let mut card = open_card(cmd,true)?;
    let args = glob_card_args(&mut card,string_args(cmd,"filename"))?;
    for arg in &args {
        let mut ent = card.get_dirent(arg)?;
        let mode = match value {
            Some(v) => v,
            None => (ent.mode() & clear_mask) | set_mask
        };
        ent.set_mode(mode);
        card.set_dirent(arg,&ent)?;
    }
    card.close_all()
}
