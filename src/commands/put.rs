//! ### add local files to the card

use super::{open_card,glob_args,string_args};
use crate::fs::ps2mc::OpenMode;
use crate::STDRESULT;

pub fn add(cmd: &clap::ArgMatches) -> STDRESULT {
    let mut card = open_card(cmd,true)?;
    if let Some(dir) = cmd.get_one::<String>("directory") {
        card.chdir(dir)?;
    }
    for src in glob_args(string_args(cmd,"filename")) {
        let dat = std::fs::read(&src)?;
        let dest = match src.replace('\\',"/").split('/').last() {
            Some(n) if n.len() > 0 => n.to_string(),
            _ => src.clone()
        };
        let h = card.open(&dest,OpenMode::Write)?;
        let write_result = card.write(h,&dat);
        card.close(h)?;
        write_result?;
    }
    card.close_all()
}
