//! ### extract files from the card

use std::io::Write;
use log::error;
use super::{open_card,glob_card_args,string_args,CommandError};
use crate::fs::ps2mc::OpenMode;
use crate::STDRESULT;

pub fn extract(cmd: &clap::ArgMatches) -> STDRESULT {
    let mut card = open_card(cmd,false)?;
    if let Some(dir) = cmd.get_one::<String>("directory") {
        card.chdir(dir)?;
    }
    let use_stdout = cmd.get_flag("use-stdout");
    let output = cmd.get_one::<String>("output");
    if output.is_some() && use_stdout {
        error!("the -o and -p options are mutually exclusive");
        return Err(Box::new(CommandError::InvalidCommand));
    }
    let mut out_file = match output {
        Some(path) => Some(std::fs::File::create(path)?),
        None => None
    };
    let args = glob_card_args(&mut card,string_args(cmd,"filename"))?;
    for filename in &args {
        let h = card.open(filename,OpenMode::Read)?;
        let read_result = card.read(h,None);
        card.close(h)?;
        let dat = read_result?;
        if let Some(f) = out_file.as_mut() {
            f.write_all(&dat)?;
        } else if use_stdout {
            std::io::stdout().write_all(&dat)?;
        } else {
            let local = match filename.split('/').last() {
                Some(n) if n.len() > 0 => n,
                _ => filename
            };
            std::fs::write(local,&dat)?;
        }
    }
    card.close_all()
}
