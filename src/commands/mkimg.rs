//! ### create a new card image

use log::error;
use super::{image_path,CommandError};
use crate::fs::ps2mc::{Card,FormatParams};
use crate::fs::ps2mc::{CLUSTER_SIZE,STANDARD_PAGE_SIZE};
use crate::STDRESULT;

pub fn format(cmd: &clap::ArgMatches) -> STDRESULT {
    let path = image_path(cmd)?;
    let mut params = FormatParams::standard();
    params.with_ecc = !cmd.get_flag("no-ecc");
    if let Some(s) = cmd.get_one::<String>("clusters") {
        let clusters = match usize::from_str_radix(s,10) {
            Ok(c) if c > 0 => c,
            _ => {
                error!("invalid cluster count");
                return Err(Box::new(CommandError::OutOfRange));
            }
        };
        params.pages_per_card = clusters * (CLUSTER_SIZE / STANDARD_PAGE_SIZE);
    }
    if !cmd.get_flag("overwrite-existing") && std::path::Path::new(&path).exists() {
        error!("{}: file exists",path);
        return Err(Box::new(CommandError::FileExists));
    }
    let f = std::fs::OpenOptions::new().read(true).write(true).create(true)
        .truncate(true).open(&path)?;
    let mut card = Card::from_stream(Box::new(f),true,Some(params))?;
    card.close_all()
}
