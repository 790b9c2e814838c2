//! ### import and export save archives

use log::error;
use super::{open_card,glob_args,glob_card_args,string_args,CommandError};
use crate::fs::display_name;
use crate::save;
use crate::save::SaveType;
use crate::STDRESULT;

pub fn import(cmd: &clap::ArgMatches) -> STDRESULT {
    let mut card = open_card(cmd,true)?;
    let ignore_existing = cmd.get_flag("ignore-existing");
    let directory = cmd.get_one::<String>("directory").cloned();
    let args = glob_args(string_args(cmd,"savefile"));
    if directory.is_some() && args.len() > 1 {
        error!("the -d option can only be used with a single savefile");
        return Err(Box::new(CommandError::InvalidCommand));
    }
    for filename in &args {
        let dat = std::fs::read(filename)?;
        let sf = match save::detect_file_type(&dat) {
            Some(SaveType::Max) => save::max::load(&dat)?,
            Some(SaveType::Psu) => save::psu::load(&dat)?,
            Some(SaveType::Cbs) => save::cbs::load(&dat)?,
            Some(SaveType::Sps) => save::sps::load(&dat)?,
            Some(SaveType::Npo) => {
                error!("{}: nPort saves are not supported",filename);
                return Err(Box::new(save::Error::UnsupportedFormat));
            },
            None => {
                error!("{}: save file format not recognized",filename);
                return Err(Box::new(save::Error::UnknownFormat));
            }
        };
        let dirname = match &directory {
            Some(d) => d.clone(),
            None => display_name(sf.dirent().name())
        };
        println!("Importing {} to {}",filename,dirname);
        if !card.import_save_file(&sf,ignore_existing,directory.as_deref())? {
            println!("{}: already in memory card image, ignored.",filename);
        }
    }
    card.close_all()
}

pub fn export(cmd: &clap::ArgMatches) -> STDRESULT {
    let mut card = open_card(cmd,false)?;
    let overwrite = cmd.get_flag("overwrite-existing");
    let ignore = cmd.get_flag("ignore-existing");
    if overwrite && ignore {
        error!("the -i and -f options are mutually exclusive");
        return Err(Box::new(CommandError::InvalidCommand));
    }
    let longnames = cmd.get_flag("longnames");
    let output = cmd.get_one::<String>("output-file").cloned();
    let use_max = cmd.get_flag("max-drive");
    let ext = match use_max {
        true => "max",
        false => "psu"
    };
    let args = glob_card_args(&mut card,string_args(cmd,"dirname"))?;
    if output.is_some() {
        if args.len() > 1 {
            error!("only one directory can be exported when the -o option is used");
            return Err(Box::new(CommandError::InvalidCommand));
        }
        if longnames {
            error!("the -o and -l options are mutually exclusive");
            return Err(Box::new(CommandError::InvalidCommand));
        }
    }
    if let Some(dir) = cmd.get_one::<String>("directory") {
        std::env::set_current_dir(dir)?;
    }
    for dirname in &args {
        let sf = card.export_save_file(dirname)?;
        let filename = match (&output,longnames) {
            (Some(o),_) => o.clone(),
            (None,true) => [save::make_longname(dirname.trim_start_matches('/'),&sf),
                ".".to_string(),ext.to_string()].concat(),
            (None,false) => [dirname.trim_start_matches('/'),".",ext].concat()
        };
        if !overwrite && std::path::Path::new(&filename).exists() {
            if ignore {
                continue;
            }
            error!("{}: file exists",filename);
            return Err(Box::new(CommandError::FileExists));
        }
        println!("Exporting {} to {}",dirname,filename);
        let dat = match use_max {
            true => save::max::save(&sf)?,
            false => save::psu::save(&sf)?
        };
        std::fs::write(&filename,&dat)?;
    }
    card.close_all()
}
