//! ### ls, dir, df, check

use super::{open_card,glob_card_args,string_args,image_path,CommandError};
use crate::fs::display_name;
use crate::fs::ps2mc::*;
use crate::save::icon;
use crate::STDRESULT;

/// one character per mode bit, low bit first
const MODE_BITS: &str = "rwxpfdD81C+KPH4";

pub fn ls(cmd: &clap::ArgMatches) -> STDRESULT {
    let mut card = open_card(cmd,false)?;
    let mut args = string_args(cmd,"directory");
    if args.len()==0 {
        args.push("/".to_string());
    }
    let creation = cmd.get_flag("creation-time");
    let args = glob_card_args(&mut card,args)?;
    for dirname in &args {
        let list = card.list_dir(dirname)?;
        if args.len() > 1 {
            println!();
            println!("{}:",dirname);
        }
        for ent in &list {
            if !ent.exists() {
                continue;
            }
            let mode = ent.mode();
            let mut flags = String::new();
            for (bit,c) in MODE_BITS.chars().enumerate() {
                match mode & (1u16 << bit) {
                    0 => flags.push('-'),
                    _ => flags.push(c)
                }
            }
            let tod = match creation {
                true => ent.created(),
                false => ent.modified()
            };
            println!("{} {:7} {} {}",flags,ent.length(),tod.display_local(),
                display_name(ent.name()));
        }
    }
    card.close_all()
}

pub fn dir(cmd: &clap::ArgMatches) -> STDRESULT {
    let mut card = open_card(cmd,false)?;
    let root = card.list_dir("/")?;
    for ent in root.iter().skip(2) {
        if !ent.is_dir() {
            continue;
        }
        let name = display_name(ent.name());
        let dirname = ["/",&name].concat();
        card.chdir(&dirname)?;
        let length = card.dir_size(".")?;
        let dirmode = ent.mode();
        let title = match dirmode & DF_PSX {
            0 => match card.get_icon_sys(".")? {
                Some(raw) => Some(icon::icon_sys_title(&raw,&crate::fs::AsciiEncoder)),
                None => None
            },
            _ => Some((String::new(),String::new()))
        };
        let (title0,title1) = match title {
            Some(t) => t,
            None => ("Corrupt".to_string(),String::new())
        };
        let mut protection = match dirmode & (DF_PROTECTED | DF_WRITE) {
            0 => "Delete Protected",
            DF_WRITE => "Not Protected",
            DF_PROTECTED => "Copy & Delete Protected",
            _ => "Copy Protected"
        };
        if dirmode & DF_PSX != 0 {
            protection = match dirmode & DF_POCKETSTN {
                0 => "PlayStation",
                _ => "PocketStation"
            };
        }
        println!("{:32} {}",name,title0);
        println!("{:4}KB {:25} {}",length / 1024,protection,title1);
        println!();
    }
    let free = card.get_free_space()? / 1024;
    println!("{} KB Free",thousands(free));
    card.close_all()
}

pub fn df(cmd: &clap::ArgMatches) -> STDRESULT {
    let mut card = open_card(cmd,false)?;
    println!("{}: {} bytes free.",image_path(cmd)?,card.get_free_space()?);
    card.close_all()
}

pub fn check(cmd: &clap::ArgMatches) -> STDRESULT {
    let mut card = open_card(cmd,false)?;
    let ok = card.check()?;
    card.close_all()?;
    if ok {
        println!("No errors found.");
        return Ok(());
    }
    Err(Box::new(CommandError::CheckFailed))
}

fn thousands(n: usize) -> String {
    if n > 999999 {
        return format!("{},{:03},{:03}",n / 1000000,n / 1000 % 1000,n % 1000);
    }
    if n > 999 {
        return format!("{},{:03}",n / 1000,n % 1000);
    }
    format!("{}",n)
}
