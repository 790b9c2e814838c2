//! ## SharkPort/X-Port (.sps) archives
//!
//! Read-only, like the Codebreaker reader.  The format is a small
//! prologue of length prefixed strings followed by one header block per
//! entry.  Mode fields were written byte swapped by the original tool
//! and have to be swapped back.  The trailing 4 byte checksum is ignored.

use binrw::BinRead;
use log::{debug,trace};
use super::{SaveFile,Error,read_fixed,read_long_string};
use crate::fs::ps2mc::{Dirent,Tod,zero_terminate,mode_is_dir,mode_is_file};
use crate::DYNERR;

pub const MAGIC: &[u8;17] = b"\x0d\x00\x00\x00SharkPortSave";

/// the fixed 98 byte part of an entry header; `header_length` counts
/// extra bytes to skip past
#[derive(BinRead)]
#[br(little)]
struct SpsEntry {
    header_length: u16,
    name: [u8;64],
    length: u32,
    #[br(pad_before = 8)]
    mode: u16,
    #[br(pad_before = 2)]
    created: [u8;8],
    modified: [u8;8]
}

const SPS_FIXED_HEADER: usize = 98;

fn read_entry(dat: &[u8],ptr: &mut usize) -> Result<SpsEntry,DYNERR> {
    let raw = read_fixed(dat,ptr,SPS_FIXED_HEADER)?;
    let mut curs = binrw::io::Cursor::new(raw);
    match SpsEntry::read(&mut curs) {
        Ok(e) => Ok(e),
        Err(_) => Err(Box::new(Error::Truncated))
    }
}

pub fn load(dat: &[u8]) -> Result<SaveFile,DYNERR> {
    let mut ptr: usize = 0;
    if read_fixed(dat,&mut ptr,MAGIC.len())? != MAGIC {
        return Err(Box::new(Error::Corrupt("not a SharkPort/X-Port save file".to_string())));
    }
    let savetype = u32::from_le_bytes(read_fixed(dat,&mut ptr,4)?.try_into().expect("unreachable"));
    trace!("save type {}",savetype);
    let _dirname = read_long_string(dat,&mut ptr)?;
    let datestamp = read_long_string(dat,&mut ptr)?;
    let comment = read_long_string(dat,&mut ptr)?;
    trace!("datestamp {}, comment {}",
        crate::fs::display_name(datestamp),crate::fs::display_name(comment));
    let _total = u32::from_le_bytes(read_fixed(dat,&mut ptr,4)?.try_into().expect("unreachable"));
    let dir = read_entry(dat,&mut ptr)?;
    read_fixed(dat,&mut ptr,(dir.header_length as usize).saturating_sub(SPS_FIXED_HEADER))?;
    // mode fields were stored byte swapped
    let dirmode = dir.mode.swap_bytes();
    if dir.length < 2 || !mode_is_dir(dirmode) {
        debug!("directory entry mode {:04X} count {}",dirmode,dir.length);
        return Err(Box::new(Error::Corrupt("bad values in directory entry".to_string())));
    }
    let count = dir.length - 2;
    let mut dir_ent = Dirent::create(dirmode,count,0,0,Tod::unpack(&dir.created),
        zero_terminate(&dir.name));
    dir_ent.modified = Tod::unpack(&dir.modified).pack();
    let mut sf = SaveFile::new();
    sf.set_directory(dir_ent);
    for _i in 0..count {
        let entry = read_entry(dat,&mut ptr)?;
        if (entry.header_length as usize) < SPS_FIXED_HEADER {
            return Err(Box::new(Error::Corrupt("header length too short".to_string())));
        }
        read_fixed(dat,&mut ptr,entry.header_length as usize - SPS_FIXED_HEADER)?;
        let mode = entry.mode.swap_bytes();
        if !mode_is_file(mode) {
            return Err(Box::new(Error::Subdirectory));
        }
        let data = read_fixed(dat,&mut ptr,entry.length as usize)?.to_vec();
        let mut ent = Dirent::create(mode,entry.length,0,0,Tod::unpack(&entry.created),
            zero_terminate(&entry.name));
        ent.modified = Tod::unpack(&entry.modified).pack();
        sf.push_file(ent,data);
    }
    // 4 byte checksum at the end is ignored
    Ok(sf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ps2mc::{DF_RWX,DF_DIR,DF_FILE,DF_0400,DF_EXISTS};

    fn push_entry(out: &mut Vec<u8>,name: &[u8],length: u32,mode: u16,tod: &Tod) {
        out.extend_from_slice(&u16::to_le_bytes(SPS_FIXED_HEADER as u16));
        let mut n = [0u8;64];
        n[0..name.len()].copy_from_slice(name);
        out.extend_from_slice(&n);
        out.extend_from_slice(&u32::to_le_bytes(length));
        out.extend_from_slice(&[0;8]);
        out.extend_from_slice(&u16::to_le_bytes(mode.swap_bytes()));
        out.extend_from_slice(&[0;2]);
        out.extend_from_slice(&tod.pack());
        out.extend_from_slice(&tod.pack());
    }

    #[test]
    fn load_archive() {
        let tod = Tod { sec: 3, min: 4, hour: 5, mday: 6, month: 7, year: 2004 };
        let mut img = Vec::new();
        img.extend_from_slice(MAGIC);
        img.extend_from_slice(&u32::to_le_bytes(2));
        for s in [&b"BASLUS-21000"[..],&b"07/06/2004"[..],&b"no comment"[..]] {
            img.extend_from_slice(&u32::to_le_bytes(s.len() as u32));
            img.extend_from_slice(s);
        }
        img.extend_from_slice(&u32::to_le_bytes(0));
        push_entry(&mut img,b"BASLUS-21000",3,DF_RWX | DF_DIR | DF_0400 | DF_EXISTS,&tod);
        push_entry(&mut img,b"save.dat",6,DF_RWX | DF_FILE | DF_0400 | DF_EXISTS,&tod);
        img.extend_from_slice(b"shark!");
        img.extend_from_slice(&[0;4]);
        assert_eq!(super::super::detect_file_type(&img),Some(super::super::SaveType::Sps));
        let sf = load(&img).expect("load failed");
        assert_eq!(sf.dirent().name(),b"BASLUS-21000");
        assert_eq!(sf.dirent().length(),1);
        assert_eq!(sf.count(),1);
        assert_eq!(sf.file(0).0.name(),b"save.dat");
        assert_eq!(sf.file(0).1,b"shark!");
        assert_eq!(sf.file(0).0.created(),tod);
    }
}
