//! ## MAX Drive (.max) archives
//!
//! A 92 byte header carrying a CRC-32, then an LZARI compressed body.
//! The body is a packed list of (length, 32 byte name, data) with the
//! data aligned so that each length field lands 8 bytes before a 16 byte
//! boundary.  Timestamps are not stored; loads are stamped "now".
//!
//! Some archives in the wild store the uncompressed size where the
//! compressed size belongs; when the two fields agree the rest of the
//! file is taken to be the compressed stream.

use binrw::BinRead;
use log::{debug,trace};
use super::{SaveFile,Error,read_fixed,crc32,icon};
use crate::fs::ps2mc::{Dirent,Tod,zero_terminate};
use crate::fs::ps2mc::{DF_RWX,DF_DIR,DF_FILE,DF_0400,DF_EXISTS};
use crate::lzari;
use crate::{DYNERR,round_up};

pub const MAGIC: &[u8;12] = b"Ps2PowerSave";
const HEADER_LENGTH: usize = 0x5C;

#[derive(BinRead)]
#[br(little,magic = b"Ps2PowerSave")]
struct MaxHeader {
    crc: u32,
    dirname: [u8;32],
    iconsysname: [u8;32],
    compressed_length: u32,
    dirent_count: u32,
    uncompressed_length: u32
}

pub fn load(dat: &[u8]) -> Result<SaveFile,DYNERR> {
    let mut curs = binrw::io::Cursor::new(dat);
    let hdr = match MaxHeader::read(&mut curs) {
        Ok(h) => h,
        Err(_) => return Err(Box::new(Error::Corrupt("not a MAX Drive save file".to_string())))
    };
    trace!("stored crc {:08X}, icon label {}",hdr.crc,
        crate::fs::display_name(zero_terminate(&hdr.iconsysname)));
    let body: &[u8];
    if hdr.compressed_length==hdr.uncompressed_length {
        // some saves store the uncompressed size here instead
        debug!("length fields agree, reading remainder as compressed stream");
        body = &dat[HEADER_LENGTH..];
    } else {
        if (hdr.compressed_length as usize) < 4 {
            return Err(Box::new(Error::Corrupt("bad compressed length".to_string())));
        }
        let mut ptr = HEADER_LENGTH;
        body = read_fixed(dat,&mut ptr,hdr.compressed_length as usize - 4)?;
    }
    let timestamp = Tod::now();
    let mut sf = SaveFile::new();
    sf.set_directory(Dirent::create(DF_RWX | DF_DIR | DF_0400 | DF_EXISTS,
        hdr.dirent_count,0,0,timestamp,zero_terminate(&hdr.dirname)));
    let s = lzari::decode(body,hdr.uncompressed_length as usize)?;
    let mut off: usize = 0;
    for _i in 0..hdr.dirent_count {
        if s.len() < off + 36 {
            return Err(Box::new(Error::Truncated));
        }
        let l = u32::from_le_bytes(s[off..off+4].try_into().expect("unreachable")) as usize;
        let name = zero_terminate(&s[off+4..off+36]).to_vec();
        off += 36;
        if s.len() < off + l {
            return Err(Box::new(Error::Truncated));
        }
        let data = s[off..off+l].to_vec();
        sf.push_file(Dirent::create(DF_RWX | DF_FILE | DF_0400 | DF_EXISTS,
            l as u32,0,0,timestamp,&name),data);
        off += l;
        off = round_up(off + 8,16) - 8;
    }
    Ok(sf)
}

pub fn save(sf: &SaveFile) -> Result<Vec<u8>,DYNERR> {
    let mut iconsysname = String::new();
    if let Some(raw) = sf.icon_sys() {
        let (title0,title1) = icon::icon_sys_title(raw,&crate::fs::AsciiEncoder);
        if title0.len() > 0 && !title0.ends_with(' ') {
            iconsysname = [title0," ".to_string(),title1.trim().to_string()].concat();
        } else {
            iconsysname = [title0,title1.trim_end().to_string()].concat();
        }
    }
    let dirent = sf.dirent();
    let mut s: Vec<u8> = Vec::new();
    for i in 0..sf.count() {
        let (ent,data) = sf.file(i);
        if !ent.is_file() {
            return Err(Box::new(Error::Subdirectory));
        }
        s.extend_from_slice(&u32::to_le_bytes(ent.length()));
        let mut name = [0u8;32];
        let n = usize::min(ent.name().len(),32);
        name[0..n].copy_from_slice(&ent.name()[0..n]);
        s.extend_from_slice(&name);
        s.extend_from_slice(data);
        let padded = round_up(s.len() + 8,16) - 8;
        s.resize(padded,0);
    }
    let length = s.len();
    let compressed = lzari::encode(&s);
    let mut hdr = Vec::new();
    hdr.extend_from_slice(MAGIC);
    hdr.extend_from_slice(&u32::to_le_bytes(0));
    let mut name = [0u8;32];
    let n = usize::min(dirent.name().len(),32);
    name[0..n].copy_from_slice(&dirent.name()[0..n]);
    hdr.extend_from_slice(&name);
    let mut iname = [0u8;32];
    let ibytes = iconsysname.as_bytes();
    let n = usize::min(ibytes.len(),32);
    iname[0..n].copy_from_slice(&ibytes[0..n]);
    hdr.extend_from_slice(&iname);
    hdr.extend_from_slice(&u32::to_le_bytes(compressed.len() as u32 + 4));
    hdr.extend_from_slice(&u32::to_le_bytes(sf.count() as u32));
    hdr.extend_from_slice(&u32::to_le_bytes(length as u32));
    let mut crc = crc32(0,&hdr);
    crc = crc32(crc,&compressed);
    hdr[12..16].copy_from_slice(&u32::to_le_bytes(crc));
    hdr.append(&mut compressed.clone());
    Ok(hdr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let tod = Tod { sec: 0, min: 0, hour: 12, mday: 1, month: 1, year: 2006 };
        let mut sf = SaveFile::new();
        sf.set_directory(Dirent::create(DF_RWX | DF_DIR | DF_0400 | DF_EXISTS,2,0,0,tod,b"BASLUS-20000"));
        sf.push_file(Dirent::create(DF_RWX | DF_FILE | DF_0400 | DF_EXISTS,512,0,0,tod,b"X"),
            vec![0x42;512]);
        sf.push_file(Dirent::create(DF_RWX | DF_FILE | DF_0400 | DF_EXISTS,7,0,0,tod,b"save.dat"),
            b"consume".to_vec());
        let img = save(&sf).expect("save failed");
        assert_eq!(&img[0..12],MAGIC);
        assert_eq!(super::super::detect_file_type(&img),Some(super::super::SaveType::Max));
        let back = load(&img).expect("load failed");
        assert_eq!(back.dirent().name(),b"BASLUS-20000");
        assert_eq!(back.count(),2);
        assert_eq!(back.file(0).0.name(),b"X");
        assert_eq!(back.file(0).1,&vec![0x42;512][..]);
        assert_eq!(back.file(1).0.name(),b"save.dat");
        assert_eq!(back.file(1).1,b"consume");
    }

    #[test]
    fn crc_matches_body() {
        let tod = Tod { sec: 0, min: 0, hour: 0, mday: 2, month: 2, year: 2002 };
        let mut sf = SaveFile::new();
        sf.set_directory(Dirent::create(DF_RWX | DF_DIR | DF_0400 | DF_EXISTS,1,0,0,tod,b"TEST"));
        sf.push_file(Dirent::create(DF_RWX | DF_FILE | DF_0400 | DF_EXISTS,3,0,0,tod,b"f"),
            b"abc".to_vec());
        let img = save(&sf).expect("save failed");
        let stored = u32::from_le_bytes(img[12..16].try_into().unwrap());
        let mut zeroed = img.clone();
        zeroed[12..16].copy_from_slice(&[0;4]);
        let mut crc = crc32(0,&zeroed[0..0x5C]);
        crc = crc32(crc,&img[0x5C..]);
        assert_eq!(stored,crc);
    }
}
