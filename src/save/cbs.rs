//! ## Codebreaker (.cbs) archives
//!
//! Read-only: the tool imports Codebreaker saves but never writes them.
//! The body is RC4 encrypted with a fixed permutation, then zlib
//! deflated.  Header mode and timestamp fields are frequently wrong in
//! the wild, so zero timestamps become "now" and an implausible
//! directory mode is replaced with the usual default.

use std::io::Read;
use binrw::BinRead;
use log::debug;
use super::{SaveFile,Error};
use crate::fs::ps2mc::{Dirent,Tod,zero_terminate,mode_is_dir,mode_is_file};
use crate::fs::ps2mc::{DF_RWX,DF_DIR,DF_0400};
use crate::DYNERR;

pub const MAGIC: &[u8;4] = b"CFU\x00";

/// initial permutation for the RC4 stream cipher
const RC4_STATE: [u8;256] = [
    0x5f, 0x1f, 0x85, 0x6f, 0x31, 0xaa, 0x3b, 0x18,
    0x21, 0xb9, 0xce, 0x1c, 0x07, 0x4c, 0x9c, 0xb4,
    0x81, 0xb8, 0xef, 0x98, 0x59, 0xae, 0xf9, 0x26,
    0xe3, 0x80, 0xa3, 0x29, 0x2d, 0x73, 0x51, 0x62,
    0x7c, 0x64, 0x46, 0xf4, 0x34, 0x1a, 0xf6, 0xe1,
    0xba, 0x3a, 0x0d, 0x82, 0x79, 0x0a, 0x5c, 0x16,
    0x71, 0x49, 0x8e, 0xac, 0x8c, 0x9f, 0x35, 0x19,
    0x45, 0x94, 0x3f, 0x56, 0x0c, 0x91, 0x00, 0x0b,
    0xd7, 0xb0, 0xdd, 0x39, 0x66, 0xa1, 0x76, 0x52,
    0x13, 0x57, 0xf3, 0xbb, 0x4e, 0xe5, 0xdc, 0xf0,
    0x65, 0x84, 0xb2, 0xd6, 0xdf, 0x15, 0x3c, 0x63,
    0x1d, 0x89, 0x14, 0xbd, 0xd2, 0x36, 0xfe, 0xb1,
    0xca, 0x8b, 0xa4, 0xc6, 0x9e, 0x67, 0x47, 0x37,
    0x42, 0x6d, 0x6a, 0x03, 0x92, 0x70, 0x05, 0x7d,
    0x96, 0x2f, 0x40, 0x90, 0xc4, 0xf1, 0x3e, 0x3d,
    0x01, 0xf7, 0x68, 0x1e, 0xc3, 0xfc, 0x72, 0xb5,
    0x54, 0xcf, 0xe7, 0x41, 0xe4, 0x4d, 0x83, 0x55,
    0x12, 0x22, 0x09, 0x78, 0xfa, 0xde, 0xa7, 0x06,
    0x08, 0x23, 0xbf, 0x0f, 0xcc, 0xc1, 0x97, 0x61,
    0xc5, 0x4a, 0xe6, 0xa0, 0x11, 0xc2, 0xea, 0x74,
    0x02, 0x87, 0xd5, 0xd1, 0x9d, 0xb7, 0x7e, 0x38,
    0x60, 0x53, 0x95, 0x8d, 0x25, 0x77, 0x10, 0x5e,
    0x9b, 0x7f, 0xd8, 0x6e, 0xda, 0xa2, 0x2e, 0x20,
    0x4f, 0xcd, 0x8f, 0xcb, 0xbe, 0x5a, 0xe0, 0xed,
    0x2c, 0x9a, 0xd4, 0xe2, 0xaf, 0xd0, 0xa9, 0xe8,
    0xad, 0x7a, 0xbc, 0xa8, 0xf2, 0xee, 0xeb, 0xf5,
    0xa6, 0x99, 0x28, 0x24, 0x6c, 0x2b, 0x75, 0x5d,
    0xf8, 0xd3, 0x86, 0x17, 0xfb, 0xc0, 0x7b, 0xb3,
    0x58, 0xdb, 0xc7, 0x4b, 0xff, 0x04, 0x50, 0xe9,
    0x88, 0x69, 0xc9, 0x2a, 0xab, 0xfd, 0x5b, 0x1b,
    0x8a, 0xd9, 0xec, 0x27, 0x44, 0x0e, 0x33, 0xc8,
    0x6b, 0x93, 0x32, 0x48, 0xb6, 0x30, 0x43, 0xa5
];

/// RC4 keystream over the fixed permutation, applied in place.
/// The stream starts at index 1, matching the console tools.
fn rc4_crypt(t: &mut [u8]) {
    let mut s = RC4_STATE;
    let mut j: usize = 0;
    for ii in 0..t.len() {
        let i = (ii + 1) % 256;
        j = (j + s[i] as usize) % 256;
        s.swap(i,j);
        t[ii] ^= s[(s[i] as usize + s[j] as usize) % 256];
    }
}

#[derive(BinRead)]
#[br(little,magic = b"CFU\x00")]
struct CbsHeader {
    _unknown: u32,
    header_length: u32,
    uncompressed_length: u32,
    body_length: u32,
    dirname: [u8;32],
    created: [u8;8],
    modified: [u8;8],
    _unknown2: u32,
    _unknown3: u32,
    dirmode: u32,
    _unknown4: u32,
    _unknown5: u32,
    _unknown6: u32
}

/// the fixed part of the header, title text follows out to `header_length`
const CBS_FIXED_HEADER: usize = 92;

pub fn load(dat: &[u8]) -> Result<SaveFile,DYNERR> {
    let mut curs = binrw::io::Cursor::new(dat);
    let hdr = match CbsHeader::read(&mut curs) {
        Ok(h) => h,
        Err(_) => return Err(Box::new(Error::Corrupt("not a Codebreaker save file".to_string())))
    };
    let hlen = hdr.header_length as usize;
    if hlen < CBS_FIXED_HEADER + 32 {
        return Err(Box::new(Error::Corrupt("header length too short".to_string())));
    }
    if dat.len() < hlen {
        return Err(Box::new(Error::Truncated));
    }
    let flen = hdr.body_length as usize;
    let avail = dat.len() - hlen;
    let clen = usize::min(flen,avail);
    // flen is sometimes the whole file length rather than the body length
    if clen != flen && clen != flen.saturating_sub(hlen) {
        return Err(Box::new(Error::Truncated));
    }
    let mut body = dat[hlen..hlen+clen].to_vec();
    rc4_crypt(&mut body);
    let mut inflated: Vec<u8> = Vec::new();
    let dec = flate2::read::ZlibDecoder::new(&body[..]);
    if let Err(e) = dec.take(hdr.uncompressed_length as u64).read_to_end(&mut inflated) {
        debug!("inflate failed: {}",e);
        return Err(Box::new(Error::Corrupt("could not decompress body".to_string())));
    }
    let mut files: Vec<(Dirent,Vec<u8>)> = Vec::new();
    let mut off: usize = 0;
    while off < inflated.len() {
        if inflated.len() - off < 64 {
            return Err(Box::new(Error::Truncated));
        }
        let created = Tod::unpack(&inflated[off..off+8]);
        let modified = Tod::unpack(&inflated[off+8..off+16]);
        let size = u32::from_le_bytes(inflated[off+16..off+20].try_into().expect("unreachable")) as usize;
        let mode = u16::from_le_bytes(inflated[off+20..off+22].try_into().expect("unreachable"));
        let name = zero_terminate(&inflated[off+32..off+64]).to_vec();
        off += 64;
        if inflated.len() - off < size {
            return Err(Box::new(Error::Truncated));
        }
        let data = inflated[off..off+size].to_vec();
        off += size;
        if !mode_is_file(mode) {
            return Err(Box::new(Error::Subdirectory));
        }
        let created = fix_tod(created);
        let modified = fix_tod(modified);
        let mut ent = Dirent::create(mode,size as u32,0,0,created,&name);
        ent.modified = modified.pack();
        files.push((ent,data));
    }
    // header fields are not reliable, replace implausible values
    let mut dirmode = hdr.dirmode as u16;
    if !mode_is_dir(dirmode) {
        debug!("implausible directory mode {:04X}, using default",dirmode);
        dirmode = DF_RWX | DF_DIR | DF_0400;
    }
    let created = fix_tod(Tod::unpack(&hdr.created));
    let modified = fix_tod(Tod::unpack(&hdr.modified));
    let mut dir_ent = Dirent::create(dirmode,files.len() as u32,0,0,created,
        zero_terminate(&hdr.dirname));
    dir_ent.modified = modified.pack();
    let mut sf = SaveFile::new();
    sf.set_directory(dir_ent);
    for (ent,data) in files {
        sf.push_file(ent,data);
    }
    Ok(sf)
}

fn fix_tod(tod: Tod) -> Tod {
    match tod.timestamp() {
        0 => Tod::now(),
        _ => tod
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use crate::fs::ps2mc::{DF_FILE,DF_EXISTS};

    fn build_archive(flen_is_whole_file: bool) -> Vec<u8> {
        let tod = Tod { sec: 7, min: 8, hour: 9, mday: 10, month: 11, year: 2003 };
        let mut body: Vec<u8> = Vec::new();
        body.extend_from_slice(&tod.pack());
        body.extend_from_slice(&tod.pack());
        body.extend_from_slice(&u32::to_le_bytes(4));
        body.extend_from_slice(&u16::to_le_bytes(DF_RWX | DF_FILE | DF_0400 | DF_EXISTS));
        body.extend_from_slice(&[0;2]);
        body.extend_from_slice(&[0;8]);
        let mut name = [0u8;32];
        name[0..8].copy_from_slice(b"save.dat");
        body.extend_from_slice(&name);
        body.extend_from_slice(b"data");
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(),flate2::Compression::default());
        enc.write_all(&body).expect("deflate failed");
        let mut deflated = enc.finish().expect("deflate failed");
        rc4_crypt(&mut deflated);
        let hlen: u32 = 128;
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&u32::to_le_bytes(0));
        out.extend_from_slice(&u32::to_le_bytes(hlen));
        out.extend_from_slice(&u32::to_le_bytes(body.len() as u32));
        let flen = match flen_is_whole_file {
            true => deflated.len() as u32 + hlen,
            false => deflated.len() as u32
        };
        out.extend_from_slice(&u32::to_le_bytes(flen));
        let mut dirname = [0u8;32];
        dirname[0..4].copy_from_slice(b"TEST");
        out.extend_from_slice(&dirname);
        out.extend_from_slice(&[0;8]);
        out.extend_from_slice(&[0;8]);
        out.extend_from_slice(&u32::to_le_bytes(0));
        out.extend_from_slice(&u32::to_le_bytes(0));
        out.extend_from_slice(&u32::to_le_bytes(0));
        out.extend_from_slice(&u32::to_le_bytes(0));
        out.extend_from_slice(&u32::to_le_bytes(0));
        out.extend_from_slice(&u32::to_le_bytes(0));
        out.resize(hlen as usize,0);
        out.extend_from_slice(&deflated);
        out
    }

    #[test]
    fn load_with_body_length() {
        let img = build_archive(false);
        assert_eq!(super::super::detect_file_type(&img),Some(super::super::SaveType::Cbs));
        let sf = load(&img).expect("load failed");
        assert_eq!(sf.dirent().name(),b"TEST");
        // zero header stamps get replaced, mode gets the default
        assert!(mode_is_dir(sf.dirent().mode()));
        assert_eq!(sf.count(),1);
        assert_eq!(sf.file(0).0.name(),b"save.dat");
        assert_eq!(sf.file(0).1,b"data");
        assert_eq!(sf.file(0).0.modified().year,2003);
    }

    #[test]
    fn load_with_whole_file_length() {
        let img = build_archive(true);
        let sf = load(&img).expect("load failed");
        assert_eq!(sf.count(),1);
        assert_eq!(sf.file(0).1,b"data");
    }
}
