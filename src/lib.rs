//! # `ps2kit` main library
//!
//! This library manipulates PlayStation 2 memory card images and the
//! save archives that move saves on and off them.
//!
//! ## Architecture
//!
//! Card operations are built around three layers:
//! * `img::CardImage` reads and writes raw pages with their ECC spare
//!   bytes, it does not try to interpret a file system
//! * `fs::ps2mc::Card` imposes the card's FAT-like file system on the
//!   image it owns
//! * `save::SaveFile` is an in-memory save that can be moved between the
//!   file system and any of the external archive formats
//!
//! When a `Card` is created it takes ownership of some stream, usually a
//! file.  Changes pass through write-back caches and become permanent on
//! `flush` (closing a file handle also flushes).
//!
//! ## Save Archives
//!
//! As of this writing `ps2kit` reads
//! * EMS (.psu)
//! * MAX Drive (.max)
//! * Codebreaker (.cbs)
//! * SharkPort/X-Port (.sps)
//!
//! and writes the first two.  MAX Drive archives use the LZARI codec in
//! `lzari`; the ECC scheme lives in `ecc`.

pub mod ecc;
pub mod lzari;
pub mod img;
pub mod fs;
pub mod save;
pub mod commands;

use std::fmt::Write;
use log::warn;
use regex::Regex;

type DYNERR = Box<dyn std::error::Error>;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

pub fn div_round_up(a: usize,b: usize) -> usize {
    (a + b - 1) / b
}

pub fn round_up(a: usize,b: usize) -> usize {
    (a + b - 1) / b * b
}

pub fn round_down(a: usize,b: usize) -> usize {
    a / b * b
}

/// Open the card file system on a local image file.
pub fn create_card_from_file(img_path: &str,writable: bool,ignore_ecc: bool) -> Result<fs::ps2mc::Card,DYNERR> {
    let f = std::fs::OpenOptions::new().read(true).write(writable).open(img_path)?;
    fs::ps2mc::Card::from_stream(Box::new(f),ignore_ecc,None)
}

/// This takes any bytes and makes an ascii friendly string by using hex
/// escapes, e.g., `\xFF`.  Control characters are escaped too.  This is
/// intended for directory strings and icon titles.
pub fn escaped_ascii_from_bytes(bytes: &[u8]) -> String {
    let mut result = String::new();
    for i in 0..bytes.len() {
        if bytes[i] >= 0x20 && bytes[i] <= 0x7e {
            result += std::str::from_utf8(&[bytes[i]]).expect("unreachable");
        } else {
            let mut temp = String::new();
            write!(&mut temp,"\\x{:02X}",bytes[i]).expect("unreachable");
            result += &temp;
        }
    }
    return result;
}

/// Interpret a UTF8 string as pure ascii and put into bytes.
/// Non-ascii characters are omitted from the result, but arbitrary
/// bytes can be introduced using escapes, e.g., `\xFF`.
/// Literal hex escapes are created by coding the backslash, e.g., `\x5CxFF`.
pub fn parse_escaped_ascii(s: &str) -> Vec<u8> {
    let mut ans: Vec<u8> = Vec::new();
    let hex_patt = Regex::new(r"\\x[0-9A-Fa-f][0-9A-Fa-f]").expect("unreachable");
    let mut hexes = hex_patt.find_iter(s);
    let mut maybe_hex = hexes.next();
    let mut curs = 0;
    let mut skip = 0;
    for c in s.chars() {
        if skip > 0 {
            skip -= 1;
            continue;
        }
        if let Some(hex) = maybe_hex {
            if curs==hex.start() {
                match s.get(curs+2..curs+4).map(|h| hex::decode(h)) {
                    Some(Ok(mut bytes)) => ans.append(&mut bytes),
                    _ => warn!("could not parse hex escape")
                }
                curs += 4;
                maybe_hex = hexes.next();
                skip = 3;
                continue;
            }
        }
        if c.is_ascii() {
            let mut buf: [u8;1] = [0;1];
            c.encode_utf8(&mut buf);
            ans.push(buf[0]);
        }
        curs += 1;
    }
    return ans;
}

#[test]
fn test_rounding() {
    assert_eq!(div_round_up(3000,1024),3);
    assert_eq!(div_round_up(1024,1024),1);
    assert_eq!(round_up(3000,1024),3072);
    assert_eq!(round_up(0,1024),0);
    assert_eq!(round_down(3000,1024),2048);
}

#[test]
fn test_escaped_ascii() {
    assert_eq!(escaped_ascii_from_bytes(b"icon.sys"),"icon.sys");
    assert_eq!(escaped_ascii_from_bytes(&[0x41,0x00,0xFF]),"A\\x00\\xFF");
    assert_eq!(parse_escaped_ascii("A\\x00\\xFF"),vec![0x41,0x00,0xFF]);
    assert_eq!(parse_escaped_ascii("plain"),b"plain".to_vec());
}
