//! ### PS2MC directory structures
//!
//! The 512 byte directory entry and its 8 byte time of day stamps.
//! Directory contents are just packed sequences of these entries; the
//! engine in the parent module walks them through the cluster chain.

use chrono::{Datelike,Timelike};
use super::types::*;

// a2kit_macro automatically derives `new`, `to_bytes`, `from_bytes`, and `length` from a DiskStruct.
// This spares us having to manually write code to copy bytes in and out for every new structure.
use a2kit_macro::DiskStruct;
use a2kit_macro::DiskStructError;
use a2kit_macro_derive::DiskStruct;

/// Time of day as stored on the card: packed fields, Japan Standard Time.
/// The year is stored little endian like every other integer on the card.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub struct Tod {
    pub sec: u8,
    pub min: u8,
    pub hour: u8,
    pub mday: u8,
    pub month: u8,
    pub year: u16
}

impl Tod {
    pub fn unpack(raw: &[u8]) -> Self {
        Self {
            sec: raw[1],
            min: raw[2],
            hour: raw[3],
            mday: raw[4],
            month: raw[5],
            year: u16::from_le_bytes([raw[6],raw[7]])
        }
    }
    pub fn pack(&self) -> [u8;8] {
        let y = u16::to_le_bytes(self.year);
        [0,self.sec,self.min,self.hour,self.mday,self.month,y[0],y[1]]
    }
    /// current time in JST
    pub fn now() -> Self {
        let jst = chrono::Utc::now() + chrono::Duration::hours(9);
        Self {
            sec: jst.second() as u8,
            min: jst.minute() as u8,
            hour: jst.hour() as u8,
            mday: jst.day() as u8,
            month: jst.month() as u8,
            year: jst.year() as u16
        }
    }
    /// Unix time, or 0 if the stamp does not name a real moment.
    /// A month of 0 is read as January.
    pub fn timestamp(&self) -> i64 {
        let month = match self.month {
            0 => 1,
            m => m
        };
        let maybe = chrono::NaiveDate::from_ymd_opt(self.year as i32,month as u32,self.mday as u32)
            .and_then(|d| d.and_hms_opt(self.hour as u32,self.min as u32,self.sec as u32));
        match maybe {
            Some(naive) => naive.and_utc().timestamp() - 9 * 3600,
            None => 0
        }
    }
    /// rendered in the host's local time zone
    pub fn display_local(&self) -> String {
        match chrono::DateTime::from_timestamp(self.timestamp(),0) {
            Some(utc) => utc.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string(),
            None => "????-??-?? ??:??:??".to_string()
        }
    }
}

#[derive(DiskStruct,Clone)]
pub struct Dirent {
    pub mode: [u8;2],
    pub unknown: [u8;2],
    /// bytes for a file, entry count for a directory
    pub length: [u8;4],
    pub created: [u8;8],
    /// first cluster of a file, dirloc cluster in a dot entry
    pub cluster: [u8;4],
    /// entry index within the parent, kept in the dot entry
    pub dir_entry: [u8;4],
    pub modified: [u8;8],
    pub attr: [u8;4],
    pub padding: [u8;28],
    /// NUL terminated, 32 bytes is the practical limit
    pub name: [u8;448]
}

impl Dirent {
    pub fn create(mode: u16,length: u32,cluster: u32,dir_entry: u32,tod: Tod,name: &[u8]) -> Self {
        let mut ans = Self::new();
        ans.set_mode(mode);
        ans.set_length(length);
        ans.set_cluster(cluster);
        ans.set_dir_entry(dir_entry);
        ans.created = tod.pack();
        ans.modified = tod.pack();
        ans.set_name(name);
        ans
    }
    pub fn mode(&self) -> u16 {
        u16::from_le_bytes(self.mode)
    }
    pub fn set_mode(&mut self,mode: u16) {
        self.mode = u16::to_le_bytes(mode);
    }
    pub fn length(&self) -> u32 {
        u32::from_le_bytes(self.length)
    }
    pub fn set_length(&mut self,length: u32) {
        self.length = u32::to_le_bytes(length);
    }
    pub fn cluster(&self) -> u32 {
        u32::from_le_bytes(self.cluster)
    }
    pub fn set_cluster(&mut self,cluster: u32) {
        self.cluster = u32::to_le_bytes(cluster);
    }
    pub fn dir_entry(&self) -> u32 {
        u32::from_le_bytes(self.dir_entry)
    }
    pub fn set_dir_entry(&mut self,entry: u32) {
        self.dir_entry = u32::to_le_bytes(entry);
    }
    pub fn attr(&self) -> u32 {
        u32::from_le_bytes(self.attr)
    }
    pub fn set_attr(&mut self,attr: u32) {
        self.attr = u32::to_le_bytes(attr);
    }
    pub fn created(&self) -> Tod {
        Tod::unpack(&self.created)
    }
    pub fn modified(&self) -> Tod {
        Tod::unpack(&self.modified)
    }
    /// name bytes up to the first NUL
    pub fn name(&self) -> &[u8] {
        zero_terminate(&self.name)
    }
    /// truncates to 32 bytes, the card browser shows no more
    pub fn set_name(&mut self,name: &[u8]) {
        self.name = [0;448];
        let n = usize::min(name.len(),32);
        self.name[0..n].copy_from_slice(&name[0..n]);
    }
    pub fn is_file(&self) -> bool {
        mode_is_file(self.mode())
    }
    pub fn is_dir(&self) -> bool {
        mode_is_dir(self.mode())
    }
    pub fn exists(&self) -> bool {
        self.mode() & DF_EXISTS != 0
    }
}

/// Partial update of a directory entry; `None` fields are left alone.
#[derive(Default,Clone)]
pub struct DirentUpdate {
    pub mode: Option<u16>,
    pub unknown: Option<u16>,
    pub length: Option<u32>,
    pub created: Option<Tod>,
    pub cluster: Option<u32>,
    pub modified: Option<Tod>,
    pub attr: Option<u32>
}

/// Truncate a byte string at the first NUL, if any.
pub fn zero_terminate(s: &[u8]) -> &[u8] {
    match s.iter().position(|b| *b==0) {
        Some(i) => &s[0..i],
        None => s
    }
}

#[test]
fn dirent_round_trip() {
    let tod = Tod { sec: 30, min: 15, hour: 7, mday: 4, month: 6, year: 2004 };
    let ent = Dirent::create(DF_RWX | DF_FILE | DF_0400 | DF_EXISTS,3000,17,5,tod,b"icon.sys");
    let img = ent.to_bytes();
    assert_eq!(img.len(),DIRENT_LENGTH);
    let back = Dirent::from_bytes(&img).expect("bad length");
    assert_eq!(back.mode(),DF_RWX | DF_FILE | DF_0400 | DF_EXISTS);
    assert_eq!(back.length(),3000);
    assert_eq!(back.cluster(),17);
    assert_eq!(back.dir_entry(),5);
    assert_eq!(back.created(),tod);
    assert_eq!(back.name(),b"icon.sys");
}

#[test]
fn tod_epoch() {
    let zero = Tod::unpack(&[0;8]);
    assert_eq!(zero.timestamp(),0);
    let known = Tod { sec: 0, min: 0, hour: 9, mday: 1, month: 1, year: 1970 };
    assert_eq!(known.timestamp(),0);
}
