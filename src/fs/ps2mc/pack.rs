//! ### PS2MC packing module
//!
//! The 340 byte superblock codec plus helpers for the 32 entry cluster
//! lists it carries.  All integers little endian.

use a2kit_macro::DiskStruct;
use a2kit_macro::DiskStructError;
use a2kit_macro_derive::DiskStruct;
use super::types::MAX_INDIRECT_FAT_CLUSTERS;

pub const MAGIC: &[u8;28] = b"Sony PS2 Memory Card Format ";
pub const SUPERBLOCK_LENGTH: usize = 0x154;
pub const VERSION: &[u8;12] = b"1.2.0.0\x00\x00\x00\x00\x00";

#[derive(DiskStruct,Clone)]
pub struct Superblock {
    pub magic: [u8;28],
    pub version: [u8;12],
    pub page_size: [u8;2],
    pub pages_per_cluster: [u8;2],
    pub pages_per_erase_block: [u8;2],
    pub unknown: [u8;2],
    pub clusters_per_card: [u8;4],
    pub allocatable_cluster_offset: [u8;4],
    pub allocatable_cluster_end: [u8;4],
    pub rootdir_fat_cluster: [u8;4],
    pub good_block1: [u8;4],
    pub good_block2: [u8;4],
    pub padding: [u8;8],
    pub indirect_fat_cluster_list: [u8;128],
    pub bad_erase_block_list: [u8;128],
    pub card_type: u8,
    pub card_flags: u8,
    pub padding2: [u8;2]
}

impl Superblock {
    pub fn verify(buf: &[u8]) -> bool {
        buf.len() >= SUPERBLOCK_LENGTH && buf[0..MAGIC.len()]==MAGIC[..]
    }
    pub fn unpack_list(list: &[u8;128]) -> Vec<u32> {
        let mut ans = Vec::new();
        for i in 0..MAX_INDIRECT_FAT_CLUSTERS {
            ans.push(u32::from_le_bytes(list[i*4..i*4+4].try_into().expect("unreachable")));
        }
        ans
    }
    pub fn pack_list(vals: &[u32]) -> [u8;128] {
        let mut ans = [0;128];
        for i in 0..usize::min(vals.len(),MAX_INDIRECT_FAT_CLUSTERS) {
            ans[i*4..i*4+4].copy_from_slice(&u32::to_le_bytes(vals[i]));
        }
        ans
    }
}

pub fn unpack_fat(buf: &[u8]) -> Vec<u32> {
    let mut ans = Vec::new();
    for i in 0..buf.len()/4 {
        ans.push(u32::from_le_bytes(buf[i*4..i*4+4].try_into().expect("unreachable")));
    }
    ans
}

pub fn pack_fat(fat: &[u32]) -> Vec<u8> {
    let mut ans = Vec::new();
    for v in fat {
        ans.extend_from_slice(&u32::to_le_bytes(*v));
    }
    ans
}

#[test]
fn superblock_length() {
    let sb = Superblock::new();
    assert_eq!(sb.to_bytes().len(),SUPERBLOCK_LENGTH);
}

#[test]
fn fat_pack_round_trip() {
    let fat = vec![0x8000_0001,0xFFFF_FFFF,0x7FFF_FFFF,41];
    assert_eq!(unpack_fat(&pack_fat(&fat)),fat);
}
