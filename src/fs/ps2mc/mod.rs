//! ## PS2 memory card file system module
//!
//! The card is a FAT-like file system over an ECC protected page device.
//! Cluster numbers in directory entries are relative to the allocatable
//! region; the FAT itself is reached through a double indirection rooted
//! in the superblock's indirect FAT cluster list.
//!
//! `Card` is the primary interface.  It owns the `CardImage`, two LRU
//! caches (FAT clusters and allocatable clusters), and the open file
//! table.  Open files are plain slots in the table addressed by
//! `FileHandle`, so there are no ownership cycles; when a directory entry
//! changes, the engine pushes the new first cluster and length to every
//! other open handle on the same dirloc.
//!
//! One behavioral rule worth calling out: writing a file's data stamps
//! the modification time of the file *and* of the directory holding it,
//! but metadata writes to a directory stamp only the directory itself.
//! The console's own file system behaves this way.

mod types;
mod directory;
mod pack;
mod lru;

use std::collections::{HashMap,HashSet};
use std::io::{Read,Seek,SeekFrom};
use bit_vec::BitVec;
use log::{trace,debug,warn,error};
use a2kit_macro::DiskStruct;
pub use types::*;
pub use directory::{Dirent,DirentUpdate,Tod,zero_terminate};
pub use pack::{Superblock,MAGIC,SUPERBLOCK_LENGTH,VERSION};
use pack::{unpack_fat,pack_fat};
use lru::LruCache;
use super::Error;
use super::display_name;
use crate::img::{CardImage,ImageStream};
use crate::ecc::{EccCodec,TableEcc};
use crate::save::SaveFile;
use crate::{DYNERR,STDRESULT};
use crate::{div_round_up,round_up,round_down};

const FAT_CACHE_SIZE: usize = 12;
const CLUSTER_CACHE_SIZE: usize = 64;

fn corrupt(msg: &str) -> DYNERR {
    Box::new(Error::Corrupt(msg.to_string()))
}

/// Geometry for `format`.  The standard retail card is 8M with ECC.
pub struct FormatParams {
    pub with_ecc: bool,
    pub page_size: usize,
    pub pages_per_erase_block: usize,
    pub pages_per_card: usize
}

impl FormatParams {
    pub fn standard() -> Self {
        Self {
            with_ecc: true,
            page_size: STANDARD_PAGE_SIZE,
            pages_per_erase_block: STANDARD_PAGES_PER_ERASE_BLOCK,
            pages_per_card: STANDARD_PAGES_PER_CARD
        }
    }
}

/// State of one open file.  Lives in the engine's slot table; the caller
/// only ever holds the slot index.
struct OpenFile {
    dirloc: Dirloc,
    first_cluster: u32,
    length: u32,
    pos: usize,
    mode: OpenMode,
    chain: Option<ChainCursor>,
    /// one cached cluster of file data, keyed by position in the file
    buffer: Option<(usize,Vec<u8>)>,
    name: String
}

impl OpenFile {
    fn update_notify(&mut self,first_cluster: u32,length: u32) {
        if self.first_cluster != first_cluster {
            self.first_cluster = first_cluster;
            self.chain = None;
        }
        self.length = length;
        self.buffer = None;
    }
}

/// The primary interface for card operations.
pub struct Card {
    img: CardImage,
    version: [u8;12],
    page_size: usize,
    pages_per_cluster: usize,
    pages_per_erase_block: usize,
    clusters_per_card: usize,
    allocatable_cluster_offset: usize,
    allocatable_cluster_end: usize,
    rootdir_fat_cluster: usize,
    good_block1: usize,
    good_block2: usize,
    indirect_fat_cluster_list: Vec<u32>,
    bad_erase_block_list: Vec<u32>,
    cluster_size: usize,
    entries_per_cluster: usize,
    allocatable_cluster_limit: usize,
    modified: bool,
    fat_cache: LruCache<usize,(Vec<u32>,bool)>,
    alloc_cache: LruCache<usize,(Vec<u8>,bool)>,
    fat_cursor: usize,
    curdir: Dirloc,
    files: Vec<Option<OpenFile>>,
    open_map: HashMap<Dirloc,HashSet<usize>>
}

impl Card {
    /// Open an existing image, or format a new one if the superblock is
    /// missing and `params` were given.  The card takes ownership of the
    /// stream.  Uses the table driven ECC codec.
    pub fn from_stream(stream: Box<dyn ImageStream>,ignore_ecc: bool,
                       params: Option<FormatParams>) -> Result<Card,DYNERR> {
        Self::from_stream_with_codec(stream,Box::new(TableEcc::new()),ignore_ecc,params)
    }
    /// Same as `from_stream` with an explicit ECC implementation.
    pub fn from_stream_with_codec(mut stream: Box<dyn ImageStream>,codec: Box<dyn EccCodec>,
                                  ignore_ecc: bool,params: Option<FormatParams>) -> Result<Card,DYNERR> {
        stream.seek(SeekFrom::Start(0))?;
        let mut probe = vec![0;SUPERBLOCK_LENGTH];
        let mut count = 0;
        while count < probe.len() {
            match stream.read(&mut probe[count..])? {
                0 => break,
                n => count += n
            }
        }
        if count != SUPERBLOCK_LENGTH || !Superblock::verify(&probe) {
            let params = match params {
                Some(p) => p,
                None => {
                    error!("not a PS2 memory card image");
                    return Err(corrupt("not a PS2 memory card image"));
                }
            };
            if params.page_size < DIRENT_LENGTH || params.page_size==0
                || CLUSTER_SIZE % params.page_size != 0 {
                return Err(corrupt("invalid page size"));
            }
            let img = CardImage::new(stream,codec,params.page_size,
                CLUSTER_SIZE/params.page_size,params.with_ecc,!params.with_ecc);
            let mut card = Self::bare(img);
            card.format(&params)?;
            card.check_root()?;
            return Ok(card);
        }
        let sb = Superblock::from_bytes(&probe).expect("unreachable");
        let page_size = u16::from_le_bytes(sb.page_size) as usize;
        let pages_per_cluster = u16::from_le_bytes(sb.pages_per_cluster) as usize;
        if page_size==0 || pages_per_cluster==0 {
            return Err(corrupt("superblock geometry is zero"));
        }
        let mut img = CardImage::new(stream,codec,page_size,pages_per_cluster,true,false);
        if ignore_ecc {
            img.set_ignore_ecc(true);
        }
        let mut card = Self::bare(img);
        card.version = sb.version;
        card.page_size = page_size;
        card.pages_per_cluster = pages_per_cluster;
        card.pages_per_erase_block = u16::from_le_bytes(sb.pages_per_erase_block) as usize;
        card.clusters_per_card = u32::from_le_bytes(sb.clusters_per_card) as usize;
        card.allocatable_cluster_offset = u32::from_le_bytes(sb.allocatable_cluster_offset) as usize;
        card.allocatable_cluster_end = u32::from_le_bytes(sb.allocatable_cluster_end) as usize;
        card.rootdir_fat_cluster = u32::from_le_bytes(sb.rootdir_fat_cluster) as usize;
        card.good_block1 = u32::from_le_bytes(sb.good_block1) as usize;
        card.good_block2 = u32::from_le_bytes(sb.good_block2) as usize;
        card.indirect_fat_cluster_list = Superblock::unpack_list(&sb.indirect_fat_cluster_list);
        card.bad_erase_block_list = Superblock::unpack_list(&sb.bad_erase_block_list);
        card.calculate_derived();
        if !ignore_ecc {
            // an image stored without spare bytes will fail the first
            // page read; fall back to the packed geometry
            if let Err(e) = card.img.read_page(0) {
                match e.downcast_ref::<crate::img::Error>() {
                    Some(crate::img::Error::EccFailure) | Some(crate::img::Error::TruncatedImage) => {
                        debug!("assuming image without spare data");
                        card.img.without_spare();
                    },
                    _ => return Err(e)
                }
            }
        }
        card.check_root()?;
        Ok(card)
    }
    fn bare(img: CardImage) -> Card {
        Card {
            img,
            version: *VERSION,
            page_size: 0,
            pages_per_cluster: 0,
            pages_per_erase_block: 0,
            clusters_per_card: 0,
            allocatable_cluster_offset: 0,
            allocatable_cluster_end: 0,
            rootdir_fat_cluster: 0,
            good_block1: 0,
            good_block2: 0,
            indirect_fat_cluster_list: vec![0;MAX_INDIRECT_FAT_CLUSTERS],
            bad_erase_block_list: vec![FAT_CHAIN_END;MAX_INDIRECT_FAT_CLUSTERS],
            cluster_size: CLUSTER_SIZE,
            entries_per_cluster: CLUSTER_SIZE/4,
            allocatable_cluster_limit: 0,
            modified: false,
            fat_cache: LruCache::new(FAT_CACHE_SIZE),
            alloc_cache: LruCache::new(CLUSTER_CACHE_SIZE),
            fat_cursor: 0,
            curdir: Dirloc::ROOT,
            files: Vec::new(),
            open_map: HashMap::new()
        }
    }
    fn calculate_derived(&mut self) {
        self.cluster_size = self.page_size * self.pages_per_cluster;
        self.entries_per_cluster = self.cluster_size / 4;
        let limit = usize::min(self.good_block1,self.good_block2)
            * self.pages_per_erase_block / self.pages_per_cluster;
        self.allocatable_cluster_limit = limit.saturating_sub(self.allocatable_cluster_offset);
    }
    fn check_root(&mut self) -> STDRESULT {
        let buf = self.read_allocatable_cluster(0)?;
        let dot = Dirent::from_bytes(&buf[0..DIRENT_LENGTH]).expect("unreachable");
        let dotdot = self.read_dirent_at(Dirloc { cluster: 0, entry: 1 })?;
        if dot.name() != b"." || dotdot.name() != b".." || !dot.is_dir() || !dotdot.is_dir() {
            return Err(corrupt("root directory damaged"));
        }
        Ok(())
    }

    // geometry accessors

    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }
    pub fn clusters_per_card(&self) -> usize {
        self.clusters_per_card
    }
    /// total amount of allocatable space in bytes
    pub fn get_allocatable_space(&self) -> usize {
        self.allocatable_cluster_limit * self.cluster_size
    }
    /// amount of free space in bytes
    pub fn get_free_space(&mut self) -> Result<usize,DYNERR> {
        let mut free = 0;
        for i in 0..self.allocatable_cluster_end {
            if self.lookup_fat(i)? & FAT_ALLOCATED_BIT == 0 {
                free += 1;
            }
        }
        Ok(free * self.cluster_size)
    }

    // superblock

    fn write_superblock(&mut self) -> STDRESULT {
        let mut sb = Superblock::new();
        sb.magic = *MAGIC;
        sb.version = self.version;
        sb.page_size = u16::to_le_bytes(self.page_size as u16);
        sb.pages_per_cluster = u16::to_le_bytes(self.pages_per_cluster as u16);
        sb.pages_per_erase_block = u16::to_le_bytes(self.pages_per_erase_block as u16);
        sb.unknown = u16::to_le_bytes(0xFF00);
        sb.clusters_per_card = u32::to_le_bytes(self.clusters_per_card as u32);
        sb.allocatable_cluster_offset = u32::to_le_bytes(self.allocatable_cluster_offset as u32);
        sb.allocatable_cluster_end = u32::to_le_bytes(self.allocatable_cluster_end as u32);
        sb.rootdir_fat_cluster = u32::to_le_bytes(self.rootdir_fat_cluster as u32);
        sb.good_block1 = u32::to_le_bytes(self.good_block1 as u32);
        sb.good_block2 = u32::to_le_bytes(self.good_block2 as u32);
        sb.indirect_fat_cluster_list = Superblock::pack_list(&self.indirect_fat_cluster_list);
        sb.bad_erase_block_list = Superblock::pack_list(&self.bad_erase_block_list);
        sb.card_type = 2;
        sb.card_flags = 0x2B;
        let mut buf = sb.to_bytes();
        buf.resize(self.page_size,0);
        self.img.write_page(0,&buf)?;
        // the backup superblock region reads as erased flash
        self.img.fill_raw_pages(self.good_block2 * self.pages_per_erase_block,
            self.pages_per_erase_block,0xFF)?;
        self.modified = false;
        Ok(())
    }
    /// Create (format) a new memory card image.
    fn format(&mut self,params: &FormatParams) -> STDRESULT {
        if params.pages_per_erase_block < 1 {
            return Err(corrupt("invalid pages per erase block"));
        }
        let page_size = params.page_size;
        let pages_per_card = round_down(params.pages_per_card,params.pages_per_erase_block);
        let cluster_size = CLUSTER_SIZE;
        let pages_per_cluster = cluster_size / page_size;
        if page_size < DIRENT_LENGTH || pages_per_cluster < 1
            || pages_per_cluster * page_size != cluster_size {
            return Err(corrupt("invalid page size"));
        }
        if params.pages_per_erase_block < pages_per_cluster {
            return Err(corrupt("invalid pages per erase block"));
        }
        let clusters_per_erase_block = params.pages_per_erase_block / pages_per_cluster;
        let erase_blocks_per_card = pages_per_card / params.pages_per_erase_block;
        if erase_blocks_per_card < 2 {
            return Err(corrupt("memory card image too small to be formatted"));
        }
        let clusters_per_card = pages_per_card / pages_per_cluster;
        let epc = cluster_size / 4;
        let good_block1 = erase_blocks_per_card - 1;
        let good_block2 = erase_blocks_per_card - 2;
        let first_ifc = div_round_up(INDIRECT_FAT_OFFSET,cluster_size);
        let mut allocatable_clusters = clusters_per_card - (first_ifc + 2);
        let mut fat_clusters = div_round_up(allocatable_clusters,epc);
        let mut indirect_fat_clusters = div_round_up(fat_clusters,epc);
        if indirect_fat_clusters > MAX_INDIRECT_FAT_CLUSTERS {
            indirect_fat_clusters = MAX_INDIRECT_FAT_CLUSTERS;
            fat_clusters = indirect_fat_clusters * epc;
        }
        allocatable_clusters = fat_clusters * epc;
        let allocatable_cluster_offset = first_ifc + indirect_fat_clusters + fat_clusters;
        let end = good_block2 * clusters_per_erase_block;
        if end <= allocatable_cluster_offset {
            return Err(corrupt("memory card image too small to be formatted"));
        }
        let allocatable_cluster_end = end - allocatable_cluster_offset;
        let mut ifc_list = vec![0;MAX_INDIRECT_FAT_CLUSTERS];
        for i in 0..indirect_fat_clusters {
            ifc_list[i] = (first_ifc + i) as u32;
        }
        self.version = *VERSION;
        self.page_size = page_size;
        self.pages_per_cluster = pages_per_cluster;
        self.pages_per_erase_block = params.pages_per_erase_block;
        self.clusters_per_card = clusters_per_card;
        self.allocatable_cluster_offset = allocatable_cluster_offset;
        self.allocatable_cluster_end = allocatable_clusters;
        self.rootdir_fat_cluster = 0;
        self.good_block1 = good_block1;
        self.good_block2 = good_block2;
        self.indirect_fat_cluster_list = ifc_list.clone();
        self.bad_erase_block_list = vec![FAT_CHAIN_END;MAX_INDIRECT_FAT_CLUSTERS];
        self.calculate_derived();
        trace!("formatting: zero all");
        let erased = vec![0;page_size];
        for page in 0..pages_per_card {
            self.img.write_page(page,&erased)?;
        }
        self.modified = true;
        let first_fat_cluster = first_ifc + indirect_fat_clusters;
        let remainder = fat_clusters % epc;
        for i in 0..indirect_fat_clusters {
            let base = first_fat_cluster + i * epc;
            let mut buf: Vec<u32> = (base..base+epc).map(|x| x as u32).collect();
            if i==indirect_fat_clusters-1 && remainder != 0 {
                buf.truncate(remainder);
                buf.resize(epc,FAT_CHAIN_END);
            }
            self.write_fat_cluster(ifc_list[i] as usize,buf)?;
        }
        // go through the FAT backwards for better cache usage
        for i in (allocatable_cluster_end..allocatable_clusters).rev() {
            self.set_fat(i,FAT_CHAIN_END)?;
        }
        for i in (1..allocatable_cluster_end).rev() {
            self.set_fat(i,FAT_CLUSTER_MASK)?;
        }
        self.set_fat(0,FAT_CHAIN_END)?;
        self.allocatable_cluster_end = allocatable_cluster_end;
        self.calculate_derived();
        let now = Tod::now();
        let dot = Dirent::create(DF_RWX | DF_DIR | DF_0400 | DF_EXISTS,2,0,0,now,b".");
        let mut buf = dot.to_bytes();
        buf.resize(cluster_size,0);
        self.write_allocatable_cluster(0,buf)?;
        let dotdot = Dirent::create(DF_WRITE | DF_EXECUTE | DF_DIR | DF_0400 | DF_HIDDEN | DF_EXISTS,
            0,0,0,now,b"..");
        self.dir_write_entry(Dirloc::ROOT,0,2,1,&dotdot,false)?;
        self.flush()
    }

    // FAT cluster cache

    fn add_fat_cluster_to_cache(&mut self,n: usize,fat: Vec<u32>,dirty: bool) -> STDRESULT {
        if let Some((en,(efat,edirty))) = self.fat_cache.add(n,(fat,dirty)) {
            if edirty {
                self.img.write_cluster(en,&pack_fat(&efat))?;
            }
        }
        Ok(())
    }
    fn read_fat_cluster_buf(&mut self,n: usize) -> Result<Vec<u32>,DYNERR> {
        if let Some((fat,_dirty)) = self.fat_cache.get(&n) {
            return Ok(fat.clone());
        }
        let fat = unpack_fat(&self.img.read_cluster(n)?);
        self.add_fat_cluster_to_cache(n,fat.clone(),false)?;
        Ok(fat)
    }
    fn write_fat_cluster(&mut self,n: usize,fat: Vec<u32>) -> STDRESULT {
        self.add_fat_cluster_to_cache(n,fat,true)
    }
    fn flush_fat_cache(&mut self) -> STDRESULT {
        for n in self.fat_cache.keys() {
            let dirty = match self.fat_cache.get(&n) {
                Some((fat,true)) => Some(pack_fat(fat)),
                _ => None
            };
            if let Some(buf) = dirty {
                self.img.write_cluster(n,&buf)?;
                if let Some(v) = self.fat_cache.get_mut(&n) {
                    v.1 = false;
                }
            }
        }
        Ok(())
    }

    // allocatable cluster cache

    fn add_alloc_cluster_to_cache(&mut self,n: usize,buf: Vec<u8>,dirty: bool) -> STDRESULT {
        if let Some((en,(ebuf,edirty))) = self.alloc_cache.add(n,(buf,dirty)) {
            if edirty {
                self.img.write_cluster(en + self.allocatable_cluster_offset,&ebuf)?;
            }
        }
        Ok(())
    }
    fn read_allocatable_cluster(&mut self,n: usize) -> Result<Vec<u8>,DYNERR> {
        if let Some((buf,_dirty)) = self.alloc_cache.get(&n) {
            return Ok(buf.clone());
        }
        let buf = self.img.read_cluster(n + self.allocatable_cluster_offset)?;
        self.add_alloc_cluster_to_cache(n,buf.clone(),false)?;
        Ok(buf)
    }
    fn write_allocatable_cluster(&mut self,n: usize,buf: Vec<u8>) -> STDRESULT {
        self.add_alloc_cluster_to_cache(n,buf,true)
    }
    fn flush_alloc_cache(&mut self) -> STDRESULT {
        for n in self.alloc_cache.keys() {
            let dirty = match self.alloc_cache.get(&n) {
                Some((buf,true)) => Some(buf.clone()),
                _ => None
            };
            if let Some(buf) = dirty {
                self.img.write_cluster(n + self.allocatable_cluster_offset,&buf)?;
                if let Some(v) = self.alloc_cache.get_mut(&n) {
                    v.1 = false;
                }
            }
        }
        Ok(())
    }

    // FAT engine

    /// FAT cluster by index through the double indirection; returns the
    /// unpacked entries and the absolute cluster holding them.
    fn read_fat_pair(&mut self,n: usize) -> Result<(Vec<u32>,usize),DYNERR> {
        let epc = self.entries_per_cluster;
        let dbl = n / epc;
        let ind = n % epc;
        if dbl >= self.indirect_fat_cluster_list.len() {
            return Err(corrupt("indirect FAT index out of range"));
        }
        let indirect_cluster = self.indirect_fat_cluster_list[dbl] as usize;
        let indirect_fat = self.read_fat_cluster_buf(indirect_cluster)?;
        if ind >= indirect_fat.len() {
            return Err(corrupt("indirect FAT cluster too short"));
        }
        let cluster = indirect_fat[ind] as usize;
        Ok((self.read_fat_cluster_buf(cluster)?,cluster))
    }
    fn read_fat(&mut self,n: usize) -> Result<(Vec<u32>,usize,usize),DYNERR> {
        if n >= self.allocatable_cluster_end {
            return Err(corrupt(&format!("FAT cluster index out of range ({})",n)));
        }
        let epc = self.entries_per_cluster;
        let (fat,cluster) = self.read_fat_pair(n / epc)?;
        Ok((fat,n % epc,cluster))
    }
    fn lookup_fat(&mut self,n: usize) -> Result<u32,DYNERR> {
        let (fat,offset,_cluster) = self.read_fat(n)?;
        Ok(fat[offset])
    }
    fn set_fat(&mut self,n: usize,value: u32) -> STDRESULT {
        let (mut fat,offset,cluster) = self.read_fat(n)?;
        fat[offset] = value;
        self.write_fat_cluster(cluster,fat)
    }
    /// Sweep the FAT for a free cluster, mark it as a new chain end, and
    /// return its index.  `None` when the card is full.
    fn allocate_cluster(&mut self) -> Result<Option<usize>,DYNERR> {
        let epc = self.entries_per_cluster;
        let limit = self.allocatable_cluster_limit;
        let end = div_round_up(limit,epc);
        let remainder = limit % epc;
        while self.fat_cursor < end {
            let (mut fat,cluster) = self.read_fat_pair(self.fat_cursor)?;
            let slice_end = match self.fat_cursor==end-1 && remainder != 0 {
                true => remainder,
                false => fat.len()
            };
            let n = match fat[0..slice_end].iter().min() {
                Some(n) => *n,
                None => return Err(corrupt("empty FAT cluster"))
            };
            if n & FAT_ALLOCATED_BIT == 0 {
                let offset = fat[0..slice_end].iter().position(|v| *v==n).expect("unreachable");
                fat[offset] = FAT_CHAIN_END;
                self.write_fat_cluster(cluster,fat)?;
                let ret = self.fat_cursor * epc + offset;
                trace!("allocated cluster {}",ret);
                return Ok(Some(ret));
            }
            self.fat_cursor += 1;
        }
        Ok(None)
    }
    /// Cluster at position `i` of the chain starting at `first`, walking
    /// from the cached cursor when possible.  `FAT_CHAIN_END` past the
    /// end of the chain; an unallocated link also ends the chain.
    fn chain_lookup(&mut self,first: u32,c: &mut ChainCursor,i: usize) -> Result<u32,DYNERR> {
        if i==c.offset {
            return Ok(c.cur);
        }
        if c.offset > 0 && i==c.offset-1 {
            return Ok(c.prev);
        }
        let (mut offset,mut prev,mut cur);
        if i < c.offset {
            if i==0 {
                return Ok(first);
            }
            offset = 0;
            prev = first;
            cur = first;
        } else {
            offset = c.offset;
            prev = c.prev;
            cur = c.cur;
        }
        let mut next = cur;
        while offset != i {
            next = self.lookup_fat(cur as usize)?;
            if next==FAT_CHAIN_END {
                break;
            }
            if next & FAT_ALLOCATED_BIT != 0 {
                next &= !FAT_ALLOCATED_BIT;
            } else {
                next = FAT_CHAIN_END;
                break;
            }
            offset += 1;
            prev = cur;
            cur = next;
        }
        c.offset = offset;
        c.prev = prev;
        c.cur = cur;
        Ok(next)
    }
    fn chain_len(&mut self,first: u32,c: &ChainCursor) -> Result<usize,DYNERR> {
        let mut tmp = *c;
        let mut i = tmp.offset;
        while self.chain_lookup(first,&mut tmp,i)? != FAT_CHAIN_END {
            i += 1;
        }
        Ok(i)
    }

    // directory entry access

    /// dirloc of the directory containing the file or directory at `dirloc`
    fn get_parent_dirloc(&mut self,dirloc: Dirloc) -> Result<Dirloc,DYNERR> {
        let cluster = self.read_allocatable_cluster(dirloc.cluster as usize)?;
        let ent = Dirent::from_bytes(&cluster[0..DIRENT_LENGTH]).expect("unreachable");
        Ok(Dirloc { cluster: ent.cluster(), entry: ent.dir_entry() })
    }
    /// the directory entry stored at `dirloc`
    fn read_dirent_at(&mut self,dirloc: Dirloc) -> Result<Dirent,DYNERR> {
        let mut cursor = ChainCursor::new(dirloc.cluster);
        let offset = dirloc.entry as usize * DIRENT_LENGTH;
        let cluster = self.chain_lookup(dirloc.cluster,&mut cursor,offset / self.cluster_size)?;
        if cluster==FAT_CHAIN_END {
            return Err(Box::new(Error::DirIndexOutOfRange));
        }
        let buf = self.read_allocatable_cluster(cluster as usize)?;
        let off = offset % self.cluster_size;
        Ok(Dirent::from_bytes(&buf[off..off+DIRENT_LENGTH]).expect("unreachable"))
    }
    /// all entries of the directory with the given first cluster and count
    fn read_dir_entries(&mut self,first: u32,entries: u32) -> Result<Vec<Dirent>,DYNERR> {
        let per = self.cluster_size / DIRENT_LENGTH;
        let mut ans = Vec::new();
        let mut cursor = ChainCursor::new(first);
        let mut buffered: Option<(usize,Vec<u8>)> = None;
        for i in 0..entries as usize {
            let n = i / per;
            let need = match &buffered {
                Some((m,_)) => *m != n,
                None => true
            };
            if need {
                let cluster = self.chain_lookup(first,&mut cursor,n)?;
                if cluster==FAT_CHAIN_END {
                    return Err(corrupt("directory chain ends early"));
                }
                buffered = Some((n,self.read_allocatable_cluster(cluster as usize)?));
            }
            let buf = &buffered.as_ref().expect("unreachable").1;
            let off = (i % per) * DIRENT_LENGTH;
            ans.push(Dirent::from_bytes(&buf[off..off+DIRENT_LENGTH]).expect("unreachable"));
        }
        Ok(ans)
    }
    fn search_directory(&mut self,first: u32,entries: u32,name: &str) -> Result<Option<(u32,Dirent)>,DYNERR> {
        let list = self.read_dir_entries(first,entries)?;
        for (i,ent) in list.iter().enumerate() {
            if ent.exists() && ent.name()==name.as_bytes() {
                return Ok(Some((i as u32,ent.clone())));
            }
        }
        Ok(None)
    }

    // open file machinery

    fn file(&mut self,dirloc: Dirloc,first_cluster: u32,length: u32,mode: OpenMode,name: &str) -> FileHandle {
        let f = OpenFile {
            dirloc,
            first_cluster,
            length,
            pos: 0,
            mode,
            chain: None,
            buffer: None,
            name: name.to_string()
        };
        let idx = match self.files.iter().position(|s| s.is_none()) {
            Some(i) => {
                self.files[i] = Some(f);
                i
            },
            None => {
                self.files.push(Some(f));
                self.files.len()-1
            }
        };
        self.open_map.entry(dirloc).or_insert_with(HashSet::new).insert(idx);
        FileHandle(idx)
    }
    fn with_file<T,F>(&mut self,h: FileHandle,op: F) -> Result<T,DYNERR>
    where F: FnOnce(&mut Self,&mut OpenFile) -> Result<T,DYNERR> {
        let mut f = match self.files.get_mut(h.0).and_then(|s| s.take()) {
            Some(f) => f,
            None => return Err(Box::new(Error::Closed))
        };
        let result = op(self,&mut f);
        self.files[h.0] = Some(f);
        result
    }
    fn read_file_cluster(&mut self,f: &mut OpenFile,n: usize) -> Result<Option<Vec<u8>>,DYNERR> {
        if let Some((bn,buf)) = &f.buffer {
            if *bn==n {
                return Ok(Some(buf.clone()));
            }
        }
        let mut cursor = match f.chain {
            Some(c) => c,
            None => ChainCursor::new(f.first_cluster)
        };
        let cluster = self.chain_lookup(f.first_cluster,&mut cursor,n)?;
        f.chain = Some(cursor);
        if cluster==FAT_CHAIN_END {
            return Ok(None);
        }
        let buf = self.read_allocatable_cluster(cluster as usize)?;
        f.buffer = Some((n,buf.clone()));
        Ok(Some(buf))
    }
    /// Allocate a cluster for position `n`, linking it to the chain, or
    /// to the dirent when it becomes the first cluster.
    fn extend_file(&mut self,f: &mut OpenFile,n: usize) -> Result<Option<u32>,DYNERR> {
        let cluster = match self.allocate_cluster()? {
            Some(c) => c as u32,
            None => return Ok(None)
        };
        if n==0 {
            f.first_cluster = cluster;
            f.chain = None;
            self.update_dirent(f.dirloc,true,Some(cluster),None,false)?;
        } else {
            let mut cursor = match f.chain {
                Some(c) => c,
                None => ChainCursor::new(f.first_cluster)
            };
            let prev = self.chain_lookup(f.first_cluster,&mut cursor,n-1)?;
            f.chain = Some(cursor);
            if prev==FAT_CHAIN_END {
                return Err(corrupt("chain too short while extending"));
            }
            self.set_fat(prev as usize,cluster | FAT_ALLOCATED_BIT)?;
        }
        Ok(Some(cluster))
    }
    fn write_file_cluster(&mut self,f: &mut OpenFile,n: usize,buf: Vec<u8>) -> Result<bool,DYNERR> {
        let mut cursor = match f.chain {
            Some(c) => c,
            None => ChainCursor::new(f.first_cluster)
        };
        let cluster = self.chain_lookup(f.first_cluster,&mut cursor,n)?;
        f.chain = Some(cursor);
        if cluster != FAT_CHAIN_END {
            self.write_allocatable_cluster(cluster as usize,buf.clone())?;
            f.buffer = Some((n,buf));
            return Ok(true);
        }
        let cluster_size = self.cluster_size;
        let file_cluster_end = div_round_up(f.length as usize,cluster_size);
        if self.chain_len(f.first_cluster,&cursor)? != file_cluster_end {
            return Err(corrupt("file length doesn't match cluster chain length"));
        }
        for i in file_cluster_end..n {
            match self.extend_file(f,i)? {
                None => {
                    if i != file_cluster_end {
                        f.length = ((i-1) * cluster_size) as u32;
                        let length = f.length;
                        self.update_dirent(f.dirloc,true,None,Some(length),true)?;
                    }
                    return Ok(false);
                },
                Some(c) => self.write_allocatable_cluster(c as usize,vec![0;cluster_size])?
            }
        }
        match self.extend_file(f,n)? {
            None => Ok(false),
            Some(c) => {
                self.write_allocatable_cluster(c as usize,buf.clone())?;
                f.buffer = Some((n,buf));
                Ok(true)
            }
        }
    }
    fn file_read(&mut self,f: &mut OpenFile,size: Option<usize>,eol: Option<u8>) -> Result<Vec<u8>,DYNERR> {
        let cluster_size = self.cluster_size;
        let mut pos = f.pos;
        let want = match size {
            Some(s) => s,
            None => f.length as usize
        };
        let mut remaining = match pos < f.length as usize {
            true => usize::min(f.length as usize - pos,want),
            false => 0
        };
        let mut ret = Vec::new();
        while remaining > 0 {
            let off = pos % cluster_size;
            let mut l = usize::min(cluster_size - off,remaining);
            let buf = match self.read_file_cluster(f,pos / cluster_size)? {
                Some(b) => b,
                None => break
            };
            if let Some(e) = eol {
                if let Some(idx) = buf[off..off+l].iter().position(|b| *b==e) {
                    l = idx + 1;
                    remaining = l;
                }
            }
            pos += l;
            f.pos = pos;
            ret.extend_from_slice(&buf[off..off+l]);
            remaining -= l;
        }
        Ok(ret)
    }
    fn file_write(&mut self,f: &mut OpenFile,out: &[u8],set_modified: bool) -> STDRESULT {
        let cluster_size = self.cluster_size;
        let mut pos = match f.mode {
            OpenMode::Append => f.length as usize,
            OpenMode::Read => return Err(Box::new(Error::ReadOnly)),
            OpenMode::Write => f.pos
        };
        let mut size = out.len();
        let mut i = 0;
        while size > 0 {
            let cluster = pos / cluster_size;
            let off = pos % cluster_size;
            let l = usize::min(cluster_size - off,size);
            pos += l;
            let buf = match l==cluster_size {
                true => out[i..i+l].to_vec(),
                false => {
                    let mut b = match self.read_file_cluster(f,cluster)? {
                        Some(b) => b,
                        None => vec![0;cluster_size]
                    };
                    b[off..off+l].copy_from_slice(&out[i..i+l]);
                    b
                }
            };
            if !self.write_file_cluster(f,cluster,buf)? {
                warn!("out of space writing {}",f.name);
                return Err(Box::new(Error::NoSpace));
            }
            f.pos = pos;
            let new_length = match pos > f.length as usize {
                true => {
                    f.length = pos as u32;
                    Some(pos as u32)
                },
                false => None
            };
            self.update_dirent(f.dirloc,true,None,new_length,set_modified)?;
            i += l;
            size -= l;
        }
        Ok(())
    }

    // dirent updates

    fn update_dirent(&mut self,dirloc: Dirloc,from_handle: bool,first_cluster: Option<u32>,
                     length: Option<u32>,set_modified: bool) -> STDRESULT {
        let modified = match set_modified {
            true => Some(Tod::now()),
            false => {
                if first_cluster.is_none() && length.is_none() {
                    return Ok(());
                }
                None
            }
        };
        self.update_dirent_all(dirloc,from_handle,DirentUpdate {
            cluster: first_cluster,
            length,
            modified,
            ..Default::default()
        })
    }
    fn update_dirent_all(&mut self,dirloc: Dirloc,from_handle: bool,update: DirentUpdate) -> STDRESULT {
        let parent_dirloc = self.get_parent_dirloc(dirloc)?;
        let parent_ent = self.read_dirent_at(parent_dirloc)?;
        let mut ent = self.read_dirent_at(dirloc)?;
        let is_dir = ent.mode() & DF_DIR != 0;
        let mut update = update;
        if is_dir && from_handle {
            if let Some(l) = update.length {
                update.length = Some(l / DIRENT_LENGTH as u32);
            }
        }
        let mut changed = false;
        let mut modified = false;
        let mut notify = false;
        if let Some(m) = update.mode {
            if m != ent.mode() {
                ent.set_mode(m);
                changed = true;
            }
        }
        if let Some(u) = update.unknown {
            if u != u16::from_le_bytes(ent.unknown) {
                ent.unknown = u16::to_le_bytes(u);
                changed = true;
            }
        }
        if let Some(l) = update.length {
            if l != ent.length() {
                ent.set_length(l);
                changed = true;
                notify = true;
            }
        }
        if let Some(t) = update.created {
            if t != ent.created() {
                ent.created = t.pack();
                changed = true;
            }
        }
        if let Some(c) = update.cluster {
            if c != ent.cluster() {
                ent.set_cluster(c);
                changed = true;
                notify = true;
            }
        }
        if let Some(t) = update.modified {
            if t != ent.modified() {
                ent.modified = t.pack();
                changed = true;
                modified = true;
            }
        }
        if let Some(a) = update.attr {
            if a != ent.attr() {
                ent.set_attr(a);
                changed = true;
            }
        }
        // stamping the parent happens through the recursive entry write,
        // and only for files, never for directories
        if changed {
            self.dir_write_entry(parent_dirloc,parent_ent.cluster(),parent_ent.length(),
                dirloc.entry,&ent,modified && !is_dir)?;
        }
        if notify {
            if let Some(handles) = self.open_map.get(&dirloc) {
                for h in handles.clone() {
                    if let Some(f) = self.files[h].as_mut() {
                        f.update_notify(ent.cluster(),ent.length());
                    }
                }
            }
        }
        Ok(())
    }
    /// Serialize one entry into a directory's own data through the normal
    /// file write path, so directory growth and timestamps propagate.
    fn dir_write_entry(&mut self,dir_dirloc: Dirloc,first: u32,entries: u32,index: u32,
                       ent: &Dirent,set_modified: bool) -> STDRESULT {
        let mut f = OpenFile {
            dirloc: dir_dirloc,
            first_cluster: first,
            length: entries * DIRENT_LENGTH as u32,
            pos: index as usize * DIRENT_LENGTH,
            mode: OpenMode::Write,
            chain: None,
            buffer: None,
            name: "<directory>".to_string()
        };
        self.file_write(&mut f,&ent.to_bytes(),set_modified)
    }

    // create and delete

    /// Create a new directory entry in the directory at `parent_dirloc`,
    /// reusing the first dead slot or appending.  For directories this
    /// also lays down the dot entries in a fresh cluster.
    fn create_dir_entry(&mut self,parent_dirloc: Dirloc,name: &[u8],mode: u16) -> Result<(Dirloc,Dirent),DYNERR> {
        let dir_ent = self.read_dirent_at(parent_dirloc)?;
        let entries = dir_ent.length();
        if entries < 2 {
            return Err(corrupt("directory is missing dot entries"));
        }
        let list = self.read_dir_entries(dir_ent.cluster(),entries)?;
        let mut idx = entries;
        for (j,e) in list.iter().enumerate() {
            if !e.exists() {
                idx = j as u32;
                break;
            }
        }
        let dirloc = Dirloc { cluster: dir_ent.cluster(), entry: idx };
        trace!("create entry {} at {}",display_name(name),dirloc);
        let now = Tod::now();
        let mut mode = mode;
        let (cluster,length) = match mode & DF_DIR != 0 {
            true => {
                mode &= !DF_FILE;
                match self.allocate_cluster()? {
                    Some(c) => (c as u32,1),
                    None => return Err(Box::new(Error::NoSpace))
                }
            },
            false => {
                mode |= DF_FILE;
                mode &= !DF_DIR;
                (FAT_CHAIN_END,0)
            }
        };
        let mut ent = Dirent::create(mode | DF_EXISTS,length,cluster,0,now,name);
        self.dir_write_entry(parent_dirloc,dir_ent.cluster(),entries,idx,&ent,true)?;
        if mode & DF_FILE != 0 {
            return Ok((dirloc,ent));
        }
        let dot = Dirent::create(DF_RWX | DF_0400 | DF_DIR | DF_EXISTS,0,
            dirloc.cluster,dirloc.entry,now,b".");
        let mut buf = dot.to_bytes();
        buf.resize(self.cluster_size,0);
        self.write_allocatable_cluster(cluster as usize,buf)?;
        let dotdot = Dirent::create(DF_RWX | DF_0400 | DF_DIR | DF_EXISTS,0,0,0,now,b"..");
        self.dir_write_entry(dirloc,cluster,1,1,&dotdot,false)?;
        ent.set_length(2);
        Ok((dirloc,ent))
    }
    /// Delete or truncate the entry at `dirloc` and free its chain.
    /// The allocation cursor rewinds so the space is reused.
    fn delete_dirloc(&mut self,dirloc: Dirloc,truncate: bool,name: &str) -> STDRESULT {
        if dirloc==Dirloc::ROOT {
            error!("cannot remove root directory");
            return Err(Box::new(Error::AccessDenied));
        }
        if dirloc.entry==0 || dirloc.entry==1 {
            error!("cannot remove \".\" or \"..\" entries");
            return Err(Box::new(Error::AccessDenied));
        }
        if self.open_map.contains_key(&dirloc) {
            warn!("cannot remove open file {}",name);
            return Err(Box::new(Error::Busy));
        }
        let ent = self.read_dirent_at(dirloc)?;
        let mut cluster = ent.cluster();
        let update = match truncate {
            true => DirentUpdate {
                length: Some(0),
                cluster: Some(FAT_CHAIN_END),
                modified: Some(Tod::now()),
                ..Default::default()
            },
            false => DirentUpdate {
                mode: Some(ent.mode() & !DF_EXISTS),
                ..Default::default()
            }
        };
        self.update_dirent_all(dirloc,false,update)?;
        let epc = self.entries_per_cluster as u32;
        while cluster != FAT_CHAIN_END {
            if ((cluster / epc) as usize) < self.fat_cursor {
                self.fat_cursor = (cluster / epc) as usize;
            }
            let mut next = self.lookup_fat(cluster as usize)?;
            if next & FAT_ALLOCATED_BIT == 0 {
                // already free, chain is corrupt, stop here
                break;
            }
            next &= !FAT_ALLOCATED_BIT;
            self.set_fat(cluster as usize,next)?;
            if next==FAT_CHAIN_END_UNALLOC {
                break;
            }
            cluster = next;
        }
        Ok(())
    }

    // path resolution

    /// Parse and resolve a pathname.  Returns the dirloc of the target if
    /// it exists, otherwise the dirloc of its parent if that exists,
    /// otherwise `None`.  The entry is `None` when the leaf is missing.
    /// The flag is true when the path names a directory.
    pub fn path_search(&mut self,pathname: &str) -> Result<(Option<Dirloc>,Option<Dirent>,bool),DYNERR> {
        let components: Vec<&str> = pathname.split('/').collect();
        let mut dirloc = self.curdir;
        if components[0]=="" {
            dirloc = Dirloc::ROOT;
        }
        let ent: Dirent = match dirloc==Dirloc::ROOT {
            true => {
                let buf = self.read_allocatable_cluster(0)?;
                Dirent::from_bytes(&buf[0..DIRENT_LENGTH]).expect("unreachable")
            },
            false => self.read_dirent_at(dirloc)?
        };
        let mut dir: Option<(u32,u32)> = match dirloc==Dirloc::ROOT {
            true => Some((0,ent.length())),
            false => Some((ent.cluster(),ent.length()))
        };
        let mut ent_opt = Some(ent);
        for s in components {
            if s=="" {
                continue;
            }
            let (dir_first,dir_entries) = match dir {
                // tried to traverse a file or a missing directory
                Some(d) => d,
                None => return Ok((None,None,false))
            };
            if s=="." {
                continue;
            }
            if s==".." {
                // the dot entry of the parent names the parent's own dirloc
                dirloc = self.get_parent_dirloc(dirloc)?;
                let e = self.read_dirent_at(dirloc)?;
                dir = Some((e.cluster(),e.length()));
                ent_opt = Some(e);
                continue;
            }
            match self.search_directory(dir_first,dir_entries,s)? {
                Some((i,found)) => {
                    dirloc = Dirloc { cluster: dir_first, entry: i };
                    dir = match found.mode() & DF_DIR != 0 {
                        true => Some((found.cluster(),found.length())),
                        false => None
                    };
                    ent_opt = Some(found);
                },
                None => {
                    dir = None;
                    ent_opt = None;
                }
            }
        }
        Ok((Some(dirloc),ent_opt,dir.is_some()))
    }

    // public file operations

    /// Open a file, returning a handle into the engine's file table.
    pub fn open(&mut self,filename: &str,mode: OpenMode) -> Result<FileHandle,DYNERR> {
        let (maybe_dirloc,maybe_ent,is_dir) = self.path_search(filename)?;
        let dirloc = match maybe_dirloc {
            Some(d) => d,
            None => return Err(Box::new(Error::PathNotFound))
        };
        if maybe_ent.is_none() && is_dir {
            return Err(Box::new(Error::PathNotFound));
        }
        if is_dir {
            return Err(Box::new(Error::IsADirectory));
        }
        let (dirloc,ent) = match maybe_ent {
            None => {
                if mode==OpenMode::Read {
                    return Err(Box::new(Error::FileNotFound));
                }
                let name = match filename.split('/').last() {
                    Some(n) => n,
                    None => filename
                };
                let created = self.create_dir_entry(dirloc,name.as_bytes(),
                    DF_FILE | DF_RWX | DF_0400)?;
                self.flush()?;
                created
            },
            Some(mut e) => {
                if mode==OpenMode::Write {
                    self.delete_dirloc(dirloc,true,filename)?;
                    e.set_cluster(FAT_CHAIN_END);
                    e.set_length(0);
                }
                (dirloc,e)
            }
        };
        Ok(self.file(dirloc,ent.cluster(),ent.length(),mode,filename))
    }
    pub fn read(&mut self,h: FileHandle,size: Option<usize>) -> Result<Vec<u8>,DYNERR> {
        self.with_file(h,|mc,f| mc.file_read(f,size,None))
    }
    /// read stopping after the first occurrence of `eol`
    pub fn read_until(&mut self,h: FileHandle,size: Option<usize>,eol: u8) -> Result<Vec<u8>,DYNERR> {
        self.with_file(h,|mc,f| mc.file_read(f,size,Some(eol)))
    }
    pub fn write(&mut self,h: FileHandle,dat: &[u8]) -> STDRESULT {
        self.with_file(h,|mc,f| mc.file_write(f,dat,true))
    }
    pub fn seek(&mut self,h: FileHandle,pos: usize) -> STDRESULT {
        self.with_file(h,|_mc,f| {
            f.pos = pos;
            Ok(())
        })
    }
    /// Close the handle.  This is also a durability point; caches are
    /// flushed through to the stream.
    pub fn close(&mut self,h: FileHandle) -> STDRESULT {
        if let Some(f) = self.files.get_mut(h.0).and_then(|s| s.take()) {
            if let Some(set) = self.open_map.get_mut(&f.dirloc) {
                set.remove(&h.0);
                if set.is_empty() {
                    self.open_map.remove(&f.dirloc);
                }
            }
            self.flush()?;
        }
        Ok(())
    }

    // public directory operations

    /// every entry of the directory at `filename`, dot entries included
    pub fn list_dir(&mut self,filename: &str) -> Result<Vec<Dirent>,DYNERR> {
        let (maybe_dirloc,maybe_ent,is_dir) = self.path_search(filename)?;
        if maybe_dirloc.is_none() {
            return Err(Box::new(Error::PathNotFound));
        }
        let ent = match maybe_ent {
            Some(e) => e,
            None => return Err(Box::new(Error::DirectoryNotFound))
        };
        if !is_dir {
            return Err(Box::new(Error::NotADirectory));
        }
        self.read_dir_entries(ent.cluster(),ent.length())
    }
    pub fn mkdir(&mut self,filename: &str) -> STDRESULT {
        let (maybe_dirloc,maybe_ent,_is_dir) = self.path_search(filename)?;
        let dirloc = match maybe_dirloc {
            Some(d) => d,
            None => return Err(Box::new(Error::PathNotFound))
        };
        if maybe_ent.is_some() {
            return Err(Box::new(Error::AlreadyExists));
        }
        let mut parts: Vec<&str> = filename.split('/').collect();
        let mut name = "";
        while name=="" {
            name = match parts.pop() {
                Some(n) => n,
                None => return Err(Box::new(Error::PathNotFound))
            };
        }
        self.create_dir_entry(dirloc,name.as_bytes(),DF_DIR | DF_RWX | DF_0400)?;
        self.flush()
    }
    /// Remove a file or empty directory.
    pub fn remove(&mut self,filename: &str) -> STDRESULT {
        let (maybe_dirloc,maybe_ent,is_dir) = self.path_search(filename)?;
        let dirloc = match maybe_dirloc {
            Some(d) => d,
            None => return Err(Box::new(Error::PathNotFound))
        };
        let ent = match maybe_ent {
            Some(e) => e,
            None => return Err(Box::new(Error::FileNotFound))
        };
        if is_dir {
            if ent.cluster()==0 {
                error!("cannot remove root directory");
                return Err(Box::new(Error::AccessDenied));
            }
            if !self.is_empty_dir(&ent)? {
                return Err(Box::new(Error::NotEmpty));
            }
        }
        self.delete_dirloc(dirloc,false,filename)?;
        self.flush()
    }
    fn is_empty_dir(&mut self,ent: &Dirent) -> Result<bool,DYNERR> {
        let list = self.read_dir_entries(ent.cluster(),ent.length())?;
        for e in list.iter().skip(2) {
            if e.exists() {
                return Ok(false);
            }
        }
        Ok(true)
    }
    /// Recursively delete a directory.
    pub fn rmdir(&mut self,dirname: &str) -> STDRESULT {
        let (maybe_dirloc,maybe_ent,is_dir) = self.path_search(dirname)?;
        let dirloc = match maybe_dirloc {
            Some(d) => d,
            None => return Err(Box::new(Error::PathNotFound))
        };
        let ent = match maybe_ent {
            Some(e) => e,
            None => return Err(Box::new(Error::DirectoryNotFound))
        };
        if !is_dir {
            return Err(Box::new(Error::NotADirectory));
        }
        if dirloc==Dirloc::ROOT {
            error!("cannot delete root directory");
            return Err(Box::new(Error::AccessDenied));
        }
        self.remove_dir_tree(dirloc,&ent)
    }
    fn remove_dir_tree(&mut self,dirloc: Dirloc,ent: &Dirent) -> STDRESULT {
        let first_cluster = ent.cluster();
        let list = self.read_dir_entries(first_cluster,ent.length())?;
        for (i,child) in list.iter().enumerate().skip(2) {
            if !child.exists() {
                continue;
            }
            let child_dirloc = Dirloc { cluster: first_cluster, entry: i as u32 };
            if child.mode() & DF_DIR != 0 {
                self.remove_dir_tree(child_dirloc,child)?;
            } else {
                trace!("deleting {}",display_name(child.name()));
                self.delete_dirloc(child_dirloc,false,&display_name(child.name()))?;
            }
        }
        self.delete_dirloc(dirloc,false,&display_name(ent.name()))
    }
    pub fn chdir(&mut self,filename: &str) -> STDRESULT {
        let (maybe_dirloc,maybe_ent,is_dir) = self.path_search(filename)?;
        let dirloc = match maybe_dirloc {
            Some(d) => d,
            None => return Err(Box::new(Error::PathNotFound))
        };
        if maybe_ent.is_none() {
            return Err(Box::new(Error::DirectoryNotFound));
        }
        if !is_dir {
            return Err(Box::new(Error::NotADirectory));
        }
        self.curdir = dirloc;
        Ok(())
    }
    /// Mode bits of a file, or `None` if the path does not resolve.
    pub fn get_mode(&mut self,filename: &str) -> Result<Option<u16>,DYNERR> {
        let (_maybe_dirloc,maybe_ent,_is_dir) = self.path_search(filename)?;
        Ok(maybe_ent.map(|e| e.mode()))
    }
    /// the raw directory entry for a file
    pub fn get_dirent(&mut self,filename: &str) -> Result<Dirent,DYNERR> {
        let (maybe_dirloc,maybe_ent,_is_dir) = self.path_search(filename)?;
        if maybe_dirloc.is_none() {
            return Err(Box::new(Error::PathNotFound));
        }
        match maybe_ent {
            Some(e) => Ok(e),
            None => Err(Box::new(Error::FileNotFound))
        }
    }
    /// Set mode, times, and attribute of a file from `new_ent`.  The
    /// file/dir/exists bits and the allocation fields are not touched.
    /// Returns the previous entry.
    pub fn set_dirent(&mut self,filename: &str,new_ent: &Dirent) -> Result<Dirent,DYNERR> {
        let (maybe_dirloc,maybe_ent,_is_dir) = self.path_search(filename)?;
        let dirloc = match maybe_dirloc {
            Some(d) => d,
            None => return Err(Box::new(Error::PathNotFound))
        };
        let old = match maybe_ent {
            Some(e) => e,
            None => return Err(Box::new(Error::FileNotFound))
        };
        self.set_dirent_at(dirloc,new_ent)?;
        self.flush()?;
        Ok(old)
    }
    fn set_dirent_at(&mut self,dirloc: Dirloc,new_ent: &Dirent) -> STDRESULT {
        let parent_dirloc = self.get_parent_dirloc(dirloc)?;
        let parent_ent = self.read_dirent_at(parent_dirloc)?;
        let mut ent = self.read_dirent_at(dirloc)?;
        if !ent.exists() {
            return Ok(());
        }
        let mode = (new_ent.mode() & !(DF_FILE | DF_DIR | DF_EXISTS))
            | (ent.mode() & (DF_FILE | DF_DIR | DF_EXISTS));
        ent.set_mode(mode);
        ent.unknown = new_ent.unknown;
        ent.created = new_ent.created;
        ent.modified = new_ent.modified;
        ent.attr = new_ent.attr;
        self.dir_write_entry(parent_dirloc,parent_ent.cluster(),parent_ent.length(),
            dirloc.entry,&ent,false)
    }

    // save archives

    /// Copy the contents of a save archive into a new directory.  If the
    /// directory already exists and `ignore_existing` is set, returns
    /// false instead of an error.  Partial imports are rolled back.
    pub fn import_save_file(&mut self,sf: &SaveFile,ignore_existing: bool,
                            dirname: Option<&str>) -> Result<bool,DYNERR> {
        let dir_ent = sf.dirent().clone();
        let (dirname,dir_ent_name): (String,Vec<u8>) = match dirname {
            None => (format!("/{}",display_name(dir_ent.name())),dir_ent.name().to_vec()),
            Some(d) => {
                if d=="" {
                    return Err(Box::new(Error::PathNotFound));
                }
                let trimmed = d.trim_end_matches('/');
                let dirname = match trimmed {
                    "" => "/".to_string(),
                    t => t.to_string()
                };
                let name = match dirname.split('/').filter(|c| *c != "").last() {
                    Some(n) => n.as_bytes().to_vec(),
                    None => return Err(Box::new(Error::PathNotFound))
                };
                (dirname,name)
            }
        };
        let (maybe_root,existing,_is_dir) = self.path_search(&dirname)?;
        let root_dirloc = match maybe_root {
            Some(d) => d,
            None => return Err(Box::new(Error::PathNotFound))
        };
        if existing.is_some() {
            if ignore_existing {
                return Ok(false);
            }
            return Err(Box::new(Error::AlreadyExists));
        }
        let mode = DF_DIR | (dir_ent.mode() & !DF_FILE);
        let (dir_dirloc,_new_ent) = self.create_dir_entry(root_dirloc,&dir_ent_name,mode)?;
        let mut created: Vec<Dirloc> = Vec::new();
        let mut failure: Option<DYNERR> = None;
        for i in 0..sf.count() {
            let (fent,data) = sf.file(i);
            let fmode = DF_FILE | (fent.mode() & !DF_DIR);
            match self.create_dir_entry(dir_dirloc,fent.name(),fmode) {
                Ok((dirloc,e)) => {
                    created.push(dirloc);
                    let h = self.file(dirloc,e.cluster(),e.length(),OpenMode::Write,
                        &display_name(fent.name()));
                    let write_result = self.write(h,data);
                    let close_result = self.close(h);
                    if let Err(e) = write_result {
                        failure = Some(e);
                        break;
                    }
                    if let Err(e) = close_result {
                        failure = Some(e);
                        break;
                    }
                },
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            warn!("import failed, rolling back");
            for dirloc in created {
                if let Err(e) = self.delete_dirloc(dirloc,false,"<rollback>") {
                    debug!("rollback: {}",e);
                }
            }
            if let Err(e) = self.delete_dirloc(dir_dirloc,false,"<rollback>") {
                debug!("rollback: {}",e);
            }
            return Err(err);
        }
        // restore the modes and timestamps carried by the archive
        let dir_first = self.read_dirent_at(dir_dirloc)?.cluster();
        for i in 0..sf.count() {
            let (fent,_data) = sf.file(i);
            self.set_dirent_at(Dirloc { cluster: dir_first, entry: (i + 2) as u32 },fent)?;
        }
        self.set_dirent_at(dir_dirloc,&dir_ent)?;
        self.flush()?;
        Ok(true)
    }
    /// Collect a save directory into the in-memory archive model.
    pub fn export_save_file(&mut self,filename: &str) -> Result<SaveFile,DYNERR> {
        let (maybe_dirloc,maybe_ent,is_dir) = self.path_search(filename)?;
        let dir_dirloc = match maybe_dirloc {
            Some(d) => d,
            None => return Err(Box::new(Error::PathNotFound))
        };
        let mut dirent = match maybe_ent {
            Some(e) => e,
            None => return Err(Box::new(Error::DirectoryNotFound))
        };
        if !is_dir {
            return Err(Box::new(Error::NotADirectory));
        }
        if dir_dirloc==Dirloc::ROOT {
            error!("cannot export root directory");
            return Err(Box::new(Error::AccessDenied));
        }
        let list = self.read_dir_entries(dirent.cluster(),dirent.length())?;
        let mut files: Vec<(Dirent,Vec<u8>)> = Vec::new();
        for (i,ent) in list.iter().enumerate().skip(2) {
            if !ent.is_file() {
                if ent.exists() {
                    warn!("{}/{} is not a file, ignored",
                        display_name(dirent.name()),display_name(ent.name()));
                }
                continue;
            }
            let h = self.file(Dirloc { cluster: dirent.cluster(), entry: i as u32 },
                ent.cluster(),ent.length(),OpenMode::Read,"<export>");
            let read_result = self.read(h,Some(ent.length() as usize));
            self.close(h)?;
            let data = read_result?;
            if data.len() != ent.length() as usize {
                return Err(corrupt("file data ends before directory length"));
            }
            files.push((ent.clone(),data));
        }
        let mut sf = SaveFile::new();
        dirent.set_length(files.len() as u32);
        sf.set_directory(dirent);
        for (ent,data) in files {
            sf.push_file(ent,data);
        }
        Ok(sf)
    }

    // glob

    /// Shell style matching over card paths, one pattern per component.
    pub fn glob(&mut self,pattern: &str) -> Result<Vec<String>,DYNERR> {
        if pattern=="" {
            return Ok(Vec::new());
        }
        let components: Vec<&str> = pattern.split('/').collect();
        self.glob_dir("",&components)
    }
    fn glob_dir(&mut self,dirname: &str,components: &[&str]) -> Result<Vec<String>,DYNERR> {
        let pattern = components[0];
        if components.len()==1 {
            if pattern=="" {
                return Ok(vec![dirname.to_string()]);
            }
            let list = self.list_dir(dirname)?;
            let mut ans = Vec::new();
            for ent in &list {
                let name = display_name(ent.name());
                if !ent.exists() {
                    continue;
                }
                if (name=="." || name=="..") && name != pattern {
                    continue;
                }
                if glob_match(&name,pattern) {
                    ans.push([dirname,&name].concat());
                }
            }
            return Ok(ans);
        }
        if pattern=="" {
            return self.glob_dir(&[dirname,"/"].concat(),&components[1..]);
        }
        let list = match dirname {
            "" => self.list_dir(".")?,
            d => self.list_dir(d)?
        };
        let mut ans = Vec::new();
        for ent in &list {
            let name = display_name(ent.name());
            if !ent.exists() || ent.mode() & DF_DIR == 0 {
                continue;
            }
            if name=="." || name==".." {
                if pattern != name {
                    continue;
                }
            } else if !glob_match(&name,pattern) {
                continue;
            }
            ans.append(&mut self.glob_dir(&[dirname,&name,"/"].concat(),&components[1..])?);
        }
        Ok(ans)
    }

    // icon.sys and sizes

    /// Contents of a directory's icon.sys file, if it exists and looks valid.
    pub fn get_icon_sys(&mut self,dirname: &str) -> Result<Option<Vec<u8>>,DYNERR> {
        let icon_sys = [dirname,"/icon.sys"].concat();
        match self.get_mode(&icon_sys)? {
            Some(m) if mode_is_file(m) => {},
            _ => return Ok(None)
        }
        let h = self.open(&icon_sys,OpenMode::Read)?;
        let read_result = self.read(h,Some(964));
        self.close(h)?;
        let s = read_result?;
        if s.len()==964 && &s[0..4]==b"PS2D" {
            return Ok(Some(s));
        }
        Ok(None)
    }
    /// Total size of the contents of a directory, cluster rounded.
    pub fn dir_size(&mut self,dirname: &str) -> Result<usize,DYNERR> {
        let (maybe_dirloc,maybe_ent,is_dir) = self.path_search(dirname)?;
        if maybe_dirloc.is_none() {
            return Err(Box::new(Error::PathNotFound));
        }
        let ent = match maybe_ent {
            Some(e) => e,
            None => return Err(Box::new(Error::DirectoryNotFound))
        };
        if !is_dir {
            return Err(Box::new(Error::NotADirectory));
        }
        self.dir_size_at(ent.cluster(),ent.length())
    }
    fn dir_size_at(&mut self,first: u32,entries: u32) -> Result<usize,DYNERR> {
        let mut length = round_up(entries as usize * DIRENT_LENGTH,self.cluster_size);
        let list = self.read_dir_entries(first,entries)?;
        for ent in &list {
            if ent.is_file() {
                length += round_up(ent.length() as usize,self.cluster_size);
            } else if ent.is_dir() && ent.name() != b"." && ent.name() != b".." {
                length += self.dir_size_at(ent.cluster(),ent.length())?;
            }
        }
        Ok(length)
    }

    // consistency check

    fn check_file_chain(&mut self,fat_map: &mut BitVec,first_cluster: u32,length: u32) -> Result<Option<String>,DYNERR> {
        let mut cluster = first_cluster;
        let mut i: usize = 0;
        while cluster != FAT_CHAIN_END {
            if cluster as usize >= fat_map.len() {
                return Ok(Some("invalid cluster in chain".to_string()));
            }
            if fat_map.get(cluster as usize)==Some(true) {
                return Ok(Some("cross linked chain".to_string()));
            }
            fat_map.set(cluster as usize,true);
            i += 1;
            let next = self.lookup_fat(cluster as usize)?;
            if next==FAT_CHAIN_END {
                break;
            }
            if next & FAT_ALLOCATED_BIT == 0 {
                return Ok(Some("unallocated cluster in chain".to_string()));
            }
            cluster = next & !FAT_ALLOCATED_BIT;
        }
        let file_cluster_end = div_round_up(length as usize,self.cluster_size);
        if i < file_cluster_end {
            return Ok(Some("chain ends before end of file".to_string()));
        }
        if i > file_cluster_end {
            return Ok(Some("chain continues after end of file".to_string()));
        }
        Ok(None)
    }
    fn check_dir(&mut self,fat_map: &mut BitVec,dirloc: Dirloc,dirname: &str,ent: &Dirent) -> Result<bool,DYNERR> {
        if let Some(why) = self.check_file_chain(fat_map,ent.cluster(),
            ent.length() * DIRENT_LENGTH as u32)? {
            println!("bad directory: {}: {}",dirname,why);
            return Ok(false);
        }
        let mut ret = true;
        let first_cluster = ent.cluster();
        let length = ent.length();
        let list = self.read_dir_entries(first_cluster,length)?;
        if list.len() < 2 {
            println!("bad directory: {}: missing dot entries",dirname);
            return Ok(false);
        }
        if list[0].name() != b"." {
            println!("bad directory: {}: missing \".\" entry",dirname);
            ret = false;
        }
        if list[0].cluster() != dirloc.cluster || list[0].dir_entry() != dirloc.entry {
            println!("bad directory: {}: bad \".\" entry",dirname);
            ret = false;
        }
        if list[1].name() != b".." {
            println!("bad directory: {}: missing \"..\" entry",dirname);
            ret = false;
        }
        for (i,child) in list.iter().enumerate().skip(2) {
            if !child.exists() {
                continue;
            }
            let child_name = display_name(child.name());
            if child.mode() & DF_DIR != 0 {
                let sub = [dirname,&child_name,"/"].concat();
                if !self.check_dir(fat_map,Dirloc { cluster: first_cluster, entry: i as u32 },&sub,child)? {
                    ret = false;
                }
            } else {
                if let Some(why) = self.check_file_chain(fat_map,child.cluster(),child.length())? {
                    println!("bad file: {}{}: {}",dirname,child_name,why);
                    ret = false;
                }
            }
        }
        Ok(ret)
    }
    /// Run a simple file system check.  Problems found are reported to
    /// stdout; returns true if the card is clean.
    pub fn check(&mut self) -> Result<bool,DYNERR> {
        let mut fat_map = BitVec::from_elem(self.allocatable_cluster_end,false);
        let buf = self.read_allocatable_cluster(0)?;
        let root = Dirent::from_bytes(&buf[0..DIRENT_LENGTH]).expect("unreachable");
        let mut ret = self.check_dir(&mut fat_map,Dirloc::ROOT,"/",&root)?;
        let mut lost_clusters = 0;
        for i in 0..self.allocatable_cluster_end {
            let a = self.lookup_fat(i)?;
            if a & FAT_ALLOCATED_BIT != 0 && fat_map.get(i) != Some(true) {
                print!("{} ",i);
                lost_clusters += 1;
            }
        }
        if lost_clusters > 0 {
            println!();
            println!("found {} lost clusters",lost_clusters);
            ret = false;
        }
        Ok(ret)
    }

    // lifecycle

    /// Write back every dirty cache entry, the superblock if stale, and
    /// flush the stream.
    pub fn flush(&mut self) -> STDRESULT {
        self.flush_alloc_cache()?;
        self.flush_fat_cache()?;
        if self.modified {
            self.write_superblock()?;
        }
        self.img.flush()
    }
    /// Close every open file and flush.  The card object remains usable,
    /// but outstanding handles are dead.
    pub fn close_all(&mut self) -> STDRESULT {
        for slot in self.files.iter_mut() {
            *slot = None;
        }
        self.open_map.clear();
        self.flush()
    }
}

fn glob_match(name: &str,pattern: &str) -> bool {
    match globset::Glob::new(pattern) {
        Ok(g) => g.compile_matcher().is_match(name),
        Err(_) => false
    }
}
