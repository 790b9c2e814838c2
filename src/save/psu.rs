//! ## EMS (.psu) archives
//!
//! The EMS format is the card's own directory layout flattened into a
//! file: the save directory entry, the two dot entries, then each file's
//! entry followed by its data padded to a cluster boundary.  There is no
//! magic number and no compression.

use a2kit_macro::DiskStruct;
use log::debug;
use super::{SaveFile,Error,read_fixed};
use crate::fs::ps2mc::{Dirent,Tod,DIRENT_LENGTH,CLUSTER_SIZE};
use crate::fs::ps2mc::{DF_RWX,DF_DIR,DF_0400,DF_EXISTS};
use crate::{DYNERR,round_up};

pub fn load(dat: &[u8]) -> Result<SaveFile,DYNERR> {
    let mut ptr = 0;
    let mut dirent = Dirent::from_bytes(read_fixed(dat,&mut ptr,DIRENT_LENGTH)?).expect("unreachable");
    let dotent = Dirent::from_bytes(read_fixed(dat,&mut ptr,DIRENT_LENGTH)?).expect("unreachable");
    let dotdotent = Dirent::from_bytes(read_fixed(dat,&mut ptr,DIRENT_LENGTH)?).expect("unreachable");
    if !dirent.is_dir() || !dotent.is_dir() || !dotdotent.is_dir() || dirent.length() < 2 {
        debug!("leading entries do not look like a save directory");
        return Err(Box::new(Error::Corrupt("not an EMS (.psu) save file".to_string())));
    }
    // the stored count includes the dot entries, the model's does not
    dirent.set_length(dirent.length() - 2);
    let count = dirent.length();
    let mut sf = SaveFile::new();
    sf.set_directory(dirent);
    for _i in 0..count {
        let ent = Dirent::from_bytes(read_fixed(dat,&mut ptr,DIRENT_LENGTH)?).expect("unreachable");
        if !ent.is_file() {
            return Err(Box::new(Error::Subdirectory));
        }
        let flen = ent.length() as usize;
        let data = read_fixed(dat,&mut ptr,flen)?.to_vec();
        read_fixed(dat,&mut ptr,round_up(flen,CLUSTER_SIZE) - flen)?;
        sf.push_file(ent,data);
    }
    Ok(sf)
}

pub fn save(sf: &SaveFile) -> Result<Vec<u8>,DYNERR> {
    let mut out = Vec::new();
    let mut dirent = sf.dirent().clone();
    let created = Tod::unpack(&dirent.created);
    dirent.set_length(dirent.length() + 2);
    out.append(&mut dirent.to_bytes());
    let dot = Dirent::create(DF_RWX | DF_DIR | DF_0400 | DF_EXISTS,0,0,0,created,b".");
    let dotdot = Dirent::create(DF_RWX | DF_DIR | DF_0400 | DF_EXISTS,0,0,0,created,b"..");
    out.append(&mut dot.to_bytes());
    out.append(&mut dotdot.to_bytes());
    for i in 0..sf.count() {
        let (ent,data) = sf.file(i);
        if !ent.is_file() {
            return Err(Box::new(Error::Subdirectory));
        }
        out.append(&mut ent.to_bytes());
        out.extend_from_slice(data);
        out.resize(out.len() + round_up(data.len(),CLUSTER_SIZE) - data.len(),0);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ps2mc::DF_FILE;

    fn sample() -> SaveFile {
        let tod = Tod { sec: 1, min: 2, hour: 3, mday: 4, month: 5, year: 2005 };
        let mut sf = SaveFile::new();
        sf.set_directory(Dirent::create(DF_RWX | DF_DIR | DF_0400 | DF_EXISTS,2,0,0,tod,b"BESLES-12345"));
        sf.push_file(Dirent::create(DF_RWX | DF_FILE | DF_0400 | DF_EXISTS,5,0,0,tod,b"data.bin"),
            b"hello".to_vec());
        sf.push_file(Dirent::create(DF_RWX | DF_FILE | DF_0400 | DF_EXISTS,1030,0,0,tod,b"big.bin"),
            vec![0xa5;1030]);
        sf
    }

    #[test]
    fn round_trip() {
        let sf = sample();
        let img = save(&sf).expect("save failed");
        assert_eq!(img.len() % 512,0);
        assert_eq!(super::super::detect_file_type(&img),Some(super::super::SaveType::Psu));
        let back = load(&img).expect("load failed");
        assert_eq!(back.dirent().name(),b"BESLES-12345");
        assert_eq!(back.count(),2);
        assert_eq!(back.file(0).0.name(),b"data.bin");
        assert_eq!(back.file(0).1,b"hello");
        assert_eq!(back.file(1).1,&vec![0xa5;1030][..]);
        assert_eq!(back.file(1).0.modified(),sf.file(1).0.modified());
    }
}
