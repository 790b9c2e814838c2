// test of the PS2 memory card file system
use std::io::{Write,Seek,SeekFrom};
use ps2kit::fs::ps2mc::*;
use ps2kit::create_card_from_file;

/// small card for most tests, 1024 pages is 64 erase blocks
fn small_params() -> FormatParams {
    FormatParams {
        with_ecc: true,
        page_size: 512,
        pages_per_erase_block: 16,
        pages_per_card: 1024
    }
}

fn format_card(path: &std::path::Path,params: FormatParams) -> Card {
    let f = std::fs::OpenOptions::new().read(true).write(true).create(true)
        .truncate(true).open(path).expect("could not create image");
    Card::from_stream(Box::new(f),true,Some(params)).expect("format failed")
}

fn write_file(card: &mut Card,path: &str,dat: &[u8]) {
    let h = card.open(path,OpenMode::Write).expect("open failed");
    card.write(h,dat).expect("write failed");
    card.close(h).expect("close failed");
}

fn read_file(card: &mut Card,path: &str) -> Vec<u8> {
    let h = card.open(path,OpenMode::Read).expect("open failed");
    let dat = card.read(h,None).expect("read failed");
    card.close(h).expect("close failed");
    dat
}

#[test]
fn format_and_reopen() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("small.ps2");
    let mut card = format_card(&path,small_params());
    assert!(card.check().expect("check errored"));
    card.close_all().expect("close failed");
    drop(card);

    let before = std::fs::read(&path).expect("could not read image");
    let mut card = create_card_from_file(path.to_str().unwrap(),false,false).expect("reopen failed");
    assert_eq!(card.cluster_size(),1024);
    assert_eq!(card.clusters_per_card(),512);
    let root = card.list_dir("/").expect("no root listing");
    assert_eq!(root.len(),2);
    assert_eq!(root[0].name(),b".");
    assert_eq!(root[1].name(),b"..");
    assert!(root[0].is_dir() && root[0].exists());
    assert!(root[1].is_dir() && root[1].exists());
    assert!(card.check().expect("check errored"));
    card.close_all().expect("close failed");
    drop(card);
    let after = std::fs::read(&path).expect("could not read image");
    assert_eq!(before[0..0x154],after[0..0x154]);
}

#[test]
fn standard_card_geometry() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("standard.ps2");
    let mut card = format_card(&path,FormatParams::standard());
    // 8134 free clusters on a fresh retail size card
    assert_eq!(card.get_free_space().expect("free space errored"),8134 * 1024);
    assert_eq!(card.get_allocatable_space(),8135 * 1024);
    card.close_all().expect("close failed");
    drop(card);
    // 16384 pages of 512 data + 16 spare bytes
    let meta = std::fs::metadata(&path).expect("no metadata");
    assert_eq!(meta.len(),8_650_752);
}

#[test]
fn file_write_then_read() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("rw.ps2");
    let mut card = format_card(&path,small_params());
    let mut dat = Vec::new();
    for i in 0..5000 {
        dat.push((i % 251) as u8);
    }
    write_file(&mut card,"/stuff.bin",&dat);
    assert_eq!(read_file(&mut card,"/stuff.bin"),dat);
    // survives a reopen
    card.close_all().expect("close failed");
    drop(card);
    let mut card = create_card_from_file(path.to_str().unwrap(),false,false).expect("reopen failed");
    assert_eq!(read_file(&mut card,"/stuff.bin"),dat);
    assert!(card.check().expect("check errored"));
}

#[test]
fn chain_matches_length() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("chain.ps2");
    let mut card = format_card(&path,small_params());
    card.mkdir("/A").expect("mkdir failed");
    let free0 = card.get_free_space().expect("free space errored");
    write_file(&mut card,"/A/B",&vec![0x5a;3000]);
    let ent = card.get_dirent("/A/B").expect("no dirent");
    assert_eq!(ent.length(),3000);
    // 3000 bytes occupy 3 clusters, the tail holding 952 live bytes
    assert_eq!(3000 % 1024,952);
    let free1 = card.get_free_space().expect("free space errored");
    assert_eq!(free0 - free1,3 * 1024);
    assert!(card.check().expect("check errored"));
}

#[test]
fn remove_releases_clusters() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("rm.ps2");
    let mut card = format_card(&path,small_params());
    let free0 = card.get_free_space().expect("free space errored");
    write_file(&mut card,"/junk",&vec![1;4096]);
    assert!(card.get_free_space().expect("free space errored") < free0);
    card.remove("/junk").expect("remove failed");
    assert_eq!(card.get_free_space().expect("free space errored"),free0);
    assert!(card.check().expect("check errored"));
}

#[test]
fn rmdir_is_recursive() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("rmdir.ps2");
    let mut card = format_card(&path,small_params());
    let free0 = card.get_free_space().expect("free space errored");
    card.mkdir("/SAVE").expect("mkdir failed");
    card.mkdir("/SAVE/SUB").expect("mkdir failed");
    write_file(&mut card,"/SAVE/icon.sys",&vec![2;964]);
    write_file(&mut card,"/SAVE/SUB/deep",&vec![3;100]);
    // remove refuses a populated directory
    assert!(card.remove("/SAVE").is_err());
    card.rmdir("/SAVE").expect("rmdir failed");
    card.flush().expect("flush failed");
    assert!(card.get_dirent("/SAVE").is_err());
    assert_eq!(card.get_free_space().expect("free space errored"),free0);
    assert!(card.check().expect("check errored"));
}

#[test]
fn seek_sparse_write_and_line_reads() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("seek.ps2");
    let mut card = format_card(&path,small_params());
    // writing past the end zero fills the gap, allocating the skipped clusters
    let h = card.open("/sparse",OpenMode::Write).expect("open failed");
    card.seek(h,3000).expect("seek failed");
    card.write(h,b"tail").expect("write failed");
    card.close(h).expect("close failed");
    let ent = card.get_dirent("/sparse").expect("no dirent");
    assert_eq!(ent.length(),3004);
    let dat = read_file(&mut card,"/sparse");
    assert_eq!(&dat[0..3000],&vec![0;3000][..]);
    assert_eq!(&dat[3000..],b"tail");
    assert!(card.check().expect("check errored"));

    // line oriented reads, one line straddling the cluster boundary
    let mut text = Vec::new();
    for i in 0..200 {
        text.extend_from_slice(format!("line {:04}\n",i).as_bytes());
    }
    write_file(&mut card,"/lines.txt",&text);
    let h = card.open("/lines.txt",OpenMode::Read).expect("open failed");
    assert_eq!(card.read_until(h,None,b'\n').expect("read failed"),b"line 0000\n");
    assert_eq!(card.read_until(h,None,b'\n').expect("read failed"),b"line 0001\n");
    card.seek(h,1020).expect("seek failed");
    assert_eq!(card.read_until(h,None,b'\n').expect("read failed"),b"line 0102\n");
    card.seek(h,1024).expect("seek failed");
    let partial = card.read_until(h,None,b'\n').expect("read failed");
    assert_eq!(partial,&text[1024..1030]);
    assert!(partial.ends_with(b"\n"));
    card.close(h).expect("close failed");
}

#[test]
fn open_file_is_busy() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("busy.ps2");
    let mut card = format_card(&path,small_params());
    write_file(&mut card,"/locked",b"data");
    let h = card.open("/locked",OpenMode::Read).expect("open failed");
    assert!(card.remove("/locked").is_err());
    card.close(h).expect("close failed");
    card.remove("/locked").expect("remove failed");
}

#[test]
fn modification_time_propagation() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("times.ps2");
    let mut card = format_card(&path,small_params());
    card.mkdir("/A").expect("mkdir failed");
    write_file(&mut card,"/A/B",b"first");
    let old = Tod { sec: 0, min: 0, hour: 0, mday: 1, month: 1, year: 2000 };
    for target in ["/A/B","/A"] {
        let mut ent = card.get_dirent(target).expect("no dirent");
        ent.created = old.pack();
        ent.modified = old.pack();
        card.set_dirent(target,&ent).expect("set_dirent failed");
    }
    assert_eq!(card.get_dirent("/A").expect("no dirent").modified(),old);
    let root_before = card.get_dirent("/").expect("no dirent").modified();
    // a data write stamps the file and its directory
    let h = card.open("/A/B",OpenMode::Append).expect("open failed");
    card.write(h,b" second").expect("write failed");
    card.close(h).expect("close failed");
    assert_ne!(card.get_dirent("/A/B").expect("no dirent").modified(),old);
    assert_ne!(card.get_dirent("/A").expect("no dirent").modified(),old);
    // but the directory's own change never reached the root
    assert_eq!(card.get_dirent("/").expect("no dirent").modified(),root_before);
    assert_eq!(read_file(&mut card,"/A/B"),b"first second".to_vec());
}

#[test]
fn shared_dirloc_handles_see_updates() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("notify.ps2");
    let mut card = format_card(&path,small_params());
    write_file(&mut card,"/f",b"0123456789");
    let reader = card.open("/f",OpenMode::Read).expect("open failed");
    let writer = card.open("/f",OpenMode::Append).expect("open failed");
    card.write(writer,b"abcdef").expect("write failed");
    // the reader sees the appended length without reopening
    let dat = card.read(reader,None).expect("read failed");
    assert_eq!(dat,b"0123456789abcdef");
    card.close(reader).expect("close failed");
    card.close(writer).expect("close failed");
}

#[test]
fn icon_sys_lookup() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("icon.ps2");
    let mut card = format_card(&path,small_params());
    card.mkdir("/BESLES-12345ABCD").expect("mkdir failed");
    let mut icon = vec![0;964];
    icon[0..4].copy_from_slice(b"PS2D");
    for i in 4..964 {
        icon[i] = (i % 200) as u8;
    }
    write_file(&mut card,"/BESLES-12345ABCD/icon.sys",&icon);
    let got = card.get_icon_sys("/BESLES-12345ABCD").expect("icon errored");
    assert_eq!(got,Some(icon));
    // a directory without one
    card.mkdir("/EMPTY").expect("mkdir failed");
    assert_eq!(card.get_icon_sys("/EMPTY").expect("icon errored"),None);
}

#[test]
fn path_resolution() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("paths.ps2");
    let mut card = format_card(&path,small_params());
    card.mkdir("/A").expect("mkdir failed");
    card.mkdir("/A/B").expect("mkdir failed");
    write_file(&mut card,"/A/B/f",b"x");
    card.chdir("/A/B").expect("chdir failed");
    assert_eq!(read_file(&mut card,"f"),b"x");
    assert_eq!(read_file(&mut card,"./f"),b"x");
    assert_eq!(read_file(&mut card,"../B/f"),b"x");
    assert_eq!(read_file(&mut card,"../../A/B/f"),b"x");
    card.chdir("..").expect("chdir failed");
    assert_eq!(read_file(&mut card,"B/f"),b"x");
    assert!(card.open("/A/missing",OpenMode::Read).is_err());
    assert!(card.open("/missing/f",OpenMode::Read).is_err());
    assert!(card.chdir("/A/B/f").is_err());
}

#[test]
fn glob_patterns() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("glob.ps2");
    let mut card = format_card(&path,small_params());
    card.mkdir("/BESLES-111").expect("mkdir failed");
    card.mkdir("/BASLUS-222").expect("mkdir failed");
    write_file(&mut card,"/BESLES-111/icon.sys",b"nope");
    let mut hits = card.glob("/BESLES-*").expect("glob errored");
    hits.sort();
    assert_eq!(hits,vec!["/BESLES-111"]);
    let mut hits = card.glob("/B*").expect("glob errored");
    hits.sort();
    assert_eq!(hits,vec!["/BASLUS-222","/BESLES-111"]);
    let hits = card.glob("/*/icon.sys").expect("glob errored");
    assert_eq!(hits,vec!["/BESLES-111/icon.sys"]);
}

#[test]
fn single_bit_error_is_corrected() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("flip.ps2");
    let mut card = format_card(&path,small_params());
    let marker: Vec<u8> = (0..1024).map(|i| (i as u8).wrapping_mul(7).wrapping_add(13)).collect();
    write_file(&mut card,"/victim",&marker);
    card.close_all().expect("close failed");
    drop(card);
    // flip one data bit in the raw image
    let mut raw = std::fs::read(&path).expect("could not read image");
    let off = raw.windows(16).position(|w| w==&marker[0..16]).expect("marker not found");
    raw[off + 100] ^= 0x20;
    let mut f = std::fs::OpenOptions::new().write(true).open(&path).expect("could not open image");
    f.seek(SeekFrom::Start((off + 100) as u64)).expect("seek failed");
    f.write_all(&[raw[off + 100]]).expect("patch failed");
    drop(f);
    let mut card = create_card_from_file(path.to_str().unwrap(),false,false).expect("reopen failed");
    assert_eq!(read_file(&mut card,"/victim"),marker);
}

#[test]
fn image_without_spare_bytes() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("noecc.ps2");
    let mut params = small_params();
    params.with_ecc = false;
    let mut card = format_card(&path,params);
    write_file(&mut card,"/f",b"packed");
    card.close_all().expect("close failed");
    drop(card);
    // 1024 pages of 512 bytes, nothing else
    assert_eq!(std::fs::metadata(&path).expect("no metadata").len(),1024 * 512);
    // the reader notices the missing spare area on its own
    let mut card = create_card_from_file(path.to_str().unwrap(),false,false).expect("reopen failed");
    assert_eq!(read_file(&mut card,"/f"),b"packed");
    assert!(card.check().expect("check errored"));
}

#[test]
fn write_mode_truncates() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("trunc.ps2");
    let mut card = format_card(&path,small_params());
    write_file(&mut card,"/f",&vec![9;2048]);
    write_file(&mut card,"/f",b"tiny");
    assert_eq!(read_file(&mut card,"/f"),b"tiny");
    assert!(card.check().expect("check errored"));
}

#[test]
fn read_only_handle_refuses_write() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("ro.ps2");
    let mut card = format_card(&path,small_params());
    write_file(&mut card,"/f",b"data");
    let h = card.open("/f",OpenMode::Read).expect("open failed");
    assert!(card.write(h,b"nope").is_err());
    card.close(h).expect("close failed");
    // a closed handle is dead
    assert!(card.read(h,None).is_err());
}

#[test]
fn card_full_reports_no_space() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("full.ps2");
    let mut card = format_card(&path,small_params());
    let free = card.get_free_space().expect("free space errored");
    let h = card.open("/hog",OpenMode::Write).expect("open failed");
    assert!(card.write(h,&vec![0x11;free]).is_ok());
    let r = card.write(h,&vec![0x22;4096]);
    assert!(r.is_err());
    card.close(h).expect("close failed");
}
