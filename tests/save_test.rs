// test of save archive import and export through the file system
use ps2kit::fs::ps2mc::*;
use ps2kit::save;
use ps2kit::save::{SaveFile,SaveType};

fn small_params() -> FormatParams {
    FormatParams {
        with_ecc: true,
        page_size: 512,
        pages_per_erase_block: 16,
        pages_per_card: 1024
    }
}

fn format_card(path: &std::path::Path) -> Card {
    let f = std::fs::OpenOptions::new().read(true).write(true).create(true)
        .truncate(true).open(path).expect("could not create image");
    Card::from_stream(Box::new(f),true,Some(small_params())).expect("format failed")
}

fn sample_save(name: &[u8],body: &[u8]) -> SaveFile {
    let tod = Tod { sec: 30, min: 45, hour: 13, mday: 24, month: 12, year: 2004 };
    let mut sf = SaveFile::new();
    let mut dir = Dirent::create(DF_RWX | DF_DIR | DF_0400 | DF_EXISTS,2,0,0,tod,name);
    dir.set_mode(dir.mode() & !DF_WRITE);
    sf.set_directory(dir);
    sf.push_file(Dirent::create(DF_RWX | DF_FILE | DF_0400 | DF_EXISTS,
        body.len() as u32,0,0,tod,b"X"),body.to_vec());
    let mut icon = vec![0;964];
    icon[0..4].copy_from_slice(b"PS2D");
    icon[192..196].copy_from_slice(b"GAME");
    sf.push_file(Dirent::create(DF_RWX | DF_FILE | DF_0400 | DF_EXISTS,
        964,0,0,tod,b"icon.sys"),icon);
    sf
}

#[test]
fn import_preserves_metadata() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("import.ps2");
    let mut card = format_card(&path);
    let body: Vec<u8> = (0..512).map(|i| (i % 256) as u8).collect();
    let sf = sample_save(b"BESLES-99999",&body);
    assert!(card.import_save_file(&sf,false,None).expect("import failed"));
    let ent = card.get_dirent("/BESLES-99999").expect("no dirent");
    // archive carried the mode and timestamps
    assert_eq!(ent.mode() & DF_WRITE,0);
    assert_eq!(ent.modified(),sf.dirent().modified());
    let fent = card.get_dirent("/BESLES-99999/X").expect("no dirent");
    assert_eq!(fent.modified(),sf.file(0).0.modified());
    let h = card.open("/BESLES-99999/X",OpenMode::Read).expect("open failed");
    assert_eq!(card.read(h,None).expect("read failed"),body);
    card.close(h).expect("close failed");
    // importing again collides unless told otherwise
    assert!(card.import_save_file(&sf,false,None).is_err());
    assert_eq!(card.import_save_file(&sf,true,None).expect("import errored"),false);
    assert!(card.check().expect("check errored"));
}

#[test]
fn export_import_psu_round_trip() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("psu.ps2");
    let mut card = format_card(&path);
    let body = vec![0xc3;700];
    let sf = sample_save(b"BASLUS-11111",&body);
    card.import_save_file(&sf,false,None).expect("import failed");
    let exported = card.export_save_file("/BASLUS-11111").expect("export failed");
    let psu = save::psu::save(&exported).expect("psu save failed");
    assert_eq!(save::detect_file_type(&psu),Some(SaveType::Psu));
    let back = save::psu::load(&psu).expect("psu load failed");
    assert_eq!(back.dirent().name(),b"BASLUS-11111");
    assert_eq!(back.count(),2);
    assert_eq!(back.file(0).0.name(),b"X");
    assert_eq!(back.file(0).1,&body[..]);
    assert_eq!(back.file(0).0.modified(),sf.file(0).0.modified());
}

#[test]
fn psu_to_max_and_back() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("max.ps2");
    let mut card = format_card(&path);
    let body: Vec<u8> = (0..512).map(|i| (i as u8).wrapping_mul(3)).collect();
    let sf = sample_save(b"BESLES-12345",&body);
    let psu = save::psu::save(&sf).expect("psu save failed");
    let loaded = save::psu::load(&psu).expect("psu load failed");
    card.import_save_file(&loaded,false,None).expect("import failed");

    let exported = card.export_save_file("/BESLES-12345").expect("export failed");
    let max = save::max::save(&exported).expect("max save failed");
    assert_eq!(save::detect_file_type(&max),Some(SaveType::Max));
    let from_max = save::max::load(&max).expect("max load failed");
    card.rmdir("/BESLES-12345").expect("rmdir failed");
    card.import_save_file(&from_max,false,None).expect("second import failed");
    // the file body survives the compressed round trip byte for byte
    let h = card.open("/BESLES-12345/X",OpenMode::Read).expect("open failed");
    assert_eq!(card.read(h,None).expect("read failed"),body);
    card.close(h).expect("close failed");
    assert!(card.check().expect("check errored"));
}

#[test]
fn import_to_named_directory() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("named.ps2");
    let mut card = format_card(&path);
    let sf = sample_save(b"BESLES-00000",b"abc");
    card.import_save_file(&sf,false,Some("/RENAMED")).expect("import failed");
    assert!(card.get_dirent("/RENAMED/X").is_ok());
    assert!(card.get_dirent("/BESLES-00000").is_err());
}

#[test]
fn detect_by_magic() {
    assert_eq!(save::detect_file_type(b"Ps2PowerSave~~~~~~"),Some(SaveType::Max));
    assert_eq!(save::detect_file_type(b"\x0d\x00\x00\x00SharkPortSave..."),Some(SaveType::Sps));
    assert_eq!(save::detect_file_type(b"CFU\x00junk"),Some(SaveType::Cbs));
    assert_eq!(save::detect_file_type(b"nPortwhatever"),Some(SaveType::Npo));
    assert_eq!(save::detect_file_type(b"garbage"),None);
}

#[test]
fn longname_has_crc() {
    let sf = sample_save(b"BESLES-12345",b"xyz");
    let name = save::make_longname("BESLES-12345",&sf);
    assert!(name.contains("GAME"));
    assert!(name.ends_with(')'));
    assert!(!name.contains('/'));
}
