//! ## icon.sys
//!
//! Every save directory carries an icon.sys describing the browser
//! entry: a two line title (Shift-JIS, split at a stored byte offset)
//! and the names of the icon model files.  Only the title is needed
//! here; the 3D icon data itself is left alone.

use crate::fs::TextEncoder;
use crate::fs::ps2mc::zero_terminate;

pub const ICON_SYS_LENGTH: usize = 964;
pub const ICON_SYS_MAGIC: &[u8;4] = b"PS2D";

const TITLE_OFFSET_FIELD: usize = 6;
const TITLE_FIELD: usize = 192;
const TITLE_FIELD_LENGTH: usize = 68;

/// True when the buffer plausibly holds an icon.sys.
pub fn verify(dat: &[u8]) -> bool {
    dat.len() >= ICON_SYS_LENGTH && dat[0..4]==ICON_SYS_MAGIC[..]
}

/// The two lines of the title, converted through the given encoder.
/// The split offset is a byte offset into the raw Shift-JIS string.
pub fn icon_sys_title(dat: &[u8],encoder: &dyn TextEncoder) -> (String,String) {
    if dat.len() < TITLE_FIELD + TITLE_FIELD_LENGTH {
        return (String::new(),String::new());
    }
    let offset = u16::from_le_bytes(dat[TITLE_OFFSET_FIELD..TITLE_OFFSET_FIELD+2]
        .try_into().expect("unreachable")) as usize;
    let title = zero_terminate(&dat[TITLE_FIELD..TITLE_FIELD+TITLE_FIELD_LENGTH]);
    let split = usize::min(offset,title.len());
    let line1 = encoder.decode(&title[0..split]).unwrap_or_default();
    let line2 = encoder.decode(&title[split..]).unwrap_or_default();
    (line1,line2)
}

#[test]
fn title_split() {
    let mut dat = vec![0;ICON_SYS_LENGTH];
    dat[0..4].copy_from_slice(ICON_SYS_MAGIC);
    dat[TITLE_OFFSET_FIELD..TITLE_OFFSET_FIELD+2].copy_from_slice(&u16::to_le_bytes(5));
    dat[TITLE_FIELD..TITLE_FIELD+10].copy_from_slice(b"GAME SAVES");
    assert!(verify(&dat));
    let (a,b) = icon_sys_title(&dat,&crate::fs::AsciiEncoder);
    assert_eq!(a,"GAME ");
    assert_eq!(b,"SAVES");
}
