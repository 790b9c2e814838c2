//! # Card Image Module
//!
//! The card image is the raw storage under the file system: a flat
//! sequence of pages, each page being `page_size` data bytes immediately
//! followed by `spare_size` bytes of ECC.  Images written without spare
//! data are also supported, in which case `spare_size` is 0 and pages are
//! packed back to back.
//!
//! Reads pass through the ECC check, which silently accepts corrected
//! single bit errors.  The file system layer decides what to do about an
//! image whose very first page fails the check (see `without_spare`).

use std::io::{Read,Write,Seek,SeekFrom};
use log::{debug,error};
use crate::ecc;
use crate::ecc::{EccCodec,EccStatus};
use crate::{DYNERR,STDRESULT};

/// Enumerates card image errors.  The `Display` trait will print the equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("not a PS2 memory card image")]
    ImageTypeMismatch,
    #[error("attempted to read past end of image")]
    TruncatedImage,
    #[error("unrecoverable ECC error")]
    EccFailure,
    #[error("buffer size does not match image geometry")]
    SizeMismatch
}

/// Anything seekable works as backing storage, a file in the usual case,
/// `std::io::Cursor` in tests.
pub trait ImageStream: Read + Write + Seek {}
impl<T: Read + Write + Seek> ImageStream for T {}

/// Raw page and cluster access with ECC applied on the way in and out.
pub struct CardImage {
    stream: Box<dyn ImageStream>,
    codec: Box<dyn EccCodec>,
    page_size: usize,
    spare_size: usize,
    raw_page_size: usize,
    pages_per_cluster: usize,
    cluster_size: usize,
    ignore_ecc: bool
}

impl CardImage {
    /// Wrap a stream using the given geometry.  When `with_spare` is false
    /// the image carries no ECC bytes at all.
    pub fn new(stream: Box<dyn ImageStream>,codec: Box<dyn EccCodec>,page_size: usize,
               pages_per_cluster: usize,with_spare: bool,ignore_ecc: bool) -> Self {
        let spare_size = match with_spare {
            true => crate::div_round_up(page_size,ecc::ECC_CHUNK) * 4,
            false => 0
        };
        Self {
            stream,
            codec,
            page_size,
            spare_size,
            raw_page_size: page_size + spare_size,
            pages_per_cluster,
            cluster_size: page_size * pages_per_cluster,
            ignore_ecc
        }
    }
    pub fn set_ignore_ecc(&mut self,ignore: bool) {
        self.ignore_ecc = ignore;
    }
    /// Drop the spare area from the geometry.  Used when the image turns
    /// out to have been stored without ECC bytes.
    pub fn without_spare(&mut self) {
        self.spare_size = 0;
        self.raw_page_size = self.page_size;
    }
    /// Read bytes without any page interpretation, used for the initial
    /// superblock probe before the geometry is known.
    pub fn read_raw(&mut self,offset: u64,length: usize) -> Result<Vec<u8>,DYNERR> {
        self.stream.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0;length];
        let mut count = 0;
        while count < length {
            match self.stream.read(&mut buf[count..])? {
                0 => return Ok(buf[0..count].to_vec()),
                n => count += n
            }
        }
        Ok(buf)
    }
    pub fn read_page(&mut self,n: usize) -> Result<Vec<u8>,DYNERR> {
        self.stream.seek(SeekFrom::Start((self.raw_page_size * n) as u64))?;
        let mut page = vec![0;self.page_size];
        if self.stream.read_exact(&mut page).is_err() {
            debug!("short read at page {:05X}",n);
            return Err(Box::new(Error::TruncatedImage));
        }
        if self.ignore_ecc || self.spare_size==0 {
            return Ok(page);
        }
        let mut spare = vec![0;self.spare_size];
        if self.stream.read_exact(&mut spare).is_err() {
            debug!("short read in spare area of page {:05X}",n);
            return Err(Box::new(Error::TruncatedImage));
        }
        match ecc::check_page(self.codec.as_ref(),&mut page,&mut spare) {
            EccStatus::Failed => {
                error!("unrecoverable ECC error in page {}",n);
                Err(Box::new(Error::EccFailure))
            },
            _ => Ok(page)
        }
    }
    pub fn write_page(&mut self,n: usize,buf: &[u8]) -> STDRESULT {
        if buf.len() != self.page_size {
            return Err(Box::new(Error::SizeMismatch));
        }
        self.stream.seek(SeekFrom::Start((self.raw_page_size * n) as u64))?;
        self.stream.write_all(buf)?;
        if self.spare_size != 0 {
            let mut spare = ecc::calculate_page(self.codec.as_ref(),buf);
            spare.resize(self.spare_size,0);
            self.stream.write_all(&spare)?;
        }
        Ok(())
    }
    pub fn read_cluster(&mut self,n: usize) -> Result<Vec<u8>,DYNERR> {
        if self.spare_size==0 {
            let buf = self.read_raw((self.cluster_size * n) as u64,self.cluster_size)?;
            if buf.len() != self.cluster_size {
                debug!("short read at cluster {}",n);
                return Err(Box::new(Error::TruncatedImage));
            }
            return Ok(buf);
        }
        let mut ans = Vec::new();
        for page in n*self.pages_per_cluster..(n+1)*self.pages_per_cluster {
            ans.append(&mut self.read_page(page)?);
        }
        Ok(ans)
    }
    pub fn write_cluster(&mut self,n: usize,buf: &[u8]) -> STDRESULT {
        if buf.len() != self.cluster_size {
            return Err(Box::new(Error::SizeMismatch));
        }
        if self.spare_size==0 {
            self.stream.seek(SeekFrom::Start((self.cluster_size * n) as u64))?;
            self.stream.write_all(buf)?;
            return Ok(());
        }
        for i in 0..self.pages_per_cluster {
            self.write_page(n*self.pages_per_cluster + i,&buf[i*self.page_size..(i+1)*self.page_size])?;
        }
        Ok(())
    }
    /// Fill whole raw pages, spare bytes included, with a constant.
    /// Erase blocks on real hardware read back as all ones.
    pub fn fill_raw_pages(&mut self,first_page: usize,count: usize,value: u8) -> STDRESULT {
        self.stream.seek(SeekFrom::Start((self.raw_page_size * first_page) as u64))?;
        let page = vec![value;self.raw_page_size];
        for _i in 0..count {
            self.stream.write_all(&page)?;
        }
        Ok(())
    }
    pub fn flush(&mut self) -> STDRESULT {
        self.stream.flush()?;
        Ok(())
    }
}
