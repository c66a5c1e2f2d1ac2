//! On-module UFS file storage.

use core::convert::TryInto;

use embedded_hal_nb::serial;
use embedded_time::duration::{Generic, Milliseconds};
use embedded_time::Clock;

use crate::client::Bg96Client;
use crate::command::file::{
    FileClose, FileDelete, FileDownload, FileMode, FileOpen, FilePosition, FileRead, FileSeek,
    FileSize, FileStorageInfo, FileTruncate, FileUpload, FileUsage, FileWrite, SeekOrigin,
};
use crate::command::scan::Scanner;
use crate::error::Error;
use crate::socket::{SocketEvent, SocketHandle};

pub use crate::command::file::{FileMode as Mode, SeekOrigin as Origin};

const TRANSFER_TIMEOUT_MS: u32 = 10_000;
const RESULT_TIMEOUT_MS: u32 = 5_000;

/// 16-bit checksum over big-endian byte pairs, XOR-folded; the module
/// reports the same value after uploads and downloads.
pub fn checksum(data: &[u8]) -> u16 {
    let mut cksum = 0u16;
    let mut pairs = data.chunks_exact(2);
    for pair in &mut pairs {
        cksum ^= u16::from_be_bytes([pair[0], pair[1]]);
    }
    if let [last] = pairs.remainder() {
        cksum ^= (*last as u16) << 8;
    }
    cksum
}

/// File storage access. Borrow it from a client on demand; it holds no
/// state of its own.
pub struct FileStore<'a, W, CLK, C, const N: usize, const L: usize> {
    client: &'a Bg96Client<W, CLK, C, N, L>,
}

impl<'a, W, CLK, C, const N: usize, const L: usize> FileStore<'a, W, CLK, C, N, L>
where
    W: serial::Read<u8> + serial::Write<u8>,
    CLK: Clock,
    Generic<CLK::T>: TryInto<Milliseconds>,
    C: FnMut(SocketHandle, SocketEvent),
{
    pub fn new(client: &'a Bg96Client<W, CLK, C, N, L>) -> Self {
        FileStore { client }
    }

    pub fn free_size(&self) -> Result<u32, Error> {
        Ok(self.client.send_at(&FileStorageInfo)?.free_bytes)
    }

    pub fn total_size(&self) -> Result<u32, Error> {
        Ok(self.client.send_at(&FileStorageInfo)?.total_bytes)
    }

    pub fn file_count(&self) -> Result<u32, Error> {
        Ok(self.client.send_at(&FileUsage)?.file_count)
    }

    pub fn files_size(&self) -> Result<u32, Error> {
        Ok(self.client.send_at(&FileUsage)?.used_bytes)
    }

    pub fn file_size(&self, name: &str) -> Result<u32, Error> {
        self.client.send_at(&FileSize { name })
    }

    pub fn exists(&self, name: &str) -> Result<bool, Error> {
        match self.file_size(name) {
            Ok(_) => Ok(true),
            Err(Error::Device(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn delete(&self, name: &str) -> Result<(), Error> {
        self.client.send_at(&FileDelete { name })?;
        Ok(())
    }

    /// Upload a file, verifying the module's size and checksum report.
    pub fn upload(&self, name: &str, data: &[u8]) -> Result<(), Error> {
        let mut channel = self.client.channel.try_borrow_mut()?;
        channel.exchange(&FileUpload {
            name,
            len: data.len(),
        })?;
        channel.write_raw(data)?;
        let line = channel.wait_line("+QFUPL:", RESULT_TIMEOUT_MS)?;
        channel.wait_ok(RESULT_TIMEOUT_MS)?;

        let mut s = Scanner::new(line.as_str());
        s.literal("+QFUPL:")?;
        let size = s.u32()?;
        s.comma()?;
        let reported = s.hex_u32()? as u16;
        if size != data.len() as u32 || reported != checksum(data) {
            warn!("upload of {} corrupted in transfer", name);
            return Err(Error::InvalidResponse);
        }
        Ok(())
    }

    /// Upload, replacing any existing file of the same name.
    pub fn upload_replacing(&self, name: &str, data: &[u8]) -> Result<(), Error> {
        if self.exists(name)? {
            self.delete(name)?;
        }
        self.upload(name, data)
    }

    /// Download a whole file into `buf`, returning its size. The length
    /// has to be known up front, so this costs one extra size exchange.
    pub fn download(&self, name: &str, buf: &mut [u8]) -> Result<usize, Error> {
        let size = self.file_size(name)? as usize;
        if size > buf.len() {
            return Err(Error::Overflow);
        }
        let mut channel = self.client.channel.try_borrow_mut()?;
        channel.exchange(&FileDownload { name })?;
        channel.read_exact(&mut buf[..size], TRANSFER_TIMEOUT_MS)?;
        let line = channel.wait_line("+QFDWL:", RESULT_TIMEOUT_MS)?;
        channel.wait_ok(RESULT_TIMEOUT_MS)?;

        let mut s = Scanner::new(line.as_str());
        s.literal("+QFDWL:")?;
        let reported_size = s.u32()?;
        s.comma()?;
        let reported_cksum = s.hex_u32()? as u16;
        if reported_size != size as u32 || reported_cksum != checksum(&buf[..size]) {
            warn!("download of {} corrupted in transfer", name);
            return Err(Error::InvalidResponse);
        }
        Ok(size)
    }

    /// Open a file, returning the module-side handle.
    pub fn open(&self, name: &str, mode: FileMode) -> Result<u32, Error> {
        self.client.send_at(&FileOpen { name, mode })
    }

    pub fn close(&self, fh: u32) -> Result<(), Error> {
        self.client.send_at(&FileClose { fh })?;
        Ok(())
    }

    /// Read up to `buf.len()` bytes at the current offset.
    pub fn read(&self, fh: u32, buf: &mut [u8]) -> Result<usize, Error> {
        let mut channel = self.client.channel.try_borrow_mut()?;
        channel.read_binary(
            &FileRead {
                fh,
                len: buf.len(),
            },
            "CONNECT",
            buf,
        )
    }

    /// Write at the current offset, returning the byte count the module
    /// accepted.
    pub fn write(&self, fh: u32, data: &[u8]) -> Result<u32, Error> {
        let mut channel = self.client.channel.try_borrow_mut()?;
        channel.exchange(&FileWrite {
            fh,
            len: data.len(),
        })?;
        channel.write_raw(data)?;
        let line = channel.wait_line("+QFWRITE:", RESULT_TIMEOUT_MS)?;
        channel.wait_ok(RESULT_TIMEOUT_MS)?;

        let mut s = Scanner::new(line.as_str());
        s.literal("+QFWRITE:")?;
        let written = s.u32()?;
        Ok(written)
    }

    pub fn seek(&self, fh: u32, offset: u32, origin: SeekOrigin) -> Result<(), Error> {
        self.client.send_at(&FileSeek { fh, offset, origin })?;
        Ok(())
    }

    pub fn rewind(&self, fh: u32) -> Result<(), Error> {
        self.seek(fh, 0, SeekOrigin::Start)
    }

    pub fn position(&self, fh: u32) -> Result<u32, Error> {
        self.client.send_at(&FilePosition { fh })
    }

    /// Whether the offset sits at the end of the file. Costs three
    /// exchanges; the cursor is restored afterwards.
    pub fn at_eof(&self, fh: u32) -> Result<bool, Error> {
        let pos = self.position(fh)?;
        self.seek(fh, 0, SeekOrigin::End)?;
        let end = self.position(fh)?;
        self.seek(fh, pos, SeekOrigin::Start)?;
        Ok(pos == end)
    }

    /// Truncate the file at the current offset.
    pub fn truncate(&self, fh: u32) -> Result<(), Error> {
        self.client.send_at(&FileTruncate { fh })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_folds_pairs_and_odd_tail() {
        assert_eq!(checksum(b""), 0);
        assert_eq!(checksum(b"AB"), 0x4142);
        assert_eq!(checksum(b"ABC"), 0x4142 ^ 0x4300);
        assert_eq!(checksum(b"ABAB"), 0);
    }
}
