//! On-module UFS file storage dialect.

use core::fmt::Write as _;

use super::scan::{find_line, Scanner};
use super::{AtCmd, CmdLine, NoResponse, ResponseLines, Terminator};
use crate::error::Error;

/// Free and total bytes of the UFS storage area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StorageInfo {
    pub free_bytes: u32,
    pub total_bytes: u32,
}

/// `AT+QFLDS="UFS"`.
pub struct FileStorageInfo;

impl AtCmd for FileStorageInfo {
    type Response = StorageInfo;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+QFLDS=\"UFS\"").map_err(|_| Error::Overflow)
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, "+QFLDS:")?);
        s.literal("+QFLDS:")?;
        let free_bytes = s.u32()?;
        s.comma()?;
        let total_bytes = s.u32()?;
        Ok(StorageInfo {
            free_bytes,
            total_bytes,
        })
    }
}

/// Aggregate size and count of the stored files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FileUsageInfo {
    pub used_bytes: u32,
    pub file_count: u32,
}

/// `AT+QFLDS` - without a storage argument the module reports the total
/// size and number of files instead.
pub struct FileUsage;

impl AtCmd for FileUsage {
    type Response = FileUsageInfo;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+QFLDS").map_err(|_| Error::Overflow)
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, "+QFLDS:")?);
        s.literal("+QFLDS:")?;
        let used_bytes = s.u32()?;
        s.comma()?;
        let file_count = s.u32()?;
        Ok(FileUsageInfo {
            used_bytes,
            file_count,
        })
    }
}

/// `AT+QFLST="<name>"` - size of one file. The module answers with
/// `+CME ERROR` when the file does not exist.
pub struct FileSize<'a> {
    pub name: &'a str,
}

impl AtCmd for FileSize<'_> {
    type Response = u32;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QFLST=\"{}\"", self.name)?;
        Ok(())
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, "+QFLST:")?);
        s.literal("+QFLST:")?;
        let _name = s.quoted::<80>()?;
        s.comma()?;
        s.u32()
    }
}

/// `AT+QFDEL="<name>"`.
pub struct FileDelete<'a> {
    pub name: &'a str,
}

impl AtCmd for FileDelete<'_> {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QFDEL=\"{}\"", self.name)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QFUPL="<name>",<len>` - upload. The exchange terminates on the
/// `CONNECT` line; the raw payload and the `+QFUPL: <size>,<cksum>` result
/// are driven by the file service on top of it.
pub struct FileUpload<'a> {
    pub name: &'a str,
    pub len: usize,
}

impl AtCmd for FileUpload<'_> {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 5_000;
    const TERMINATOR: Terminator = Terminator::Prefix("CONNECT");

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QFUPL=\"{}\",{}", self.name, self.len)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QFDWL="<name>"` - download. Terminates on `CONNECT`; the raw
/// payload follows immediately and its length must be known beforehand
/// (from [`FileSize`]).
pub struct FileDownload<'a> {
    pub name: &'a str,
}

impl AtCmd for FileDownload<'_> {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 5_000;
    const TERMINATOR: Terminator = Terminator::Prefix("CONNECT");

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QFDWL=\"{}\"", self.name)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// Open mode for [`FileOpen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FileMode {
    /// Create if missing, read/write.
    ReadWrite = 0,
    /// Truncate to zero length on open.
    Overwrite = 1,
    ReadOnly = 2,
}

/// `AT+QFOPEN="<name>",<mode>` - returns the module-side file handle.
pub struct FileOpen<'a> {
    pub name: &'a str,
    pub mode: FileMode,
}

impl AtCmd for FileOpen<'_> {
    type Response = u32;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QFOPEN=\"{}\",{}", self.name, self.mode as u8)?;
        Ok(())
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, "+QFOPEN:")?);
        s.literal("+QFOPEN:")?;
        s.u32()
    }
}

/// `AT+QFREAD=<fh>,<len>` - bounded read on the binary read flow; the
/// header line is `CONNECT <count>`.
pub struct FileRead {
    pub fh: u32,
    pub len: usize,
}

impl AtCmd for FileRead {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QFREAD={},{}", self.fh, self.len)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QFWRITE=<fh>,<len>` - terminates on `CONNECT`; payload and
/// `+QFWRITE: <written>,<total>` handled by the file service.
pub struct FileWrite {
    pub fh: u32,
    pub len: usize,
}

impl AtCmd for FileWrite {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 5_000;
    const TERMINATOR: Terminator = Terminator::Prefix("CONNECT");

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QFWRITE={},{}", self.fh, self.len)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// Seek origin for [`FileSeek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SeekOrigin {
    Start = 0,
    Current = 1,
    End = 2,
}

/// `AT+QFSEEK=<fh>,<offset>,<origin>`.
pub struct FileSeek {
    pub fh: u32,
    pub offset: u32,
    pub origin: SeekOrigin,
}

impl AtCmd for FileSeek {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QFSEEK={},{},{}",
            self.fh, self.offset, self.origin as u8
        )?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QFPOSITION=<fh>` - current offset.
pub struct FilePosition {
    pub fh: u32,
}

impl AtCmd for FilePosition {
    type Response = u32;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QFPOSITION={}", self.fh)?;
        Ok(())
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, "+QFPOSITION:")?);
        s.literal("+QFPOSITION:")?;
        s.u32()
    }
}

/// `AT+QFTUCAT=<fh>` - truncate at the current offset.
pub struct FileTruncate {
    pub fh: u32,
}

impl AtCmd for FileTruncate {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QFTUCAT={}", self.fh)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QFCLOSE=<fh>`.
pub struct FileClose {
    pub fh: u32,
}

impl AtCmd for FileClose {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QFCLOSE={}", self.fh)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}
