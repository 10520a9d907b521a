//! Open file handles: sequential stream access to a device

use super::device::ScullDevice;
use super::serializer::Interrupt;
use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io::SeekFrom;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Access mode requested at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl OpenMode {
    pub fn can_read(&self) -> bool {
        matches!(self, OpenMode::ReadOnly | OpenMode::ReadWrite)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, OpenMode::WriteOnly | OpenMode::ReadWrite)
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" | "ro" | "read" => Ok(OpenMode::ReadOnly),
            "w" | "wo" | "write" => Ok(OpenMode::WriteOnly),
            "rw" | "read-write" => Ok(OpenMode::ReadWrite),
            other => Err(Error::InvalidArgument(format!("Unknown open mode '{}'", other))),
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpenMode::ReadOnly => "r",
            OpenMode::WriteOnly => "w",
            OpenMode::ReadWrite => "rw",
        };
        f.write_str(s)
    }
}

/// A file position bound to one device
///
/// Each read or write moves at most one quantum's remaining span and
/// advances the position by the count transferred.
#[derive(Debug)]
pub struct ScullFile {
    device: Arc<ScullDevice>,
    mode: OpenMode,
    pos: u64,
    interrupt: Interrupt,
}

impl ScullFile {
    /// Open `device`; write-only opens truncate it first
    pub(crate) async fn open(
        device: Arc<ScullDevice>,
        mode: OpenMode,
        interrupt: Interrupt,
    ) -> Result<Self> {
        if mode == OpenMode::WriteOnly {
            device.trim(&interrupt).await?;
        }
        debug!(device = device.index(), %mode, "Opened device");
        Ok(Self {
            device,
            mode,
            pos: 0,
            interrupt,
        })
    }

    pub fn device(&self) -> &ScullDevice {
        &self.device
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Read up to `count` bytes from the current position
    pub async fn read(&mut self, count: usize) -> Result<Bytes> {
        self.check_readable()?;
        let mut buf = BytesMut::with_capacity(count.min(64 * 1024));
        let n = self
            .device
            .read(self.pos, count, &mut buf, &self.interrupt)
            .await?;
        self.pos += n as u64;
        Ok(buf.freeze())
    }

    /// Read into `dst`, returning the number of bytes copied
    pub async fn read_into(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.check_readable()?;
        let max_len = dst.len();
        let mut cursor = dst;
        let n = self
            .device
            .read(self.pos, max_len, &mut cursor, &self.interrupt)
            .await?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Write from the current position; may store fewer bytes than given
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.check_writable()?;
        let n = self.device.write(self.pos, data, &self.interrupt).await?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Keep writing until all of `data` is stored
    pub async fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write(data).await?;
            data = &data[n..];
        }
        Ok(())
    }

    /// Move the file position
    pub async fn seek(&mut self, from: SeekFrom) -> Result<u64> {
        let target = match from {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let size = self.device.size(&self.interrupt).await?;
                size.checked_add_signed(delta)
            }
        };

        let pos = target
            .ok_or_else(|| Error::InvalidArgument(format!("Seek {:?} leaves the device", from)))?;
        self.pos = pos;
        Ok(pos)
    }

    /// Release the handle; the device keeps its content
    pub fn close(self) {
        debug!(device = self.device.index(), "Closed device");
    }

    fn check_readable(&self) -> Result<()> {
        if self.mode.can_read() {
            Ok(())
        } else {
            Err(Error::BadMode("file not opened for reading".to_string()))
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.mode.can_write() {
            Ok(())
        } else {
            Err(Error::BadMode("file not opened for writing".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Sizing, SizingDefaults};
    use crate::storage::quantum::QuantumAllocator;

    fn device() -> Arc<ScullDevice> {
        Arc::new(ScullDevice::new(
            0,
            Arc::new(QuantumAllocator::unbounded()),
            SizingDefaults::new(Sizing { quantum: 4, qset: 2 }),
        ))
    }

    #[test]
    fn test_open_mode_parse() -> Result<()> {
        assert_eq!("r".parse::<OpenMode>()?, OpenMode::ReadOnly);
        assert_eq!("w".parse::<OpenMode>()?, OpenMode::WriteOnly);
        assert_eq!("rw".parse::<OpenMode>()?, OpenMode::ReadWrite);
        assert!("x".parse::<OpenMode>().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_position_advances() -> Result<()> {
        let dev = device();
        let mut file = ScullFile::open(dev.clone(), OpenMode::ReadWrite, Interrupt::new()).await?;

        assert_eq!(file.write(b"ABCDEF").await?, 4);
        assert_eq!(file.position(), 4);
        assert_eq!(file.write(b"EF").await?, 2);
        assert_eq!(file.position(), 6);

        file.seek(SeekFrom::Start(0)).await?;
        assert_eq!(&file.read(6).await?[..], b"ABCD");
        assert_eq!(&file.read(6).await?[..], b"EF");
        assert!(file.read(6).await?.is_empty());
        assert_eq!(file.position(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_write_only_open_truncates() -> Result<()> {
        let dev = device();
        let mut file = ScullFile::open(dev.clone(), OpenMode::ReadWrite, Interrupt::new()).await?;
        file.write_all(b"0123456789").await?;
        file.close();
        assert_eq!(dev.size(&Interrupt::new()).await?, 10);

        // Read-write open keeps content
        let file = ScullFile::open(dev.clone(), OpenMode::ReadWrite, Interrupt::new()).await?;
        file.close();
        assert_eq!(dev.size(&Interrupt::new()).await?, 10);

        let file = ScullFile::open(dev.clone(), OpenMode::WriteOnly, Interrupt::new()).await?;
        assert_eq!(dev.size(&Interrupt::new()).await?, 0);
        file.close();
        Ok(())
    }

    #[tokio::test]
    async fn test_mode_enforced() -> Result<()> {
        let dev = device();
        let mut reader = ScullFile::open(dev.clone(), OpenMode::ReadOnly, Interrupt::new()).await?;
        assert!(matches!(reader.write(b"x").await, Err(Error::BadMode(_))));

        let mut writer = ScullFile::open(dev, OpenMode::WriteOnly, Interrupt::new()).await?;
        assert!(matches!(writer.read(1).await, Err(Error::BadMode(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_seek_variants() -> Result<()> {
        let dev = device();
        let mut file = ScullFile::open(dev, OpenMode::ReadWrite, Interrupt::new()).await?;
        file.write_all(b"0123456789").await?;

        assert_eq!(file.seek(SeekFrom::End(-2)).await?, 8);
        assert_eq!(&file.read(2).await?[..], b"89");
        assert_eq!(file.seek(SeekFrom::Current(-7)).await?, 3);
        assert_eq!(&file.read(1).await?[..], b"3");

        let err = file.seek(SeekFrom::Current(-100)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(file.position(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_read_into_slice() -> Result<()> {
        let dev = device();
        let mut file = ScullFile::open(dev, OpenMode::ReadWrite, Interrupt::new()).await?;
        file.write_all(b"abcdef").await?;
        file.seek(SeekFrom::Start(2)).await?;

        let mut buf = [0u8; 8];
        let n = file.read_into(&mut buf).await?;
        assert_eq!(&buf[..n], b"cd");
        Ok(())
    }
}
