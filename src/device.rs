//! Raw block device access (spec §4.1 `RawDevice`).
//!
//! Wraps a host file handle and exposes fixed-size block/cluster reads
//! and writes. This is the only module that talks to the host
//! filesystem directly; everything above it only ever deals in
//! `BLOCK_SIZE`/`CLUSTER_SIZE` buffers.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::layout::{BLOCK_SIZE, BLOCKS_PER_CLUSTER, CLUSTER_SIZE};

pub struct RawDevice {
    file: Option<File>,
    n_blocks: u64,
    read_only: bool,
}

impl RawDevice {
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;
        let len = file.metadata()?.len();
        if len % BLOCK_SIZE as u64 != 0 {
            return Err(Error::BadSize);
        }
        Ok(Self {
            file: Some(file),
            n_blocks: len / BLOCK_SIZE as u64,
            read_only,
        })
    }

    pub fn create<P: AsRef<Path>>(path: P, n_blocks: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(n_blocks * BLOCK_SIZE as u64)?;
        Ok(Self {
            file: Some(file),
            n_blocks,
            read_only: false,
        })
    }

    pub fn n_blocks(&self) -> u64 {
        self.n_blocks
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(Error::DeviceNotOpen)
    }

    fn check_block(&self, block: u64) -> Result<()> {
        if block >= self.n_blocks {
            return Err(Error::InvalidRange {
                block,
                size: self.n_blocks,
            });
        }
        Ok(())
    }

    pub fn read_block(&mut self, block: u64, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        self.check_block(block)?;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(block * BLOCK_SIZE as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_block(&mut self, block: u64, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        if self.read_only {
            return Err(Error::DeviceBusy);
        }
        self.check_block(block)?;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(block * BLOCK_SIZE as u64))?;
        file.write_all(buf)?;
        Ok(())
    }

    /// Read the `BLOCKS_PER_CLUSTER` blocks that make up cluster `cluster`
    /// (counted in blocks from the start of the device) into `buf`.
    pub fn read_cluster(&mut self, cluster_block: u64, buf: &mut [u8; CLUSTER_SIZE]) -> Result<()> {
        self.check_block(cluster_block + BLOCKS_PER_CLUSTER as u64 - 1)?;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(cluster_block * BLOCK_SIZE as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_cluster(&mut self, cluster_block: u64, buf: &[u8; CLUSTER_SIZE]) -> Result<()> {
        if self.read_only {
            return Err(Error::DeviceBusy);
        }
        self.check_block(cluster_block + BLOCKS_PER_CLUSTER as u64 - 1)?;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(cluster_block * BLOCK_SIZE as u64))?;
        file.write_all(buf)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        if let Some(f) = &self.file {
            f.sync_all()?;
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.file = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn create_open_roundtrip() {
        let tmp = NamedTempFile::new().unwrap();
        let mut dev = RawDevice::create(tmp.path(), 16).unwrap();
        let mut buf = [0xABu8; BLOCK_SIZE];
        dev.write_block(3, &buf).unwrap();
        dev.sync().unwrap();
        drop(dev);

        let mut dev2 = RawDevice::open(tmp.path(), false).unwrap();
        let mut back = [0u8; BLOCK_SIZE];
        dev2.read_block(3, &mut back).unwrap();
        assert_eq!(buf, back);
        buf.fill(0);
    }

    #[test]
    fn out_of_range_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        let mut dev = RawDevice::create(tmp.path(), 4).unwrap();
        let buf = [0u8; BLOCK_SIZE];
        assert!(matches!(
            dev.write_block(10, &buf),
            Err(Error::InvalidRange { .. })
        ));
    }
}
