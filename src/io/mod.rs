//! Block I/O channels.
//!
//! A [`BlockIo`] channel addresses its backing storage in filesystem-block units. The block size
//! is pushed down by the filesystem layer once the superblock has been decoded (the superblock
//! itself is read with a provisional 1024-byte block size).
//!
//! [`MemIo`] is a RAM-backed channel, mainly useful to operate on filesystem images loaded in
//! memory.

use alloc::vec::Vec;

use crate::errors::{CanFail, IOError};

/// A channel to a block device, addressed in filesystem-block units.
pub trait BlockIo: Send {
    /// Changes the block size used to address the device.
    ///
    /// # Errors
    ///
    /// Fails if the device cannot be addressed with the requested block size.
    fn set_blk_size(&mut self, blk_size: u32) -> CanFail<IOError>;

    /// Returns the block size currently used to address the device.
    fn blk_size(&self) -> u32;

    /// Reads `count` consecutive blocks starting at `blk` into `buf`.
    ///
    /// # Errors
    ///
    /// Fails if the range lies beyond the end of the device, or if `buf` is too small to hold
    /// `count` blocks.
    fn read_blk(&mut self, blk: u64, count: usize, buf: &mut [u8]) -> CanFail<IOError>;

    /// Writes `count` consecutive blocks starting at `blk` from `buf`.
    ///
    /// # Errors
    ///
    /// Fails if the range lies beyond the end of the device, or if `buf` does not contain `count`
    /// blocks worth of bytes.
    fn write_blk(&mut self, blk: u64, count: usize, buf: &[u8]) -> CanFail<IOError>;
}

/// A RAM-backed [`BlockIo`] channel.
pub struct MemIo {
    blk_size: u32,
    bytes: Vec<u8>,
}

impl MemIo {
    /// Default addressing granularity before the filesystem layer pushes down the real block
    /// size.
    pub const DEFAULT_BLK_SIZE: u32 = 1024;

    /// Creates a zero-filled in-memory device of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            blk_size: Self::DEFAULT_BLK_SIZE,
            bytes: alloc::vec![0u8; size],
        }
    }

    /// Wraps an existing image loaded in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            blk_size: Self::DEFAULT_BLK_SIZE,
            bytes,
        }
    }

    /// Returns the raw content of the device.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the channel and returns the raw content of the device.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn byte_range(&self, blk: u64, count: usize) -> Result<(usize, usize), IOError> {
        let bs = self.blk_size as usize;
        let start = usize::try_from(blk).map_err(|_| IOError::OutOfBounds)? * bs;
        let len = count * bs;

        if start + len > self.bytes.len() {
            return Err(IOError::OutOfBounds);
        }

        Ok((start, len))
    }
}

impl BlockIo for MemIo {
    fn set_blk_size(&mut self, blk_size: u32) -> CanFail<IOError> {
        if blk_size == 0 || self.bytes.len() % blk_size as usize != 0 {
            return Err(IOError::InvalidCommand);
        }

        self.blk_size = blk_size;

        Ok(())
    }

    fn blk_size(&self) -> u32 {
        self.blk_size
    }

    fn read_blk(&mut self, blk: u64, count: usize, buf: &mut [u8]) -> CanFail<IOError> {
        let (start, len) = self.byte_range(blk, count)?;

        if buf.len() < len {
            return Err(IOError::InvalidCommand);
        }

        buf[..len].copy_from_slice(&self.bytes[start..start + len]);

        Ok(())
    }

    fn write_blk(&mut self, blk: u64, count: usize, buf: &[u8]) -> CanFail<IOError> {
        let (start, len) = self.byte_range(blk, count)?;

        if buf.len() < len {
            return Err(IOError::InvalidCommand);
        }

        self.bytes[start..start + len].copy_from_slice(&buf[..len]);

        Ok(())
    }
}
