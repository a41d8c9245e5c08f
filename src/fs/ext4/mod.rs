//! ext4 filesystem handle.
//!
//! [`Ext4Fs`] attaches to a [`BlockIo`] channel, decodes the superblock and the group descriptor
//! table, and exposes the small metadata surface the extent engine consumes: block-granular
//! reads and writes, whole-inode reads and writes, and the attach-time flags (writable, image
//! file).
//!
//! The handle takes `&self` for all I/O; the channel sits behind a lock so that a read-mostly
//! workload and the occasional metadata write-back can share one handle.

use alloc::boxed::Box;
use alloc::vec::Vec;

use bytemuck::pod_read_unaligned;
use log::info;
use spin::Mutex;

use crate::errors::{CanFail, IOError, MountError};
use crate::fs::ext4::block_grp::{BlockGroupNumber, GroupDescriptor};
use crate::fs::ext4::extent::Ext4RealBlkId;
use crate::fs::ext4::inode::InodeNumber;
use crate::fs::ext4::sb::{Ext4Superblock, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};
use crate::io::BlockIo;

pub(crate) mod block_grp;
pub mod extent;
pub mod extent_tree;
pub mod inode;
pub(crate) mod sb;

/// Open-mode flags of an [`Ext4Fs`] handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FsFlags(u32);

impl FsFlags {
    pub const EMPTY: Self = Self(0);

    /// The filesystem accepts metadata writes.
    pub const RW: Self = Self(0x1);

    /// The handle is attached to an image file rather than to the original device.
    pub const IMAGE_FILE: Self = Self(0x2);

    /// Checks if these `FsFlags` include the flags passed as argument.
    pub fn contains(self, flags: Self) -> bool {
        self.0 & flags.0 == flags.0
    }
}

impl core::ops::BitOr for FsFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// A filesystem handle bound to one block device channel.
pub struct Ext4Fs {
    superblock: Ext4Superblock,
    flags: FsFlags,
    group_descriptors: Vec<GroupDescriptor>,
    io: Mutex<Box<dyn BlockIo>>,
    /// Set when the handle describes a metadata-only image whose data channel is detached from
    /// the image I/O. Extent descents then iterate over blank nodes instead of reading.
    image_io_detached: bool,
}

impl Ext4Fs {
    /// Attaches a filesystem handle to a block device channel.
    ///
    /// The superblock is read with a provisional 1024-byte block size, validated, and the
    /// channel is then re-addressed with the filesystem's real block size.
    ///
    /// # Errors
    ///
    /// Fails with [`MountError::BadSuperblock`] if the superblock magic does not match, and with
    /// [`MountError::IOError`] on any channel failure.
    pub fn attach(mut io: Box<dyn BlockIo>, flags: FsFlags) -> Result<Self, MountError> {
        io.set_blk_size(SUPERBLOCK_SIZE as u32)
            .map_err(|_| MountError::IOError)?;

        let mut raw_sb = alloc::vec![0u8; SUPERBLOCK_SIZE];
        io.read_blk(SUPERBLOCK_OFFSET / SUPERBLOCK_SIZE as u64, 1, &mut raw_sb)
            .map_err(|_| MountError::IOError)?;

        let sb: Ext4Superblock = pod_read_unaligned(&raw_sb);
        if !sb.magic.is_valid() {
            return Err(MountError::BadSuperblock);
        }

        io.set_blk_size(sb.blk_size() as u32)
            .map_err(|_| MountError::IOError)?;

        info!(
            target: "ext4",
            "attached ext4 filesystem    blk_size = {}    inodes_count = {}    blk_count = {}",
            sb.blk_size(),
            sb.inodes_count,
            sb.blk_count()
        );

        let mut fs = Self {
            superblock: sb,
            flags,
            group_descriptors: alloc::vec![],
            io: Mutex::new(io),
            image_io_detached: false,
        };

        fs.init_group_descriptors()
            .map_err(|_| MountError::IOError)?;

        Ok(fs)
    }

    /// Loads (or reloads) the group descriptor table.
    pub(crate) fn init_group_descriptors(&mut self) -> CanFail<IOError> {
        let mut descriptors = Vec::with_capacity(self.superblock.bg_count() as usize);

        for grp in 0..self.superblock.bg_count() {
            descriptors.push(GroupDescriptor::load_descriptor(
                BlockGroupNumber(grp),
                &self.superblock,
                self,
            )?);
        }

        self.group_descriptors = descriptors;

        Ok(())
    }

    /// Returns the size of a filesystem block, in bytes.
    pub fn blk_size(&self) -> u64 {
        self.superblock.blk_size()
    }

    /// Returns the on-disk size of an inode structure, in bytes.
    pub fn inode_size(&self) -> usize {
        self.superblock.inode_size()
    }

    /// Returns the number of inodes on the filesystem.
    pub fn inodes_count(&self) -> u32 {
        self.superblock.inodes_count.get()
    }

    /// Checks if the handle accepts metadata writes.
    pub fn is_writable(&self) -> bool {
        self.flags.contains(FsFlags::RW)
    }

    /// Checks if the superblock carried a valid magic number.
    pub fn magic_valid(&self) -> bool {
        self.superblock.magic.is_valid()
    }

    /// Checks if extent descents must yield blank nodes instead of reading through the data
    /// channel.
    pub fn image_io_detached(&self) -> bool {
        self.flags.contains(FsFlags::IMAGE_FILE) && self.image_io_detached
    }

    /// Marks the data channel as detached from the image I/O.
    ///
    /// Only meaningful on handles attached with [`FsFlags::IMAGE_FILE`].
    pub fn mark_image_io_detached(&mut self) {
        self.image_io_detached = true;
    }

    /// Reads full filesystem blocks starting at `blk`; the read length is `buffer.len()` rounded
    /// down to a whole number of blocks.
    pub fn read_blk(&self, blk: Ext4RealBlkId, buffer: &mut [u8]) -> CanFail<IOError> {
        if u64::from(blk) >= self.superblock.blk_count() {
            return Err(IOError::InvalidCommand);
        }

        let count = buffer.len() / self.blk_size() as usize;
        self.io.lock().read_blk(u64::from(blk), count, buffer)
    }

    /// Writes full filesystem blocks starting at `blk` from `buffer`.
    pub fn write_blk(&self, blk: Ext4RealBlkId, buffer: &[u8]) -> CanFail<IOError> {
        if u64::from(blk) >= self.superblock.blk_count() {
            return Err(IOError::InvalidCommand);
        }

        let count = buffer.len() / self.blk_size() as usize;
        self.io.lock().write_blk(u64::from(blk), count, buffer)
    }

    /// Reads the full on-disk inode structure of `ino` into `buffer`.
    ///
    /// `buffer` should hold [`Ext4Fs::inode_size`] bytes; shorter buffers receive a truncated
    /// copy.
    pub fn read_inode_full(&self, ino: InodeNumber, buffer: &mut [u8]) -> CanFail<IOError> {
        let (blk, offset) = self.locate_inode(ino)?;

        let mut raw_blk = alloc::vec![0u8; self.blk_size() as usize];
        self.read_blk(blk, &mut raw_blk)?;

        let count = self.inode_size().min(buffer.len());
        buffer[..count].copy_from_slice(&raw_blk[offset..offset + count]);

        Ok(())
    }

    /// Writes the full on-disk inode structure of `ino` from `buffer`.
    pub fn write_inode_full(&self, ino: InodeNumber, buffer: &[u8]) -> CanFail<IOError> {
        let isize = self.inode_size();
        if buffer.len() < isize {
            return Err(IOError::InvalidCommand);
        }

        let (blk, offset) = self.locate_inode(ino)?;

        let mut raw_blk = alloc::vec![0u8; self.blk_size() as usize];
        self.read_blk(blk, &mut raw_blk)?;
        raw_blk[offset..offset + isize].copy_from_slice(&buffer[..isize]);

        self.write_blk(blk, &raw_blk)
    }

    /// Resolves the block holding inode `ino` and its byte offset within that block.
    fn locate_inode(&self, ino: InodeNumber) -> Result<(Ext4RealBlkId, usize), IOError> {
        let index = u32::from(ino)
            .checked_sub(1)
            .ok_or(IOError::InvalidCommand)?;
        if u32::from(ino) > self.inodes_count() {
            return Err(IOError::InvalidCommand);
        }

        let per_group = self.superblock.inodes_per_group.get();
        let group = index / per_group;
        let idx_in_group = index % per_group;
        let byte_idx = u64::from(idx_in_group) * self.inode_size() as u64;

        let descriptor = self
            .group_descriptors
            .get(group as usize)
            .ok_or(IOError::Unknown)?;

        let blk = descriptor.inode_table_blk_addr() + byte_idx / self.blk_size();
        let offset = (byte_idx % self.blk_size()) as usize;

        Ok((Ext4RealBlkId::from(blk), offset))
    }
}
