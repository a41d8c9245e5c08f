//! ext4 block group related structures.
//!
//! Block groups are a logical grouping of contiguous blocks on disk. The only part of the group
//! metadata this crate consumes is the location of each group's inode table, which the inode
//! read/write path resolves through [`GroupDescriptor`].

use bytemuck::{pod_read_unaligned, Pod, Zeroable};

use crate::errors::IOError;
use crate::fs::ext4::extent::Ext4RealBlkId;
use crate::fs::ext4::sb::Ext4Superblock;
use crate::fs::ext4::Ext4Fs;

/// A number representing a block group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub(crate) struct BlockGroupNumber(pub(crate) u32);

impl BlockGroupNumber {
    /// First block group for a filesystem.
    pub(crate) const INITIAL_BLK_GRP: Self = Self(0);
}

/// On-disk size of a (32-bit layout) group descriptor.
pub(crate) const GROUP_DESC_SIZE: usize = 32;

/// On-disk descriptor of a single block group.
///
/// Fields are stored little-endian; the bitmap and checksum fields are carried for layout
/// fidelity but are not interpreted here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct GroupDescriptor {
    /// Block containing the block bitmap for this group
    bg_block_bitmap: u32,

    /// Block containing the inode bitmap for this group
    bg_inode_bitmap: u32,

    /// Block containing the first block of the inode table for this group
    bg_inode_table: u32,

    /// Number of free blocks in this group
    bg_free_blocks_count: u16,

    /// Number of free inodes in this group
    bg_free_inodes_count: u16,

    /// Number of directories in this group
    bg_used_dirs_count: u16,

    /// Block group flags
    bg_flags: u16,

    /// Block containing the snapshot exclusion bitmap
    bg_exclude_bitmap: u32,

    /// Lower 16 bits of the block bitmap checksum
    bg_block_bitmap_csum_lo: u16,

    /// Lower 16 bits of the inode bitmap checksum
    bg_inode_bitmap_csum_lo: u16,

    /// Number of unused inodes at the end of the inode table
    bg_itable_unused: u16,

    /// Group descriptor checksum
    bg_checksum: u16,
}

impl GroupDescriptor {
    /// Loads the descriptor of block group `grp` from the descriptor table.
    ///
    /// The table starts in the block that follows the superblock.
    pub(crate) fn load_descriptor(
        grp: BlockGroupNumber,
        sb: &Ext4Superblock,
        fs: &Ext4Fs,
    ) -> Result<Self, IOError> {
        let blk_size = sb.blk_size();
        let table_blk = sb.first_data_block() + 1;

        let desc_byte_idx = u64::from(grp.0) * GROUP_DESC_SIZE as u64;
        let desc_blk = table_blk + desc_byte_idx / blk_size;
        let desc_idx_in_blk = (desc_byte_idx % blk_size) as usize;

        let mut raw_blk = alloc::vec![0u8; blk_size as usize];
        fs.read_blk(Ext4RealBlkId::from(desc_blk), &mut raw_blk)?;

        Ok(pod_read_unaligned(
            &raw_blk[desc_idx_in_blk..desc_idx_in_blk + GROUP_DESC_SIZE],
        ))
    }

    /// Returns the block number of the first block of this group's inode table.
    pub(crate) fn inode_table_blk_addr(&self) -> u64 {
        u64::from(u32::from_le(self.bg_inode_table))
    }
}
