//! ext4 Superblock related structures.
//!
//! The superblock stores various information about the filesystem (supported features, block
//! count, inode count, ...). It is located 1024 bytes from the beginning of the partition, and is
//! 1024 bytes long.
//!
//! Only the fields consumed by this crate are decoded individually; the remainder of the
//! structure is carried as opaque padding so that the layout stays bit-exact.

use bytemuck::{Pod, Zeroable};

use crate::fs::ext4::inode::InodeCount;

/// Derives the [`core::fmt::Display`] Trait for tuple structs containing a single field.
#[macro_export]
macro_rules! ext4_uint_field_derive_display {
    ($struct_name: tt) => {
        impl core::fmt::Display for $struct_name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_fmt(format_args!("{}", self.0))
            }
        }
    };
}

/// Byte offset of the superblock on the device.
pub(crate) const SUPERBLOCK_OFFSET: u64 = 1024;

/// On-disk size of the superblock, in bytes.
pub(crate) const SUPERBLOCK_SIZE: usize = 1024;

/// Magic number `Ext4Superblock` field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub(crate) struct Ext4SuperblockMagic(u16);

impl Ext4SuperblockMagic {
    pub(crate) const MAGIC: u16 = 0xEF53;

    pub(crate) fn is_valid(self) -> bool {
        u16::from_le(self.0) == Self::MAGIC
    }
}

/// Incompatible feature set flags.
///
/// The system should refuse to mount a filesystem using incompatible features it does not
/// implement.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub(crate) struct IncompatibleFeatureSet(u32);

impl IncompatibleFeatureSet {
    /// Empty feature set
    pub(crate) const EMPTY_SET: Self = Self(0);

    /// Directory entries record the file type.
    pub(crate) const EXT4_FEATURE_INCOMPAT_FILETYPE: Self = Self(0x0002);

    /// Files use extent trees instead of indirect block maps.
    pub(crate) const EXT4_FEATURE_INCOMPAT_EXTENTS: Self = Self(0x0040);

    /// The filesystem uses 64-bit block counts.
    pub(crate) const EXT4_FEATURE_INCOMPAT_64BIT: Self = Self(0x0080);

    /// Decodes the on-disk (little-endian) representation of the feature set.
    pub(crate) fn from_le(raw: u32) -> Self {
        Self(u32::from_le(raw))
    }

    /// Checks if this `IncompatibleFeatureSet` includes the feature flags passed as argument.
    pub(crate) fn includes(self, features: Self) -> bool {
        self.0 & features.0 == features.0
    }
}

/// Header contained in the first 1024 bytes past the boot sector of any `ext4` partition.
///
/// Fields are stored little-endian on disk and are converted on access; the struct itself is a
/// raw view of the on-disk bytes.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct Ext4Superblock {
    /// Inodes count
    pub(crate) inodes_count: InodeCount,

    /// Blocks count
    blocks_count: u32,

    /// Reserved blocks count
    r_blocks_count: u32,

    /// Free blocks count
    free_blocks_count: u32,

    /// Free inodes count
    pub(crate) free_inodes_count: InodeCount,

    /// First Data Block.
    ///
    /// Block number of the block containing the superblock.
    first_data_block: u32,

    /// Block size.
    ///
    /// Defined as `log_2(block_size) - 10`
    log_block_size: u32,

    /// Allocation cluster size.
    ///
    /// Defined as `log_2(cluster_size) - 10`
    log_cluster_size: u32,

    /// Number of blocks in each group
    blocks_per_group: u32,

    /// Number of clusters in each group
    clusters_per_group: u32,

    /// Number of inodes in each group
    pub(crate) inodes_per_group: InodeCount,

    /// Last mount time
    mtime: u32,

    /// Last write time
    wtime: u32,

    /// Mount count (since last consistency check)
    mnt_count: u16,

    /// Number of mounts allowed before a consistency check is required
    max_mnt_count: u16,

    /// `ext4` magic signature: `0xef53`
    pub(crate) magic: Ext4SuperblockMagic,

    /// File system state
    state: u16,

    /// Behavior on error detection
    errors: u16,

    /// Minor revision level
    minor_rev_level: u16,

    /// Time of last consistency check
    lastcheck: u32,

    /// Max time between successive consistency checks
    checkinterval: u32,

    /// Operating System ID from which the filesystem was created
    creator_os: u32,

    /// Major revision level
    rev_level: u32,

    /// Default user ID for reserved blocks
    def_resuid: u16,

    /// Default group ID for reserved blocks
    def_resgid: u16,

    /// First non-reserved inode in file system
    first_ino: u32,

    /// Size of each inode structure in bytes
    inode_size: u16,

    /// Block group number of this superblock
    block_group_nr: u16,

    /// Compatible feature set
    feature_compat: u32,

    /// Incompatible feature set
    feature_incompat: u32,

    /// Read-only compatible feature set
    feature_ro_compat: u32,

    /// 128-bit UUID for volume
    pub(crate) uuid: [u8; 16],

    /// Volume name
    volume_name: [u8; 16],

    /// Path volume was last mounted to
    last_mounted: [u8; 64],

    /// Compression algorithm used
    algo_bitmap: u32,

    /// Remainder of the on-disk superblock, carried opaquely.
    reserved: [u8; 820],
}

impl Ext4Superblock {
    /// Returns the size of a block, in bytes.
    pub(crate) fn blk_size(&self) -> u64 {
        1024 << u32::from_le(self.log_block_size)
    }

    /// Returns the total number of blocks on the filesystem.
    ///
    /// The high 32 bits used by the `64bit` feature are not decoded; filesystems requiring them
    /// are out of range for this crate.
    pub(crate) fn blk_count(&self) -> u64 {
        u64::from(u32::from_le(self.blocks_count))
    }

    /// Returns the block number of the first data block (the block containing the superblock).
    pub(crate) fn first_data_block(&self) -> u64 {
        u64::from(u32::from_le(self.first_data_block))
    }

    /// Returns the number of blocks in each block group.
    pub(crate) fn blocks_per_group(&self) -> u64 {
        u64::from(u32::from_le(self.blocks_per_group))
    }

    /// Returns the number of block groups on the filesystem.
    pub(crate) fn bg_count(&self) -> u32 {
        let data_blocks = self.blk_count() - self.first_data_block();
        let per_group = self.blocks_per_group();

        ((data_blocks + per_group - 1) / per_group) as u32
    }

    /// Returns the size of each on-disk inode structure, in bytes.
    ///
    /// Revision 0 filesystems always use 128-byte inodes; the `inode_size` field is only
    /// meaningful from revision 1 onward.
    pub(crate) fn inode_size(&self) -> usize {
        if u32::from_le(self.rev_level) == 0 {
            128
        } else {
            usize::from(u16::from_le(self.inode_size))
        }
    }

    /// Checks if the filesystem uses the incompatible features passed as argument.
    pub(crate) fn incompat_contains(&self, features: IncompatibleFeatureSet) -> bool {
        IncompatibleFeatureSet::from_le(self.feature_incompat).includes(features)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use core::mem;

    use bytemuck::pod_read_unaligned;

    use super::*;

    fn raw_superblock() -> [u8; SUPERBLOCK_SIZE] {
        let mut raw = [0u8; SUPERBLOCK_SIZE];

        raw[0x00..0x04].copy_from_slice(&64u32.to_le_bytes()); // inodes_count
        raw[0x04..0x08].copy_from_slice(&512u32.to_le_bytes()); // blocks_count
        raw[0x14..0x18].copy_from_slice(&1u32.to_le_bytes()); // first_data_block
        raw[0x18..0x1C].copy_from_slice(&0u32.to_le_bytes()); // log_block_size
        raw[0x20..0x24].copy_from_slice(&512u32.to_le_bytes()); // blocks_per_group
        raw[0x28..0x2C].copy_from_slice(&64u32.to_le_bytes()); // inodes_per_group
        raw[0x38..0x3A].copy_from_slice(&0xEF53u16.to_le_bytes()); // magic
        raw[0x4C..0x50].copy_from_slice(&1u32.to_le_bytes()); // rev_level
        raw[0x58..0x5A].copy_from_slice(&256u16.to_le_bytes()); // inode_size
        raw[0x60..0x64].copy_from_slice(&0x0040u32.to_le_bytes()); // feature_incompat

        raw
    }

    #[test]
    fn superblock_layout_is_bit_exact() {
        assert_eq!(mem::size_of::<Ext4Superblock>(), SUPERBLOCK_SIZE);

        let sb: Ext4Superblock = pod_read_unaligned(&raw_superblock());

        assert!(sb.magic.is_valid());
        assert_eq!(sb.blk_size(), 1024);
        assert_eq!(sb.blk_count(), 512);
        assert_eq!(sb.first_data_block(), 1);
        assert_eq!(sb.inode_size(), 256);
        assert_eq!(sb.bg_count(), 1);
        assert!(sb.incompat_contains(
            IncompatibleFeatureSet::EXT4_FEATURE_INCOMPAT_EXTENTS
        ));
        assert!(!sb.incompat_contains(
            IncompatibleFeatureSet::EXT4_FEATURE_INCOMPAT_64BIT
        ));
    }

    #[test]
    fn revision_zero_forces_small_inodes() {
        let mut raw = raw_superblock();
        raw[0x4C..0x50].copy_from_slice(&0u32.to_le_bytes());

        let sb: Ext4Superblock = pod_read_unaligned(&raw);
        assert_eq!(sb.inode_size(), 128);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut raw = raw_superblock();
        raw[0x38..0x3A].copy_from_slice(&0xBEEFu16.to_le_bytes());

        let sb: Ext4Superblock = pod_read_unaligned(&raw);
        assert!(!sb.magic.is_valid());
    }
}
