//! File-system related code.
//!
//! Contains the `ext4` metadata layer: the filesystem handle, the on-disk superblock, group
//! descriptor and inode codecs, and the extent-tree engine that maps a file's logical blocks to
//! physical blocks on the device.
//!
//! Everything here operates through a [`crate::io::BlockIo`] channel; no assumption is made about
//! the nature of the underlying device.

use crate::errors::IOError;

pub mod ext4;

pub type IOResult<T> = Result<T, IOError>;
