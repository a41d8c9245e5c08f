use core::fmt::Debug;

use alloc::boxed::Box;

/// `BaseError` is a common trait implemented by every error type defined in this crate.
///
/// It is dependent on the [`Debug`] trait, which makes sense as we are dealing with errors.
/// Trait objects built on `BaseError` are used when an error has to cross a layer that does not
/// know the concrete type (device errors surfacing through filesystem code, for instance).
pub trait BaseError: Debug {}

/// `CanFail` is a return type for functions that are allowed to fail, and don't need to return
/// anything.
///
/// For instance, it could be used when writing back a metadata block, or when initializing a
/// component.
///
/// # Examples:
///
/// ```
/// use extfs::errors::{CanFail, IOError};
///
/// fn flush_metadata() -> CanFail<IOError> {
///     Ok(())
/// }
/// ```
pub type CanFail<T> = Result<(), T>;

/// `IOError` defines several error types useful when communicating with input/output devices or
/// components.
#[derive(Debug)]
pub enum IOError {
    /// Operation resulted in a timeout.
    IOTimeout,

    /// Invalid I/O command
    InvalidCommand,

    /// Access beyond the end of the device or region.
    OutOfBounds,

    /// Generic error.
    Exception(Box<dyn BaseError>),

    Unknown,
}

impl BaseError for IOError {}

/// `MountError` defines the error types that may be raised when attaching a filesystem handle to
/// a block device.
#[derive(Debug)]
pub enum MountError {
    /// The superblock is invalid or its magic number does not match.
    BadSuperblock,

    /// An I/O error occurred while reading filesystem metadata.
    IOError,
}

impl BaseError for MountError {}

/// `ExtentError` defines the error types raised by the extent-tree engine.
///
/// None of these are fatal to the extent handle: callers may retry the operation, or move the
/// cursor elsewhere and continue.
#[derive(Debug)]
pub enum ExtentError {
    /// The filesystem handle failed its superblock magic check.
    BadMagic,

    /// Inode number zero, or above the superblock's inode count.
    BadInodeNum,

    /// The extents feature flag is not set on the inode.
    InodeNotExtent,

    /// Header magic, entry/max relation, or max-versus-capacity check failed.
    HeaderBad,

    /// The operation requires a positioned cursor, and there is none.
    NoCurrentNode,

    /// No next record or sibling in the direction of travel.
    NoNext,

    /// No previous record or sibling in the direction of travel.
    NoPrev,

    /// The cursor is already at the root.
    NoUp,

    /// The cursor is at maximum depth, or has no current record to descend through.
    NoDown,

    /// Seek-to-logical-block fell inside a hole.
    NotFound,

    /// The node at the cursor has no room left for an extra record.
    CantInsert,

    /// The extent length cannot be encoded in the on-disk 16-bit field.
    InvalidLength,

    /// Mutation attempted on a read-only filesystem.
    ReadOnlyFilesystem,

    /// Unknown cursor operation code.
    OpNotSupported,

    /// An error propagated from the block I/O channel or the inode read/write path.
    Io(IOError),
}

impl BaseError for ExtentError {}

impl From<IOError> for ExtentError {
    fn from(err: IOError) -> Self {
        Self::Io(err)
    }
}
