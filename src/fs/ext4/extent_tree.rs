//! ext4 extent-tree cursor engine.
//!
//! An [`ExtentHandle`] is a stateful cursor over the extent tree of a single inode. It keeps one
//! path frame per tree level: frame 0 aliases the `i_block` region inside the handle's
//! owned inode copy, frames below it hold one filesystem block each and are allocated lazily on
//! first descent, then reused when traversal re-enters their level.
//!
//! Traversal is driven through [`ExtentHandle::get`] with an [`ExtentOp`] code. Compound moves
//! (`NEXT`, `PREV`, the leaf enumerators) are decomposed into atomic frame transitions (sibling
//! step, descend, ascend) and retried until the cursor reaches its target level.
//!
//! Mutation (`replace`, `insert`, `delete`) edits the node at the cursor in place and writes the
//! frame back: root edits rewrite the whole inode, non-root edits rewrite the one filesystem
//! block the parent frame's current index entry points to.

use alloc::vec::Vec;

use bytemuck::pod_read_unaligned;
use log::debug;

use crate::errors::{CanFail, ExtentError};
use crate::fs::ext4::extent::{
    Extent, ExtentIdx, ExtentNode, ExtentNodeMut, EXTENT_RECORD_SIZE, EXT_INIT_MAX_LEN,
    EXT_UNINIT_MAX_LEN,
};
use crate::fs::ext4::inode::{Inode, InodeBlk, InodeNumber, INODE_BASE_SIZE};
use crate::fs::ext4::Ext4Fs;

/// Cursor operation codes accepted by [`ExtentHandle::get`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExtentOp(u16);

impl ExtentOp {
    /// Re-decode the current record without moving.
    pub const CURRENT: Self = Self(0);

    /// Reset the cursor to the root node and return its first record.
    pub const ROOT: Self = Self(1);

    /// Descend to the last record of the last leaf.
    pub const LAST_LEAF: Self = Self(2);

    /// Set the cursor on the first record of the current node.
    pub const FIRST_SIB: Self = Self(3);

    /// Set the cursor on the last record of the current node.
    pub const LAST_SIB: Self = Self(4);

    /// Advance the cursor one record within the current node.
    pub const NEXT_SIB: Self = Self(5);

    /// Retreat the cursor one record within the current node.
    pub const PREV_SIB: Self = Self(6);

    /// Move to the next record at maximum depth.
    pub const NEXT_LEAF: Self = Self(7);

    /// Move to the previous record at maximum depth.
    pub const PREV_LEAF: Self = Self(8);

    /// Move to the next record, entering and leaving subtrees as needed.
    pub const NEXT: Self = Self(9);

    /// Move to the previous record, entering and leaving subtrees as needed.
    pub const PREV: Self = Self(10);

    /// Ascend one level.
    pub const UP: Self = Self(11);

    /// Descend one level through the current index entry, onto its first record.
    pub const DOWN: Self = Self(12);

    /// Descend one level through the current index entry, onto its last record.
    pub const DOWN_AND_LAST: Self = Self(13);
}

/// Flags qualifying an extent returned by [`ExtentHandle::get`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExtentFlags(u16);

impl ExtentFlags {
    pub const EMPTY: Self = Self(0);

    /// The record sits at maximum depth and maps data blocks.
    pub const LEAF: Self = Self(0x0001);

    /// The extent is allocated but its content reads as zeroes.
    pub const UNINIT: Self = Self(0x0002);

    /// The cursor has already passed through this interior node.
    pub const SECOND_VISIT: Self = Self(0x0004);

    /// Checks if these `ExtentFlags` include the flags passed as argument.
    pub fn contains(self, flags: Self) -> bool {
        self.0 & flags.0 == flags.0
    }
}

impl core::ops::BitOr for ExtentFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for ExtentFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Flags accepted by [`ExtentHandle::insert`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExtentInsertFlags(u16);

impl ExtentInsertFlags {
    pub const NONE: Self = Self(0);

    /// Insert the new record after the cursor instead of before it.
    pub const INSERT_AFTER: Self = Self(0x0001);

    /// Checks if these `ExtentInsertFlags` include the flags passed as argument.
    pub fn contains(self, flags: Self) -> bool {
        self.0 & flags.0 == flags.0
    }
}

/// A decoded extent record, as seen by callers of the engine.
///
/// At a leaf, `(e_lblk, e_pblk, e_len)` is the mapping itself. At an interior node, `e_pblk` is
/// the block number of the child node and `e_len` the number of logical blocks spanned by the
/// subtree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ext4Extent {
    /// First logical block covered by the record.
    pub e_lblk: u64,

    /// Physical block the record points to.
    pub e_pblk: u64,

    /// Length of the record, in blocks.
    pub e_len: u64,

    /// Qualifiers for the record.
    pub e_flags: ExtentFlags,
}

impl Ext4Extent {
    /// Builds an initialized leaf mapping.
    pub fn new(e_lblk: u64, e_pblk: u64, e_len: u64) -> Self {
        Self {
            e_lblk,
            e_pblk,
            e_len,
            e_flags: ExtentFlags::LEAF,
        }
    }

    /// Checks if `blk` falls inside the half-open range covered by this record.
    pub fn covers(&self, blk: u64) -> bool {
        blk >= self.e_lblk && blk < self.e_lblk + self.e_len
    }
}

/// Geometry of the cursor and of the whole tree, as reported by [`ExtentHandle::get_info`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtentInfo {
    /// Index of the current entry within its node. The header region counts as entry 0, so the
    /// first record reports 1; 0 means no current record.
    pub curr_entry: u16,

    /// Level of the cursor (0 at the root).
    pub curr_level: u16,

    /// Live records in the current node.
    pub num_entries: u16,

    /// Capacity of the current node.
    pub max_entries: u16,

    /// Depth of the tree.
    pub max_depth: u16,

    /// Bytes remaining for new records in the current node.
    pub bytes_avail: u32,

    /// Largest encodable logical block number.
    pub max_lblk: u64,

    /// Largest encodable physical block number.
    pub max_pblk: u64,

    /// Largest encodable initialized extent length, in blocks.
    pub max_len: u32,

    /// Largest encodable uninitialized extent length, in blocks.
    pub max_uninit_len: u32,
}

/// Per-level cursor state.
struct ExtentPathFrame {
    /// Node bytes. `None` at the root, whose node lives in the `i_block` region of the handle's
    /// inode copy, and at levels not yet descended into.
    buf: Option<Vec<u8>>,

    /// Live records in the node, mirrored from its header.
    entries: u16,

    /// Capacity of the node, mirrored from its header.
    max_entries: u16,

    /// Records remaining strictly to the right of the cursor.
    left: u16,

    /// Index of the current record, if any.
    curr: Option<u16>,

    /// 0 before the first descent through this node's current index entry, 1 after.
    visit_num: u8,

    /// Exclusive upper bound on the logical blocks covered by this subtree.
    end_blk: u64,
}

impl ExtentPathFrame {
    fn unloaded() -> Self {
        Self {
            buf: None,
            entries: 0,
            max_entries: 0,
            left: 0,
            curr: None,
            visit_num: 0,
            end_blk: 0,
        }
    }
}

/// A cursor over the extent tree of one inode.
///
/// The handle owns a full copy of the inode; mutations at the root level rewrite that copy on
/// disk. Dropping the handle releases every frame buffer. A handle never outlives the filesystem
/// it was opened on.
pub struct ExtentHandle<'fs> {
    fs: &'fs Ext4Fs,
    ino: InodeNumber,
    inode: Vec<u8>,
    node_magic: u16,
    max_depth: usize,
    level: usize,
    path: Vec<ExtentPathFrame>,
}

impl<'fs> ExtentHandle<'fs> {
    /// Opens a cursor over the extent tree of inode `ino`.
    ///
    /// # Errors
    ///
    /// Fails with [`ExtentError::BadInodeNum`] if `ino` is out of range for the filesystem, with
    /// [`ExtentError::InodeNotExtent`] if the inode is not extent-mapped, and with
    /// [`ExtentError::HeaderBad`] if the root node header is inconsistent.
    pub fn open(fs: &'fs Ext4Fs, ino: InodeNumber) -> Result<Self, ExtentError> {
        if !fs.magic_valid() {
            return Err(ExtentError::BadMagic);
        }

        if u32::from(ino) == 0 || u32::from(ino) > fs.inodes_count() {
            return Err(ExtentError::BadInodeNum);
        }

        let mut inode_buf = alloc::vec![0u8; fs.inode_size()];
        fs.read_inode_full(ino, &mut inode_buf)?;

        let inode: Inode = pod_read_unaligned(&inode_buf[..INODE_BASE_SIZE]);
        if !inode.uses_extent_tree() {
            return Err(ExtentError::InodeNotExtent);
        }

        let header = ExtentNode(&inode_buf[Inode::i_block_region()]).header();
        header.verify(InodeBlk::SIZE)?;

        let max_depth = usize::from(header.depth());
        let end_blk = inode.size().div_ceil(fs.blk_size());

        let mut path = Vec::with_capacity(max_depth + 1);
        path.push(ExtentPathFrame {
            buf: None,
            entries: header.entries(),
            max_entries: header.max_entries(),
            left: header.entries(),
            curr: None,
            // the root has implicitly been visited by opening the handle
            visit_num: 1,
            end_blk,
        });
        for _ in 0..max_depth {
            path.push(ExtentPathFrame::unloaded());
        }

        Ok(Self {
            fs,
            ino,
            inode: inode_buf,
            node_magic: header.magic().get(),
            max_depth,
            level: 0,
            path,
        })
    }

    /// Returns the number of the inode this cursor operates on.
    pub fn ino(&self) -> InodeNumber {
        self.ino
    }

    /// Moves the cursor according to `op` and returns the record at its new position.
    pub fn get(&mut self, op: ExtentOp) -> Result<Ext4Extent, ExtentError> {
        let orig_op = op;

        loop {
            let eff_op = self.effective_op(orig_op)?;

            match eff_op {
                ExtentOp::CURRENT => {}
                ExtentOp::ROOT => {
                    self.level = 0;
                    self.reset_frame_start(0);
                    self.step_next_sib()?;
                }
                ExtentOp::FIRST_SIB => {
                    self.reset_frame_start(self.level);
                    self.step_next_sib()?;
                }
                ExtentOp::NEXT_SIB => self.step_next_sib()?,
                ExtentOp::PREV_SIB => self.step_prev_sib()?,
                ExtentOp::LAST_SIB => self.step_last_sib(),
                ExtentOp::UP => self.step_up(orig_op)?,
                ExtentOp::DOWN | ExtentOp::DOWN_AND_LAST => {
                    self.step_down(eff_op == ExtentOp::DOWN_AND_LAST)?;
                }
                _ => return Err(ExtentError::OpNotSupported),
            }

            let extent = self.decode_current()?;

            // leaf enumerators keep stepping until the cursor reaches maximum depth
            if (orig_op == ExtentOp::NEXT_LEAF || orig_op == ExtentOp::PREV_LEAF)
                && self.level != self.max_depth
            {
                continue;
            }

            if orig_op == ExtentOp::LAST_LEAF
                && (self.level != self.max_depth || self.path[self.level].left != 0)
            {
                continue;
            }

            return Ok(extent);
        }
    }

    /// Positions the cursor on the leaf extent containing logical block `blk`.
    ///
    /// # Errors
    ///
    /// Fails with [`ExtentError::NotFound`] if `blk` falls inside a hole; the cursor is then left
    /// on the extent preceding the hole, when one exists.
    pub fn goto_blk(&mut self, blk: u64) -> CanFail<ExtentError> {
        self.extent_goto(0, blk)
    }

    /// Overwrites the record at the cursor.
    ///
    /// At a leaf the whole `(e_lblk, e_pblk, e_len)` tuple is written; at an interior node only
    /// the logical and child block numbers are meaningful. No ordering or overlap checking is
    /// performed; keeping records sorted and disjoint is the caller's responsibility.
    pub fn replace(&mut self, extent: &Ext4Extent) -> CanFail<ExtentError> {
        if !self.fs.is_writable() {
            return Err(ExtentError::ReadOnlyFilesystem);
        }

        let level = self.level;
        let Some(entry) = self.path[level].curr else {
            return Err(ExtentError::NoCurrentNode);
        };

        if level == self.max_depth {
            let raw_len = if extent.e_flags.contains(ExtentFlags::UNINIT) {
                if extent.e_len > u64::from(EXT_UNINIT_MAX_LEN) {
                    return Err(ExtentError::InvalidLength);
                }
                (extent.e_len as u32 + EXT_INIT_MAX_LEN) as u16
            } else {
                if extent.e_len > u64::from(EXT_INIT_MAX_LEN) {
                    return Err(ExtentError::InvalidLength);
                }
                extent.e_len as u16
            };

            let leaf = Extent::new(extent.e_lblk as u32, extent.e_pblk, raw_len);
            ExtentNodeMut(self.node_bytes_mut(level)).write_extent(entry, &leaf);
        } else {
            let idx = ExtentIdx::new(extent.e_lblk as u32, extent.e_pblk);
            ExtentNodeMut(self.node_bytes_mut(level)).write_idx(entry, &idx);
        }

        self.update_path()
    }

    /// Inserts a record before the cursor, or after it with
    /// [`ExtentInsertFlags::INSERT_AFTER`], then leaves the cursor on the new record.
    ///
    /// # Errors
    ///
    /// Fails with [`ExtentError::CantInsert`] if the node is full; the engine never splits nodes.
    /// If the record cannot be encoded or written back, the insert is rolled back through
    /// [`ExtentHandle::delete`], whose own status is deliberately ignored, and the original error
    /// is returned.
    pub fn insert(&mut self, flags: ExtentInsertFlags, extent: &Ext4Extent) -> CanFail<ExtentError> {
        if !self.fs.is_writable() {
            return Err(ExtentError::ReadOnlyFilesystem);
        }

        let level = self.level;
        let (entries, max_entries, curr, left) = {
            let frame = &self.path[level];
            (frame.entries, frame.max_entries, frame.curr, frame.left)
        };

        if entries >= max_entries {
            return Err(ExtentError::CantInsert);
        }

        let (entry, shift, new_left) = match curr {
            Some(cursor) if flags.contains(ExtentInsertFlags::INSERT_AFTER) => {
                (cursor + 1, left, left)
            }
            Some(cursor) => (cursor, left + 1, left + 1),
            None => (0, 0, 0),
        };

        ExtentNodeMut(self.node_bytes_mut(level)).shift_tail_right(entry, shift);

        let frame = &mut self.path[level];
        frame.curr = Some(entry);
        frame.left = new_left;
        frame.entries += 1;
        let entries = frame.entries;
        ExtentNodeMut(self.node_bytes_mut(level)).set_header_entries(entries);

        if let Err(err) = self.replace(extent).and_then(|()| self.update_path()) {
            let _ = self.delete();
            return Err(err);
        }

        Ok(())
    }

    /// Removes the record at the cursor.
    ///
    /// The cursor moves to the record that takes the freed slot, or one record back when the last
    /// record of the node was deleted; it becomes unpositioned when the node empties.
    pub fn delete(&mut self) -> CanFail<ExtentError> {
        if !self.fs.is_writable() {
            return Err(ExtentError::ReadOnlyFilesystem);
        }

        let level = self.level;
        let (curr, left) = {
            let frame = &self.path[level];
            (frame.curr, frame.left)
        };
        let Some(entry) = curr else {
            return Err(ExtentError::NoCurrentNode);
        };

        if left > 0 {
            ExtentNodeMut(self.node_bytes_mut(level)).shift_tail_left(entry, left);
            self.path[level].left -= 1;
        } else {
            self.path[level].curr = entry.checked_sub(1);
        }

        let frame = &mut self.path[level];
        frame.entries -= 1;
        if frame.entries == 0 {
            frame.curr = None;
        }
        let entries = frame.entries;
        ExtentNodeMut(self.node_bytes_mut(level)).set_header_entries(entries);

        self.update_path()
    }

    /// Propagates a changed first logical block up the path.
    ///
    /// After a mutation changes the first record of a node, every parent index entry pointing at
    /// that node still carries the old starting block. This walks up the path rewriting those
    /// entries, then seeks back to the record the cursor was on.
    pub fn fix_parents(&mut self) -> CanFail<ExtentError> {
        if !self.fs.is_writable() {
            return Err(ExtentError::ReadOnlyFilesystem);
        }

        if self.path[self.level].curr.is_none() {
            return Err(ExtentError::NoCurrentNode);
        }

        let start = self.get(ExtentOp::CURRENT)?.e_lblk;
        let orig_height = self.max_depth - self.level;

        while self.level > 0 {
            let frame = &self.path[self.level];
            if frame.left != frame.entries - 1 {
                // not the first record of its node: parents are unaffected
                break;
            }

            let mut extent = self.get(ExtentOp::UP)?;
            if extent.e_lblk == start {
                break;
            }

            extent.e_lblk = start;
            self.replace(&extent)?;
        }

        self.extent_goto(orig_height, start)
    }

    /// Reports the cursor's position within its node and the tree-wide geometry limits.
    pub fn get_info(&self) -> ExtentInfo {
        let frame = &self.path[self.level];

        ExtentInfo {
            curr_entry: frame.curr.map_or(0, |entry| entry + 1),
            curr_level: self.level as u16,
            num_entries: frame.entries,
            max_entries: frame.max_entries,
            max_depth: self.max_depth as u16,
            bytes_avail: u32::from(frame.max_entries - frame.entries) * EXTENT_RECORD_SIZE as u32,
            max_lblk: (1 << 32) - 1,
            max_pblk: (1 << 48) - 1,
            max_len: EXT_INIT_MAX_LEN,
            max_uninit_len: EXT_UNINIT_MAX_LEN,
        }
    }

    /// Seeks the record containing `blk` at height `leaf_level` above the leaves.
    fn extent_goto(&mut self, leaf_level: usize, blk: u64) -> CanFail<ExtentError> {
        let mut extent = match self.get(ExtentOp::ROOT) {
            Err(ExtentError::NoNext) => return Err(ExtentError::NotFound),
            other => other?,
        };

        if leaf_level > self.max_depth {
            return Err(ExtentError::OpNotSupported);
        }

        loop {
            if self.max_depth - self.level == leaf_level {
                if extent.covers(blk) {
                    return Ok(());
                }

                if blk < extent.e_lblk {
                    // the block lives in a hole; park the cursor on the preceding record, with
                    // the step's own status ignored
                    let _ = self.get(ExtentOp::PREV_SIB);
                    return Err(ExtentError::NotFound);
                }

                extent = match self.get(ExtentOp::NEXT_SIB) {
                    Err(ExtentError::NoNext) => return Err(ExtentError::NotFound),
                    other => other?,
                };
                continue;
            }

            match self.get(ExtentOp::NEXT_SIB) {
                Err(ExtentError::NoNext) => {}
                Err(err) => return Err(Self::demote_boundary(err)),
                Ok(next) => {
                    if next.e_lblk > blk {
                        // overshot: step back onto the subtree covering blk
                        self.get(ExtentOp::PREV_SIB)
                            .map_err(Self::demote_boundary)?;
                    } else {
                        extent = next;
                        continue;
                    }
                }
            }

            extent = self.get(ExtentOp::DOWN).map_err(Self::demote_boundary)?;
        }
    }

    /// Boundary conditions met while seeking mean the block is simply not mapped.
    fn demote_boundary(err: ExtentError) -> ExtentError {
        match err {
            ExtentError::NoNext | ExtentError::NoDown => ExtentError::NotFound,
            other => other,
        }
    }

    /// Decomposes a compound operation into the next atomic frame transition.
    fn effective_op(&mut self, orig_op: ExtentOp) -> Result<ExtentOp, ExtentError> {
        let at_leaf = self.level == self.max_depth;
        let at_root = self.level == 0;
        let frame = &mut self.path[self.level];

        match orig_op {
            ExtentOp::NEXT | ExtentOp::NEXT_LEAF => {
                if !at_leaf && frame.visit_num == 0 {
                    frame.visit_num += 1;
                    Ok(ExtentOp::DOWN)
                } else if frame.left > 0 {
                    Ok(ExtentOp::NEXT_SIB)
                } else if !at_root {
                    Ok(ExtentOp::UP)
                } else {
                    Err(ExtentError::NoNext)
                }
            }
            ExtentOp::PREV | ExtentOp::PREV_LEAF => {
                if !at_leaf && frame.visit_num > 0 {
                    frame.visit_num = 0;
                    Ok(ExtentOp::DOWN_AND_LAST)
                } else if frame.left + 1 < frame.entries {
                    Ok(ExtentOp::PREV_SIB)
                } else if !at_root {
                    Ok(ExtentOp::UP)
                } else {
                    Err(ExtentError::NoPrev)
                }
            }
            ExtentOp::LAST_LEAF => {
                if !at_leaf && frame.left == 0 {
                    Ok(ExtentOp::DOWN)
                } else {
                    Ok(ExtentOp::LAST_SIB)
                }
            }
            other => Ok(other),
        }
    }

    /// Puts a frame back in its just-reset state: no current record, everything to the right.
    fn reset_frame_start(&mut self, level: usize) {
        let frame = &mut self.path[level];
        frame.left = frame.entries;
        frame.curr = None;
    }

    fn step_next_sib(&mut self) -> CanFail<ExtentError> {
        let frame = &mut self.path[self.level];

        if frame.left == 0 {
            return Err(ExtentError::NoNext);
        }

        let entry = match frame.curr {
            Some(entry) => entry + 1,
            None => 0,
        };

        frame.left -= 1;
        frame.curr = Some(entry);
        frame.visit_num = 0;

        Ok(())
    }

    fn step_prev_sib(&mut self) -> CanFail<ExtentError> {
        let at_interior = self.level < self.max_depth;
        let frame = &mut self.path[self.level];

        let Some(entry) = frame.curr else {
            return Err(ExtentError::NoPrev);
        };
        if frame.left + 1 >= frame.entries {
            return Err(ExtentError::NoPrev);
        }

        frame.curr = Some(entry - 1);
        frame.left += 1;
        if at_interior {
            frame.visit_num = 1;
        }

        Ok(())
    }

    fn step_last_sib(&mut self) {
        let frame = &mut self.path[self.level];
        frame.curr = frame.entries.checked_sub(1);
        frame.left = 0;
    }

    fn step_up(&mut self, orig_op: ExtentOp) -> CanFail<ExtentError> {
        if self.level == 0 {
            return Err(ExtentError::NoUp);
        }

        self.level -= 1;

        // leaving a subtree backwards: the parent must descend again on the next PREV
        if orig_op == ExtentOp::PREV || orig_op == ExtentOp::PREV_LEAF {
            self.path[self.level].visit_num = 0;
        }

        Ok(())
    }

    fn step_down(&mut self, to_last: bool) -> CanFail<ExtentError> {
        let level = self.level;
        let Some(entry) = self.path[level].curr else {
            return Err(ExtentError::NoDown);
        };
        if level >= self.max_depth {
            return Err(ExtentError::NoDown);
        }

        let (parent_left, parent_end_blk) = {
            let frame = &self.path[level];
            (frame.left, frame.end_blk)
        };
        let node = ExtentNode(self.node_bytes(level));
        let child_blk = node.idx_at(entry).leaf();
        let next_sib_blk = if parent_left > 0 {
            Some(u64::from(node.idx_at(entry + 1).first_blk()))
        } else {
            None
        };

        let blk_size = self.fs.blk_size() as usize;
        let mut buf = match self.path[level + 1].buf.take() {
            Some(buf) => buf,
            None => alloc::vec![0u8; blk_size],
        };

        if self.fs.image_io_detached() {
            // metadata-only image: the node lives behind the detached data channel, iterate over
            // a blank node instead of failing the read
            buf.fill(0);
        } else {
            debug!(
                target: "ext4",
                "loading extent node at block {}",
                u64::from(child_blk)
            );
            if let Err(err) = self.fs.read_blk(child_blk, &mut buf) {
                self.path[level + 1].buf = Some(buf);
                return Err(err.into());
            }
        }

        self.level += 1;

        let header = ExtentNode(&buf).header();
        if let Err(err) = header.verify(blk_size) {
            self.level -= 1;
            self.path[level + 1].buf = Some(buf);
            return Err(err);
        }

        let child = &mut self.path[level + 1];
        child.buf = Some(buf);
        child.entries = header.entries();
        child.max_entries = header.max_entries();
        child.end_blk = next_sib_blk.unwrap_or(parent_end_blk);

        if to_last {
            child.curr = child.entries.checked_sub(1);
            child.left = 0;
            child.visit_num = u8::from(self.level < self.max_depth);
        } else {
            child.curr = if child.entries > 0 { Some(0) } else { None };
            child.left = child.entries.saturating_sub(1);
            child.visit_num = 0;
        }

        Ok(())
    }

    /// Decodes the record under the cursor.
    fn decode_current(&self) -> Result<Ext4Extent, ExtentError> {
        let frame = &self.path[self.level];
        let Some(entry) = frame.curr else {
            return Err(ExtentError::NoCurrentNode);
        };

        let node = ExtentNode(self.node_bytes(self.level));
        let mut extent = Ext4Extent::default();

        if self.level == self.max_depth {
            let leaf = node.extent_at(entry);
            extent.e_pblk = leaf.start_blk().into();
            extent.e_lblk = u64::from(leaf.first_blk());
            extent.e_len = u64::from(leaf.ee_len.raw());
            extent.e_flags |= ExtentFlags::LEAF;

            if extent.e_len > u64::from(EXT_INIT_MAX_LEN) {
                extent.e_len -= u64::from(EXT_INIT_MAX_LEN);
                extent.e_flags |= ExtentFlags::UNINIT;
            }
        } else {
            let idx = node.idx_at(entry);
            extent.e_pblk = idx.leaf().into();
            extent.e_lblk = u64::from(idx.first_blk());
            extent.e_len = if frame.left > 0 {
                u64::from(node.idx_at(entry + 1).first_blk()) - extent.e_lblk
            } else {
                frame.end_blk - extent.e_lblk
            };
        }

        if frame.visit_num != 0 {
            extent.e_flags |= ExtentFlags::SECOND_VISIT;
        }

        Ok(extent)
    }

    /// Writes the current frame back: the whole inode for the root, one filesystem block
    /// otherwise, addressed through the parent frame's current index entry.
    fn update_path(&mut self) -> CanFail<ExtentError> {
        if self.level == 0 {
            self.fs.write_inode_full(self.ino, &self.inode)?;
        } else {
            let Some(parent_entry) = self.path[self.level - 1].curr else {
                return Err(ExtentError::NoCurrentNode);
            };
            let blk = ExtentNode(self.node_bytes(self.level - 1))
                .idx_at(parent_entry)
                .leaf();
            self.fs.write_blk(blk, self.node_bytes(self.level))?;
        }

        Ok(())
    }

    fn node_bytes(&self, level: usize) -> &[u8] {
        if level == 0 {
            &self.inode[Inode::i_block_region()]
        } else {
            self.path[level]
                .buf
                .as_deref()
                .expect("active extent path frame has no buffer")
        }
    }

    fn node_bytes_mut(&mut self, level: usize) -> &mut [u8] {
        if level == 0 {
            &mut self.inode[Inode::i_block_region()]
        } else {
            self.path[level]
                .buf
                .as_deref_mut()
                .expect("active extent path frame has no buffer")
        }
    }
}
