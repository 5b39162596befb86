//! Branch navigator over reversible patches.
//!
//! The navigator keeps one fixed-size header that always reflects the state
//! at its cursor. The cursor sits on a tag of a tree of branches; every tag
//! carries the patches committed to it. The header equals the result of
//! applying, from a zeroed header, every patch of every tag from the root
//! down to the cursor.
//!
//! # Operations
//! - [`ChainNavigator::create_tag`] opens a branch under the cursor and
//!   moves into it
//! - [`ChainNavigator::commit`] appends a patch to the cursor tag
//! - [`ChainNavigator::move_bwd`] / [`ChainNavigator::move_fwd`] /
//!   [`ChainNavigator::move_to`] move the cursor, applying or reverting patches
//! - [`ChainNavigator::delete_tag`] drops a whole subtree of branches
//!
//! What a patch means is up to the [`PatchHost`]: the navigator only stores
//! bytes and asks the host to apply them forwards or backwards.

pub mod error;
pub mod mapping;
pub mod tags;

use auto_impl::auto_impl;
use log::{debug, info, warn};

pub use error::NavigatorError;
pub use mapping::{MappedFile, MappingDefs, Offset};
pub use tags::{TagId, TagInfo, TagNode, TagTree, ROOT_TAG};

use crate::config::Config;
use crate::def::TAG_RECORD_SIZE;

/// Interpretation of patch payloads, supplied by the host.
#[auto_impl(&mut, Box)]
pub trait PatchHost {
    /// Adjusts the region layout before the region is opened.
    fn adjust_defs(&self, _defs: &mut MappingDefs) {}

    /// Applies `patch` to the header, forwards or backwards.
    ///
    /// Applying a patch forwards and then backwards must restore the header.
    fn apply(&mut self, hdr: &mut [u8], patch: &[u8], fwd: bool);

    /// Reclaims the storage of a patch whose tag is being deleted.
    fn delete(&mut self, mapping: &mut MappedFile, off: Offset) -> Result<(), NavigatorError> {
        mapping.free(off)
    }

    /// Duplicates a patch into a fresh slot of the same bank.
    fn clone_patch(&mut self, mapping: &mut MappedFile, off: Offset) -> Result<Offset, NavigatorError> {
        let data = mapping.get(off)?.to_vec();
        let new_off = mapping.allocate(off.bank(), data.len())?;
        mapping.get_mut(new_off)?.copy_from_slice(&data);
        Ok(new_off)
    }
}

pub struct ChainNavigator<H: PatchHost> {
    host: H,
    mapping: MappedFile,
    sync_on_commit: bool,
    dirty: bool,
    closed: bool,
}

impl<H: PatchHost> ChainNavigator<H> {
    /// Opens the store described by `config`, creating it when absent.
    ///
    /// # Arguments
    /// * `host` - The patch interpreter; it also fixes the region layout
    /// * `config` - Store location and limits
    ///
    /// # Errors
    /// `Corrupt` when the stored region does not match the host layout or
    /// fails structural validation; IO errors are passed through.
    pub fn open(host: H, config: &Config) -> Result<Self, NavigatorError> {
        let mut defs = MappingDefs::default();
        host.adjust_defs(&mut defs);
        let mapping = MappedFile::open(&config.path, config.region_capacity, defs)?;
        mapping.check_valid()?;
        info!(
            "Opened navigator {} with {} tags, cursor at {}",
            config.path,
            mapping.tags().len(),
            mapping.tags().cursor()
        );
        Ok(Self {
            host,
            mapping,
            sync_on_commit: config.sync_on_commit,
            dirty: false,
            closed: false,
        })
    }

    /// Persists the region and releases the store.
    pub fn close(mut self) -> Result<(), NavigatorError> {
        self.closed = true;
        self.mapping.flush()?;
        info!("Closed navigator {}", self.mapping.path());
        Ok(())
    }

    /// Writes the region image.
    pub fn flush(&mut self) -> Result<(), NavigatorError> {
        self.mapping.flush()?;
        self.dirty = false;
        Ok(())
    }

    fn after_mutation(&mut self) -> Result<(), NavigatorError> {
        self.dirty = true;
        if self.sync_on_commit {
            self.flush()?;
        }
        Ok(())
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn mapping(&self) -> &MappedFile {
        &self.mapping
    }

    pub fn tags(&self) -> &TagTree {
        self.mapping.tags()
    }

    pub fn cursor(&self) -> TagId {
        self.mapping.tags().cursor()
    }

    pub fn tag(&self, id: TagId) -> Option<&TagNode> {
        self.mapping.tags().get(id)
    }

    /// The header at the cursor.
    pub fn get_hdr(&self) -> &[u8] {
        self.mapping.fixed_hdr()
    }

    /// Allocates a zeroed patch slot; fill it through [`Self::patch_mut`].
    pub fn allocate(&mut self, bank: u32, size: usize) -> Result<Offset, NavigatorError> {
        let off = self.mapping.allocate(bank, size)?;
        self.after_mutation()?;
        Ok(off)
    }

    pub fn patch(&self, off: Offset) -> Result<&[u8], NavigatorError> {
        self.mapping.get(off)
    }

    /// Mutable patch bytes. Only uncommitted patches may be modified.
    ///
    /// # Errors
    /// `InvalidPatch` if `off` is not allocated or already committed.
    pub fn patch_mut(&mut self, off: Offset) -> Result<&mut [u8], NavigatorError> {
        if self.mapping.is_committed(off) {
            return Err(NavigatorError::InvalidPatch(off));
        }
        self.dirty = true;
        self.mapping.get_mut(off)
    }

    /// Frees a patch that was never committed.
    ///
    /// # Errors
    /// `InvalidPatch` if `off` is not allocated or is owned by a tag.
    pub fn free(&mut self, off: Offset) -> Result<(), NavigatorError> {
        if self.mapping.is_committed(off) {
            return Err(NavigatorError::InvalidPatch(off));
        }
        self.mapping.free(off)?;
        self.after_mutation()
    }

    /// Duplicates a patch through the host.
    pub fn clone_patch(&mut self, off: Offset) -> Result<Offset, NavigatorError> {
        let new_off = self.host.clone_patch(&mut self.mapping, off)?;
        self.after_mutation()?;
        Ok(new_off)
    }

    fn apply(&mut self, off: Offset, fwd: bool) -> Result<(), NavigatorError> {
        let (hdr, patch) = self.mapping.hdr_and_patch(off)?;
        self.host.apply(hdr, patch, fwd);
        Ok(())
    }

    fn node(&self, id: TagId) -> Result<&TagNode, NavigatorError> {
        self.mapping.tags().get(id).ok_or(NavigatorError::UnknownTag(id))
    }

    /// Creates a child of the cursor tag and moves the cursor into it.
    ///
    /// # Errors
    /// `OutOfSpace` if the tag record does not fit; nothing changes then.
    pub fn create_tag(&mut self, info: TagInfo) -> Result<TagId, NavigatorError> {
        self.mapping.reserve(TAG_RECORD_SIZE)?;
        let parent = self.cursor();
        let tags = self.mapping.tags_mut();
        let id = tags.insert_child(parent, info);
        tags.set_cursor(id);
        debug!("Created tag {} under {}", id, parent);
        self.after_mutation()?;
        Ok(id)
    }

    /// Appends the patch at `off` to the cursor tag and applies it.
    ///
    /// # Errors
    /// - `TagHasChildren` if branches already fork from the cursor tag
    /// - `InvalidPatch` if `off` is not an allocated slot or is already
    ///   committed to any tag
    pub fn commit(&mut self, off: Offset) -> Result<(), NavigatorError> {
        let cursor = self.cursor();
        if !self.node(cursor)?.children.is_empty() {
            return Err(NavigatorError::TagHasChildren(cursor));
        }
        if self.mapping.is_committed(off) {
            return Err(NavigatorError::InvalidPatch(off));
        }
        self.apply(off, true)?;
        self.mapping.mark_committed(off);
        self.mapping
            .tags_mut()
            .get_mut(cursor)
            .ok_or(NavigatorError::UnknownTag(cursor))?
            .patches
            .push(off);
        self.after_mutation()
    }

    fn revert_cursor_tag(&mut self) -> Result<TagId, NavigatorError> {
        let cursor = self.cursor();
        let node = self.node(cursor)?;
        let parent = node.parent.ok_or(NavigatorError::AtRoot)?;
        let patches = node.patches.clone();
        for &off in patches.iter().rev() {
            self.apply(off, false)?;
        }
        self.mapping.tags_mut().set_cursor(parent);
        Ok(parent)
    }

    /// Reverts every patch of the cursor tag, newest first, and moves to
    /// its parent.
    ///
    /// # Errors
    /// `AtRoot` if the cursor is the root tag.
    pub fn move_bwd(&mut self) -> Result<(), NavigatorError> {
        let parent = self.revert_cursor_tag()?;
        debug!("Moved back to {}", parent);
        self.after_mutation()
    }

    /// Moves the cursor down to `target`, applying the patches of every tag
    /// on the way in order.
    ///
    /// # Errors
    /// `UnknownTag`, or `NotDescendant` if `target` is not below the cursor.
    pub fn move_fwd(&mut self, target: TagId) -> Result<(), NavigatorError> {
        let cursor = self.cursor();
        if target == cursor {
            return Ok(());
        }
        let path = self
            .mapping
            .tags()
            .path_from_root(target)
            .ok_or(NavigatorError::UnknownTag(target))?;
        let pos = path
            .iter()
            .position(|&t| t == cursor)
            .ok_or(NavigatorError::NotDescendant { target, cursor })?;
        for &tag in &path[pos + 1..] {
            let patches = self.node(tag)?.patches.clone();
            for off in patches {
                self.apply(off, true)?;
            }
            self.mapping.tags_mut().set_cursor(tag);
        }
        debug!("Moved forward to {}", target);
        self.after_mutation()
    }

    /// Moves the cursor to any tag: back to the common ancestor, then
    /// forward.
    pub fn move_to(&mut self, target: TagId) -> Result<(), NavigatorError> {
        self.node(target)?;
        while !self.mapping.tags().is_ancestor(self.cursor(), target) {
            self.revert_cursor_tag()?;
        }
        self.move_fwd(target)?;
        self.after_mutation()
    }

    /// Deletes `id` with all its descendants, reclaiming their patches
    /// through the host. A cursor inside the subtree first moves back to
    /// the parent of `id`.
    ///
    /// # Errors
    /// `RootTag` for the root, `UnknownTag` for a missing tag.
    pub fn delete_tag(&mut self, id: TagId) -> Result<(), NavigatorError> {
        if id == ROOT_TAG {
            return Err(NavigatorError::RootTag);
        }
        self.node(id)?;
        while self.mapping.tags().is_ancestor(id, self.cursor()) {
            self.revert_cursor_tag()?;
        }
        let removed = self.mapping.tags_mut().remove_subtree(id);
        let count = removed.len();
        for (_, node) in removed {
            for off in node.patches {
                self.mapping.unmark_committed(off);
                self.host.delete(&mut self.mapping, off)?;
            }
            self.mapping.release(TAG_RECORD_SIZE);
        }
        info!("Deleted tag {} with {} tags below it", id, count - 1);
        self.after_mutation()
    }

    /// Best child of the cursor tag.
    pub fn get_child_tag(&self) -> Option<TagId> {
        self.children(self.cursor()).next()
    }

    /// Next sibling of `id`, in best-first order.
    pub fn get_next_tag(&self, id: TagId) -> Option<TagId> {
        self.mapping.tags().next_sibling(id)
    }

    /// Children of `id`, best first.
    pub fn children(&self, id: TagId) -> impl Iterator<Item = TagId> + '_ {
        self.mapping.tags().children(id).iter().copied()
    }

    /// Structural validation of the whole store.
    pub fn check_valid(&self) -> Result<(), NavigatorError> {
        self.mapping.check_valid()
    }

    /// Like [`Self::check_valid`], but fatal in debug builds.
    pub fn assert_valid(&self) -> Result<(), NavigatorError> {
        if let Err(err) = self.check_valid() {
            if cfg!(debug_assertions) {
                panic!("{}", err);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Replays every patch from the root down to the cursor on a zeroed
    /// header and compares the result with the live header.
    ///
    /// # Errors
    /// `Corrupt` on a mismatch.
    pub fn verify_header(&mut self) -> Result<(), NavigatorError> {
        let cursor = self.cursor();
        let path = self
            .mapping
            .tags()
            .path_from_root(cursor)
            .ok_or(NavigatorError::UnknownTag(cursor))?;
        let mut scratch = vec![0u8; self.mapping.defs().fixed_hdr_size];
        for tag in path {
            let node = self.mapping.tags().get(tag).ok_or(NavigatorError::UnknownTag(tag))?;
            for &off in &node.patches {
                self.host.apply(&mut scratch, self.mapping.get(off)?, true);
            }
        }
        if scratch != self.mapping.fixed_hdr() {
            return Err(NavigatorError::Corrupt(format!(
                "header at {} differs from its replay",
                cursor
            )));
        }
        Ok(())
    }
}

impl<H: PatchHost> Drop for ChainNavigator<H> {
    fn drop(&mut self) {
        if self.closed || !self.dirty {
            return;
        }
        if let Err(err) = self.mapping.flush() {
            warn!("Failed to flush {} on drop: {}", self.mapping.path(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helper::{commit_delta, tag_info, CounterHost};
    use serial_test::serial;
    use tempfile::Builder;

    fn open(path: &str) -> ChainNavigator<CounterHost> {
        ChainNavigator::open(CounterHost::new(), &Config::from_path(path)).unwrap()
    }

    #[test]
    #[serial]
    fn test_commit_and_move() {
        let dir = Builder::new().prefix("nav").tempdir().unwrap();
        let path = dir.path().join("n").to_string_lossy().to_string();
        let mut nav = open(&path);

        let a = nav.create_tag(tag_info(1)).unwrap();
        commit_delta(&mut nav, 0, 5).unwrap();
        commit_delta(&mut nav, 1, 7).unwrap();
        assert_eq!(&[5, 7], &CounterHost::counters(nav.get_hdr())[..2]);

        nav.move_bwd().unwrap();
        assert_eq!(ROOT_TAG, nav.cursor());
        assert!(nav.get_hdr().iter().all(|&b| b == 0));
        assert!(matches!(nav.move_bwd(), Err(NavigatorError::AtRoot)));

        nav.move_fwd(a).unwrap();
        assert_eq!(&[5, 7], &CounterHost::counters(nav.get_hdr())[..2]);
        nav.verify_header().unwrap();
        nav.assert_valid().unwrap();
    }

    #[test]
    #[serial]
    fn test_commit_rejected_on_fork_point() {
        let dir = Builder::new().prefix("nav").tempdir().unwrap();
        let path = dir.path().join("n").to_string_lossy().to_string();
        let mut nav = open(&path);

        let a = nav.create_tag(tag_info(1)).unwrap();
        let b = nav.create_tag(tag_info(2)).unwrap();
        nav.move_bwd().unwrap();
        assert_eq!(a, nav.cursor());
        let off = nav.allocate(0, CounterHost::PATCH_SIZE).unwrap();
        assert!(matches!(
            nav.commit(off),
            Err(NavigatorError::TagHasChildren(t)) if t == a
        ));
        nav.free(off).unwrap();

        assert!(matches!(
            nav.move_fwd(ROOT_TAG),
            Err(NavigatorError::NotDescendant { .. })
        ));
        assert!(matches!(
            nav.move_fwd(TagId(77)),
            Err(NavigatorError::UnknownTag(_))
        ));
        assert!(matches!(nav.delete_tag(ROOT_TAG), Err(NavigatorError::RootTag)));
        nav.move_fwd(b).unwrap();
        nav.check_valid().unwrap();
    }

    #[test]
    #[serial]
    fn test_patch_owned_by_one_tag() {
        let dir = Builder::new().prefix("nav").tempdir().unwrap();
        let path = dir.path().join("n").to_string_lossy().to_string();
        let mut nav = open(&path);

        let a = nav.create_tag(tag_info(1)).unwrap();
        let off = commit_delta(&mut nav, 0, 4).unwrap();
        let invalid = |r: Result<(), NavigatorError>| matches!(r, Err(NavigatorError::InvalidPatch(o)) if o == off);

        // into a child of the owner
        nav.create_tag(tag_info(2)).unwrap();
        assert!(invalid(nav.commit(off)));
        // into a sibling of the owner
        nav.move_to(ROOT_TAG).unwrap();
        let c = nav.create_tag(tag_info(3)).unwrap();
        assert!(invalid(nav.commit(off)));
        assert!(invalid(nav.free(off)));
        assert!(nav.patch_mut(off).is_err());
        assert!(nav.get_hdr().iter().all(|&b| b == 0));
        nav.check_valid().unwrap();

        let own = commit_delta(&mut nav, 1, 6).unwrap();
        nav.close().unwrap();

        // ownership is rebuilt on open
        let mut nav = open(&path);
        assert_eq!(c, nav.cursor());
        nav.create_tag(tag_info(4)).unwrap();
        assert!(matches!(nav.commit(own), Err(NavigatorError::InvalidPatch(_))));

        nav.delete_tag(a).unwrap();
        assert!(nav.mapping().get(off).is_err());
        nav.move_to(ROOT_TAG).unwrap();
        nav.move_to(c).unwrap();
        assert_eq!(&[0, 6], &CounterHost::counters(nav.get_hdr())[..2]);
        nav.check_valid().unwrap();
        nav.verify_header().unwrap();
    }

    #[test]
    #[serial]
    fn test_clone_patch() {
        let dir = Builder::new().prefix("nav").tempdir().unwrap();
        let path = dir.path().join("n").to_string_lossy().to_string();
        let mut nav = open(&path);
        nav.create_tag(tag_info(1)).unwrap();
        let off = commit_delta(&mut nav, 3, 11).unwrap();
        let copy = nav.clone_patch(off).unwrap();
        assert_ne!(off, copy);
        assert_eq!(nav.patch(off).unwrap(), nav.patch(copy).unwrap());
        nav.commit(copy).unwrap();
        assert_eq!(22, CounterHost::counters(nav.get_hdr())[3]);
        assert!(matches!(
            nav.commit(copy),
            Err(NavigatorError::InvalidPatch(_))
        ));
        nav.verify_header().unwrap();
    }
}
