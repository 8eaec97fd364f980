#![forbid(unsafe_code)]
//! Test fixtures and a model-based conformance harness for WrenFS.
//!
//! [`FsModel`] drives a real [`WrenFs`] volume and an in-memory reference
//! model through the same operation sequence, tolerating the same errors on
//! both sides, and can verify at any point that every file reads back
//! byte-identical, every symlink resolves, and the integrity scan is clean.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use wfs::{SetAttr, WfsError, WrenFs, ROOT_INO};

/// Default fixture: 1024 blocks (757 of them data), 64 inodes.
#[must_use]
pub fn fresh_fs() -> WrenFs {
    WrenFs::format(1024, 64).expect("format fixture volume")
}

/// Free-block count from the integrity scan.
#[must_use]
pub fn free_blocks(fs: &WrenFs) -> u32 {
    fs.check().expect("integrity scan").free_blocks
}

/// Assert the integrity scan finds nothing.
pub fn assert_clean(fs: &WrenFs) {
    let report = fs.check().expect("integrity scan");
    assert!(report.is_clean(), "integrity errors: {:?}", report.errors);
}

type Contents = Rc<RefCell<Vec<u8>>>;

/// A real volume and a reference model fed the same operations.
pub struct FsModel {
    pub fs: WrenFs,
    /// Name → shared contents; hard links share the same buffer.
    files: HashMap<String, Contents>,
    symlinks: HashMap<String, String>,
}

impl Default for FsModel {
    fn default() -> Self {
        Self::new()
    }
}

impl FsModel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            fs: fresh_fs(),
            files: HashMap::new(),
            symlinks: HashMap::new(),
        }
    }

    fn occupied(&self, name: &str) -> bool {
        self.files.contains_key(name) || self.symlinks.contains_key(name)
    }

    pub fn create(&mut self, name: &str) {
        match self.fs.create(ROOT_INO, name, 0o644) {
            Ok(_) => {
                assert!(!self.occupied(name), "created over existing '{name}'");
                self.files
                    .insert(name.to_owned(), Rc::new(RefCell::new(Vec::new())));
            }
            Err(WfsError::Exists) => assert!(self.occupied(name)),
            Err(WfsError::NoSpace) => {}
            Err(err) => panic!("create '{name}': {err}"),
        }
    }

    pub fn unlink(&mut self, name: &str) {
        match self.fs.unlink(ROOT_INO, name) {
            Ok(()) => {
                let had = self.files.remove(name).is_some()
                    || self.symlinks.remove(name).is_some();
                assert!(had, "unlinked unknown '{name}'");
            }
            Err(WfsError::NotFound(_)) => assert!(!self.occupied(name)),
            Err(err) => panic!("unlink '{name}': {err}"),
        }
    }

    pub fn write(&mut self, name: &str, pos: u32, data: &[u8]) {
        let Some(contents) = self.files.get(name).cloned() else {
            return;
        };
        let ino = self.fs.lookup(ROOT_INO, name).expect("model file exists");
        match self.fs.write(ino, pos, data, false) {
            Ok(n) => {
                assert_eq!(n, data.len());
                let mut model = contents.borrow_mut();
                let end = pos as usize + data.len();
                if model.len() < end {
                    model.resize(end, 0);
                }
                model[pos as usize..end].copy_from_slice(data);
            }
            Err(WfsError::NoSpace) => {}
            Err(err) => panic!("write '{name}': {err}"),
        }
    }

    pub fn truncate(&mut self, name: &str, size: u32) {
        let Some(contents) = self.files.get(name).cloned() else {
            return;
        };
        let ino = self.fs.lookup(ROOT_INO, name).expect("model file exists");
        match self.fs.setattr(
            ino,
            SetAttr {
                size: Some(size),
                mode: None,
            },
        ) {
            Ok(()) => contents.borrow_mut().resize(size as usize, 0),
            Err(WfsError::NoSpace) => {}
            Err(err) => panic!("truncate '{name}': {err}"),
        }
    }

    pub fn link(&mut self, src: &str, dst: &str) {
        let Some(contents) = self.files.get(src).cloned() else {
            return;
        };
        let src_ino = self.fs.lookup(ROOT_INO, src).expect("model file exists");
        match self.fs.link(src_ino, ROOT_INO, dst) {
            Ok(()) => {
                assert!(!self.occupied(dst));
                self.files.insert(dst.to_owned(), contents);
            }
            Err(WfsError::Exists) => assert!(self.occupied(dst)),
            Err(WfsError::NoSpace) => {}
            Err(err) => panic!("link '{src}' -> '{dst}': {err}"),
        }
    }

    pub fn symlink(&mut self, name: &str, target: &str) {
        match self.fs.symlink(ROOT_INO, name, target) {
            Ok(_) => {
                assert!(!self.occupied(name));
                self.symlinks.insert(name.to_owned(), target.to_owned());
            }
            Err(WfsError::Exists) => assert!(self.occupied(name)),
            Err(WfsError::NoSpace) => {}
            Err(err) => panic!("symlink '{name}': {err}"),
        }
    }

    /// Unmount and remount from raw bytes; contents must survive.
    pub fn remount(&mut self) {
        let fs = std::mem::replace(&mut self.fs, fresh_fs());
        self.fs = WrenFs::mount(fs.into_bytes()).expect("remount");
    }

    /// Full conformance pass: every file byte-identical to the model, every
    /// symlink resolving to its target, and a clean integrity scan.
    pub fn verify(&self) {
        for (name, contents) in &self.files {
            let ino = self.fs.lookup(ROOT_INO, name).expect("file lookup");
            let model = contents.borrow();
            let stat = self.fs.stat(ino).expect("stat");
            assert_eq!(stat.size as usize, model.len(), "size of '{name}'");

            let mut buf = vec![0_u8; model.len()];
            let n = self.fs.read(ino, 0, &mut buf).expect("read");
            assert_eq!(n, model.len(), "read length of '{name}'");
            assert_eq!(buf, *model, "contents of '{name}'");
        }
        for (name, target) in &self.symlinks {
            let ino = self.fs.lookup(ROOT_INO, name).expect("symlink lookup");
            let resolved = self.fs.follow_symlink(ino, 1000).expect("follow");
            if let Some(rest) = target.strip_prefix("root?") {
                let (_, other) = rest.split_once(':').expect("conditional target");
                assert_eq!(resolved, other, "conditional symlink '{name}'");
            } else {
                assert_eq!(resolved, *target, "symlink '{name}'");
            }
        }
        assert_clean(&self.fs);
    }
}
