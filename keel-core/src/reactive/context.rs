//! Access Recording
//!
//! The recorder tracks which module revisions a computation observed. This
//! is the cheap half of the watcher check: if none of the recorded
//! revisions moved, nothing the computation read can have changed.
//!
//! # Implementation
//!
//! We use a thread-local stack of recording frames. Entering a frame pushes
//! it; every state read through a module handle while the stack is non-empty
//! records `(module, revision)` into the innermost frame. Finishing (or
//! dropping) the recorder pops it.
//!
//! Nested frames are independent: a read is recorded only in the innermost
//! one.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::state::{ModuleKey, Revision};

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// One open recording frame.
#[derive(Debug)]
struct Frame {
    id: u64,
    /// First revision observed per module.
    reads: HashMap<ModuleKey, Revision>,
}

/// Guard over a recording frame. Pops the frame when dropped.
#[derive(Debug)]
pub struct AccessRecorder {
    id: u64,
    finished: bool,
}

impl AccessRecorder {
    /// Open a new innermost frame on this thread.
    pub fn enter() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        FRAMES.with(|frames| {
            frames.borrow_mut().push(Frame {
                id,
                reads: HashMap::new(),
            });
        });

        Self {
            id,
            finished: false,
        }
    }

    /// Whether any frame is open on this thread.
    pub fn is_active() -> bool {
        FRAMES.with(|frames| !frames.borrow().is_empty())
    }

    /// Record a state read into the innermost frame.
    ///
    /// Called by module handles; a no-op without an open frame.
    pub fn record(key: &ModuleKey, revision: Revision) {
        FRAMES.with(|frames| {
            if let Some(frame) = frames.borrow_mut().last_mut() {
                frame.reads.entry(key.clone()).or_insert(revision);
            }
        });
    }

    /// Close the frame and return what it recorded.
    pub fn finish(mut self) -> HashMap<ModuleKey, Revision> {
        self.finished = true;
        self.pop()
    }

    fn pop(&self) -> HashMap<ModuleKey, Revision> {
        FRAMES.with(|frames| {
            let popped = frames.borrow_mut().pop();
            match popped {
                Some(frame) => {
                    debug_assert_eq!(
                        frame.id, self.id,
                        "AccessRecorder mismatch: expected {}, got {}",
                        self.id, frame.id
                    );
                    frame.reads
                }
                None => HashMap::new(),
            }
        })
    }
}

impl Drop for AccessRecorder {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}
