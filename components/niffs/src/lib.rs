#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! NIFFS: a small log-structured filesystem for raw NOR flash.
//!
//! The filesystem owns a contiguous flash region made of erasable *sectors*.
//! Every sector starts with an 8 byte sector header and is split into
//! equally sized *pages*. Files are flat (no directories) and are stored as a
//! chain of pages sharing one object id: span index 0 carries the *object
//! header* (name, length, type) and the first chunk of data, span indices 1..
//! carry the rest.
//!
//! Flash bits may only be cleared without an erase, so nothing is ever
//! rewritten in place. Pages are instead moved: the source is flagged
//! `MOVING`, the copy is written, then the source is deleted. Any power loss
//! in between leaves enough state on flash for [`Niffs::chk`] to bring the
//! filesystem back to either the old or the new state.
//!
//! Optionally a number of *linear* sectors follow the paged area. Linear files
//! keep their header in the paged area but store their data contiguously in
//! whole sectors, which allows memory mapped access through [`Niffs::read_ptr`].
//!
//! # Flash Layout
//! ```text
//! | sector 0 | sector 1 | ... | sector N-1 | linear 0 | ... | linear L-1 |
//! ```
//! With every paged sector being:
//!
//! | bytes          | content                           |
//! |----------------|-----------------------------------|
//! |  0 - 3         | erase count                       |
//! |  4 - 7         | magic (page size, linear sectors) |
//! |  8 - ...       | page 0, page 1, ...               |
//!
//! And every page:
//!
//! | bytes   | content                                           |
//! |---------|---------------------------------------------------|
//! |  0 - 3  | id (`obj_id << 16 \| span_ix`)                    |
//! |  4 - 7  | flag (`CLEAN`, `WRITTEN`, `MOVING`)               |
//! |  8 - 31 | object header only: length, name, type            |
//! | 32 - 39 | linear object header only: start sector, reserved |
//! |  ...    | payload                                           |
//!
//! All integers are stored little endian.
//!
//! # Important Implementation Details
//! * The filesystem never allocates, the scratch buffer (`BUF` bytes) and the
//!   descriptor table (`FDS` slots) are part of [`Niffs`]
//! * There is no internal locking, all operations take `&mut self`
//! * Lengths are only stored in the object header, which is always the last
//!   page to be updated by an operation

#[macro_use]
extern crate delog;
generate_macros!();

#[macro_use]
mod error;

mod api;
mod check;
mod config;
mod dump;
mod file;
mod find;
mod fs;
mod gc;
mod geometry;
mod hal;
mod linear;
mod page;
mod primitives;
mod traverse;

pub use crate::api::{Dir, DirEntry, Info, Stat};
pub use crate::config::{Config, GcWeights};
pub use crate::dump::PageStats;
pub use crate::error::{Error, Result, UnknownErrorCode};
pub use crate::file::{Fd, FlashSpan, OpenFlags, SeekFrom};
pub use crate::fs::Niffs;
pub use crate::geometry::Geometry;
pub use crate::hal::{Hal, NorFlashHal};
pub use crate::page::{FileType, Name, ObjId, PageIx, SpanIx, NAME_LEN, UNDEF_LEN};

#[cfg(test)]
mod tests;
