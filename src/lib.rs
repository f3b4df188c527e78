/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! Reading Mercurial's revlog container format.
//!
//! A revlog is an append-only, content-addressed sequence of revisions
//! stored as a `.i` index file and, unless the payload is inlined into
//! the index, a `.d` data file. Each revision is either a full snapshot
//! or a binary patch against the previous revision, so random access
//! replays a chain of patches over a base snapshot.
//!
//! [`RevlogStream`] is the entry point: it answers index-only queries
//! (revision count, nodeids, lengths) and drives ordered traversals that
//! hand every visited revision to a caller-supplied [`Inspector`]. The
//! reader attaches no meaning to payload bytes; changesets, manifests and
//! file blobs are all decoded by the inspector's owner.

mod chunk;
mod errors;
mod index;
mod inspector;
mod nodeid;
mod patch;
mod source;
mod stream;

pub use crate::errors::Result;
pub use crate::errors::RevlogError;
pub use crate::index::offset_field_to_inline_file_offset;
pub use crate::index::Features;
pub use crate::index::IndexRecord;
pub use crate::index::RevFlags;
pub use crate::index::RECORD_SIZE;
pub use crate::inspector::Inspector;
pub use crate::inspector::Lifecycle;
pub use crate::inspector::RevisionEntry;
pub use crate::nodeid::BadHex;
pub use crate::nodeid::LengthMismatch;
pub use crate::nodeid::Nodeid;
pub use crate::nodeid::NULL_ID;
pub use crate::patch::Hunk;
pub use crate::patch::Patch;
pub use crate::patch::PatchError;
pub use crate::source::DataSource;
pub use crate::source::FileSource;
pub use crate::source::MmapSource;
pub use crate::source::SliceSource;
pub use crate::source::StreamProvider;
pub use crate::stream::RevlogStream;
pub use crate::stream::BAD_REVISION;
pub use crate::stream::TIP;
