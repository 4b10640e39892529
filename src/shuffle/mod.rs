//! External merge sort over spilled records, with composite-key and
//! NULL-aware ordering (§4.7). `codec` handles the per-field wire format,
//! `external_sort` drives the `sort` subprocess, `merge` combines
//! already-sorted streams.

pub mod codec;
pub mod external_sort;
pub mod merge;

pub use codec::FieldCodec;
pub use external_sort::SortKey;
pub use merge::{MergeIter, MergeKey};
