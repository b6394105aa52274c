pub mod dates;
pub mod discovery;
pub mod image;
pub mod metadata;
pub mod reconcile;
pub mod thumbnails;
pub mod video;

pub use dates::parse_loose_date;
pub use discovery::{scan_dir, DirEntryInfo};
pub use metadata::{ContentKind, MetadataProcessor, ProcessOutcome, ThumbnailOutcome};
pub use reconcile::{absolute_path, sync_album, sync_subtree, SyncReport};
pub use thumbnails::ThumbnailStore;
