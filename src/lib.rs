pub mod cache;
pub mod config;
pub mod cursor;
pub mod def;
pub mod fetcher;
pub mod identity;
pub mod mirror;
pub mod normalize;
pub mod orchestrator;
pub mod remote;

pub use cache::{CacheStore, SnapshotData};
pub use config::SyncConfig;
pub use cursor::CursorStore;
pub use def::*;
pub use fetcher::{Fetcher, RetryPolicy};
pub use identity::IdentityResolver;
pub use mirror::{HttpMirror, RecordMirror};
pub use normalize::{normalize, visible_content_len};
pub use orchestrator::SyncOrchestrator;
pub use remote::{FetchError, HttpRemote, RawRecord, RemoteApi};
