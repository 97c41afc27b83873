pub mod config;
pub mod error;
pub mod model;
pub mod replay;
pub mod resolve;
pub mod sqlite;
pub mod store;

pub use config::{
    load_encodings_config, EncodingsConfig, ReplaySection, ResolverSection, StoreSection,
    TablesSection,
};
pub use error::{ConfigError, Result};
pub use model::{ContentIdentity, DecodeError, Encoding, FormatEquivalence, RawRecord};
pub use replay::{
    write_report, CapturedEvent, EndpointProbe, HttpProbe, ReplayError, ReplayReport,
    ReplayResult, ReplayRunner, ReplaySettings, ReplaySummary,
};
pub use resolve::{
    ErrorBody, FormatEquivalenceCache, NotFoundReason, Resolution, ResolveError, ResolveRequest,
    ResolveResult, Resolver, SelectedEncoding, SharedEquivalences,
};
pub use store::{
    ImportOptions, ImportSummary, MemoryRecordStore, RecordStore, SqliteRecordStore,
    SqliteRecordStoreBuilder, StoreError, StoreResult,
};
