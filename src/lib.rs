pub mod common;
pub mod configs;
pub mod source;

pub use common::{
    Buffer, ErrorCategory, ErrorMessage, FlowError, Query, QueryResponse, Segment, SourceError,
    UriInfo,
};
pub use configs::{Config, SourceConfig};
pub use source::{HttpSrc, PushSource, SourceEvent};
