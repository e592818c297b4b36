//! The HTTP source and the pieces it is built from.
//!
//! ```text
//!   HttpSrc (state machine)
//!     ├── RangeRequestBuilder   request Range / time-seek headers
//!     ├── SessionManager        reqwest client, shared or private
//!     │     └── Session::send   redirects + auth challenges
//!     ├── HeaderParser          response headers -> ResponseInfo
//!     └── RetryPolicy           outcome -> proceed / retry / eos / fail
//! ```

pub mod auth;
pub(crate) mod cancel;
pub mod constants;
pub mod events;
pub mod headers;
pub mod http_src;
pub mod range;
pub mod request;
pub mod retry;
pub mod session;
pub mod settings;
pub mod state;

pub use auth::{AuthChallenge, AuthHook, ConfiguredCredentials, Credentials};
pub use events::{EventSink, HttpHeadersDump, NullSink, SourceEvent, Tags};
pub use headers::{HeaderParser, ResponseInfo, StreamFormat};
pub use http_src::{HttpSrc, HttpSrcBuilder};
pub use range::RangeRequestBuilder;
pub use retry::RetryPolicy;
pub use session::{Session, SessionProvider, SessionRegistry, SessionSettings};
pub use settings::Settings;
pub use state::RequestState;

use crate::common::{Buffer, ErrorMessage, FlowError, Query, QueryResponse, Segment};

/// Contract between a pull-mode source and the host driving it.
///
/// `create` runs on the host's streaming thread; every other method may be
/// called concurrently from a control thread. `unlock` must make a blocked
/// `create` return [`FlowError::Flushing`] promptly, and the source stays
/// flushing until `unlock_stop`.
pub trait PushSource: Send + Sync {
    fn start(&self) -> Result<(), ErrorMessage>;

    fn stop(&self) -> Result<(), ErrorMessage>;

    /// Produces the next block of data.
    fn create(&self) -> Result<Buffer, FlowError>;

    /// Repositions the stream; the new request is only made by the next
    /// `create`. Returns `false` when the segment cannot be honored.
    fn seek(&self, segment: Segment) -> bool;

    fn is_seekable(&self) -> bool;

    /// Total size in bytes, when known.
    fn size(&self) -> Option<u64>;

    fn query(&self, query: Query) -> Option<QueryResponse>;

    fn unlock(&self);

    fn unlock_stop(&self);
}
