//! Graph API access: admission-gated, retrying, paged.

mod client;
mod retry;
mod transport;

pub use client::{GraphClient, InsightQuery};
pub use retry::RetryDelay;
pub use transport::{Params, ReqwestTransport, Transport};
