#![forbid(unsafe_code)]

//! Outbound HTTP stack for the aulos media proxy.
//!
//! One [`HttpClient`] per proxied request (sharing the process-wide DNS
//! resolver and connection options), carrying that request's cookie jar.
//! Range fetches, the origin probe, and non-GET forwarding all go through it.

pub mod client;
pub mod error;
pub mod resolve;
pub mod types;

pub use client::HttpClient;
pub use error::{NetError, NetResult};
pub use resolve::{select_resolver, RacedResolver, DNS_CANDIDATES, DNS_PROBE_DOMAIN};
pub use types::{Headers, NetOptions, RangeSpec};
