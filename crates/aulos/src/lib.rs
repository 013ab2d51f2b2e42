#![forbid(unsafe_code)]

//! # aulos
//!
//! HTTP media-proxy gateway. Clients request a remote media URL through the
//! `url` query parameter; the proxy probes the origin, downloads rangeable
//! media in parallel chunks through [`aulos_engine`], and streams the bytes
//! back in order — honoring the client's own `Range` header. Non-GET methods
//! are forwarded verbatim.

pub mod config;
pub mod error;
pub mod forward;
pub mod handler;
pub mod media_type;
pub mod params;
pub mod probe;
pub mod server;
pub mod state;
pub mod store;

pub use config::Config;
pub use error::{ProxyError, ProxyResult};
pub use server::{router, serve};
pub use state::ProxyState;
