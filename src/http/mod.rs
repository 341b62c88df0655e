//! Outbound HTTP used by source adapters and the sync gateway

pub mod client;

pub use client::{WebClient, WebResponse};
