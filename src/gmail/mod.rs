//! Credential cache and the authenticated Gmail client boundary.

pub mod client;

pub use client::{ClientCache, GmailClient, GMAIL_API_BASE};
