//! Virtual displays requested by applications.
//!
//! [`display`] holds the adapter and its collaborator contracts, [`service`]
//! the host that serializes requests and paces transaction windows, and
//! [`sim`] in-process collaborators for the binary and the tests.

pub mod config;
pub mod display;
pub mod service;
pub mod sim;
