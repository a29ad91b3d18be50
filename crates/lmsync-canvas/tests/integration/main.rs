//! Integration tests for lmsync-canvas
//!
//! Uses wiremock to simulate a Canvas instance and verifies end-to-end
//! behavior of the provider listings, downloads, the multipart upload
//! protocol and module item creation.

mod common;

mod test_listing;
