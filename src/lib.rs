//! FCM legacy web-push client
//!
//! Client for the Firebase Cloud Messaging legacy HTTP API and the
//! Instance-ID API.
//!
//! It handles:
//! - Direct, device-group, and topic message delivery
//! - Device-group membership (create/add/remove) with a notification-key cache
//! - Topic subscription management (single device and batch)
//! - Device token introspection
//!
//! Every operation is a single request with no retries; the caller inspects
//! the classified response (or the error) to determine the outcome.

pub mod client;
pub mod errors;
pub mod models;

pub use client::FCMClient;
pub use errors::FCMError;
pub use models::{build_message, ApiResponse, Message, Notification, RequestInfo};
