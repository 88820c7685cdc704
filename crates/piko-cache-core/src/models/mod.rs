//! Request and response types shared by the worker, storage and network.

pub mod request;
pub mod response;

pub use request::{Method, Request};
pub use response::StoredResponse;
