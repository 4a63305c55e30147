//! Request and response wrappers.

mod request;
mod response;

pub use request::Request;
pub use response::{make_response, Body, BodyStream, Response, DEFAULT_MIMETYPE};
