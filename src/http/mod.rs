//! HTTP layer: request building, rate-limited retrying execution, and
//! response parsing.

mod executor;
mod request;
mod response;
mod retry;
mod transport;

pub use executor::{ACCESS_TOKEN_HEADER, Executor};
pub use request::ApiRequest;
pub use response::{ApiEnvelope, parse_envelope, parse_into, parse_into_with};
#[cfg(test)]
pub use transport::MockTransport;
pub use transport::{
    HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError, TransportErrorKind,
};
