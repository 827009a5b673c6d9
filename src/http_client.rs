use bytes::Bytes;
use http::{Request, Response};
use std::{error::Error as StdError, fmt::Debug};

/// Error returned by an [`HttpClient`].
pub type HttpError = Box<dyn StdError + Send + Sync + 'static>;

/// A minimal blocking HTTP client used to deliver items.
///
/// Open and read timeouts, proxies and TLS verification are properties of the client. With the
/// `reqwest-client` feature enabled,
/// [`Config::build_http_client`](crate::Config::build_http_client) creates a
/// `reqwest::blocking::Client` from the configuration.
pub trait HttpClient: Debug + Send + Sync {
    /// Send the request and return the response, whatever its status code.
    fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Bytes>, HttpError>;
}

impl<C: HttpClient + ?Sized> HttpClient for std::sync::Arc<C> {
    fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Bytes>, HttpError> {
        self.as_ref().send(request)
    }
}

/// Whether the error, or any error in its source chain, is a timeout.
pub(crate) fn is_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        #[cfg(feature = "reqwest")]
        if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>() {
            if reqwest_err.is_timeout() {
                return true;
            }
        }
        current = err.source();
    }
    false
}

#[cfg(feature = "reqwest")]
mod reqwest_client {
    use super::{Bytes, HttpClient, HttpError, Request, Response};

    impl HttpClient for reqwest::blocking::Client {
        fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Bytes>, HttpError> {
            let request: reqwest::blocking::Request = request.try_into()?;
            let response = self.execute(request)?;
            let status = response.status();
            Ok(Response::builder()
                .status(status)
                .body(response.bytes()?)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("wrapped")]
    struct Wrapped(#[source] std::io::Error);

    #[test]
    fn timeout_is_found_in_source_chain() {
        let err = Wrapped(std::io::Error::new(std::io::ErrorKind::TimedOut, "read"));
        assert!(is_timeout(&err));
    }

    #[test]
    fn other_io_errors_are_not_timeouts() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(!is_timeout(&err));
    }
}
