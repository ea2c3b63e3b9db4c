/// Extracts the identity a request is accounted against.
///
/// Returning `None` (or an empty string) rejects the request with
/// [`QuotaError::MissingKey`](crate::QuotaError::MissingKey) before the
/// limiter is consulted.
pub trait Identify<Req>: Clone + Send + Sync + 'static {
    fn identify(&self, req: &Req) -> Option<String>;
}

impl<F, Req> Identify<Req> for F
where
    F: Fn(&Req) -> Option<String> + Clone + Send + Sync + 'static,
{
    fn identify(&self, req: &Req) -> Option<String> {
        self(req)
    }
}

#[cfg(feature = "axum")]
pub use http_keys::HeaderKey;
#[cfg(feature = "axum")]
pub use http_keys::PeerIp;

#[cfg(feature = "axum")]
mod http_keys {
    use std::net::SocketAddr;

    use axum::extract::ConnectInfo;
    use http::HeaderName;
    use http::Request;

    use super::Identify;

    /// Identifies a request by the value of one of its headers.
    #[derive(Debug, Clone)]
    pub struct HeaderKey(HeaderName);

    impl HeaderKey {
        pub fn new(name: HeaderName) -> Self {
            Self(name)
        }

        /// The `X-API-Key` header.
        pub fn api_key() -> Self {
            Self(HeaderName::from_static("x-api-key"))
        }
    }

    impl<B> Identify<Request<B>> for HeaderKey {
        fn identify(&self, req: &Request<B>) -> Option<String> {
            req.headers()
                .get(&self.0)?
                .to_str()
                .ok()
                .map(str::to_owned)
        }
    }

    /// Identifies a request by the IP address of the connected peer.
    ///
    /// Requires the server to be started with
    /// `into_make_service_with_connect_info::<SocketAddr>()`.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct PeerIp;

    impl<B> Identify<Request<B>> for PeerIp {
        fn identify(&self, req: &Request<B>) -> Option<String> {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        }
    }
}
