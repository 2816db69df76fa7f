use std::net::IpAddr;

/// GeoResolver defines the port for mapping a client IP to an ISO country
/// code. Implementations must be cheap enough to call on every request.
///
/// `None` means "unknown": lookup failures are logged by the adapter and the
/// GeoIP gate treats unknown as neutral (it passes both allow and block
/// checks).
pub trait GeoResolver: Send + Sync + 'static {
    /// Resolve an address to a lowercase ISO 3166-1 alpha-2 code.
    fn resolve(&self, ip: IpAddr) -> Option<String>;
}
