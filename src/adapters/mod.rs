pub mod geo;
pub mod http_client;
pub mod http_handler;
pub mod pages;
pub mod proxy;

/// Re-export commonly used types from adapters
pub use geo::CidrGeoResolver;
pub use http_client::HttpClientAdapter;
pub use http_handler::{GatewayHandler, SysMount};
pub use pages::EmbeddedPages;
pub use proxy::ProxyDispatcher;
