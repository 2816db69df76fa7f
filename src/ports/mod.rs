pub mod geo_resolver;
pub mod http_client;
pub mod page_renderer;

pub use geo_resolver::GeoResolver;
pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
pub use page_renderer::PageRenderer;
