pub mod balancer;
pub mod context;
pub mod error;
pub mod overrides;
pub mod pipeline;
pub mod rewrite;
pub mod router;
pub mod stages;

pub use context::{RequestContext, Scheme};
pub use error::GatewayError;
pub use overrides::StatusOverrides;
pub use pipeline::{Pipeline, Stage, StageFlow};
pub use router::{UpstreamGroup, UpstreamRouter, UpstreamTarget};
