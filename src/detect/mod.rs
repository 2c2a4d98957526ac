mod backend;
pub mod backends;
pub mod postprocess;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{ReplayBackend, StubBackend};
pub use registry::BackendRegistry;
pub use result::DetectedBox;

#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
