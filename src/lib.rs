pub mod cache;
pub mod config;
pub mod exception;
pub mod handler;
pub mod param;
pub mod policy;
pub mod request;
pub mod server;
pub mod upstream;

pub use cache::{CacheState, DiskCache};
pub use config::Config;
pub use exception::Exception;
pub use handler::{Outcome, ProxyHandler};
pub use param::HttpRequestMethod;
pub use policy::Policy;
pub use request::Request;
