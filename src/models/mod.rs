pub mod country;
pub mod proxy;
pub mod record;
pub mod request;

pub use country::*;
pub use proxy::*;
pub use record::*;
pub use request::*;
