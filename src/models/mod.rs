pub mod proxy;
pub mod report;
pub mod user;

pub use proxy::*;
pub use report::*;
pub use user::*;
