pub mod pool;
pub mod proxy;

pub use pool::*;
pub use proxy::*;
