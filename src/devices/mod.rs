pub mod bus;
pub mod proxy;

pub use bus::*;
pub use proxy::*;
