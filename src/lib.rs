pub mod chardev;
pub mod devices;
pub mod err;
pub mod proto;

pub use chardev::*;
pub use devices::*;
pub use err::*;
pub use proto::*;
