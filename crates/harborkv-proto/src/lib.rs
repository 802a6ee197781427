pub mod error;
pub mod frame;
pub mod request;
pub mod value;

pub use error::*;
pub use frame::*;
pub use request::*;
pub use value::*;
