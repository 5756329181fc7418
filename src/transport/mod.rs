pub mod tcp;
pub mod traits;

pub use traits::DutTransport;
