mod request;

pub use request::{RequestData, is_truthy};
