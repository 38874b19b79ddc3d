mod lines;

pub use lines::{LineStream, MAX_LINE_LEN, UpstreamLines};
