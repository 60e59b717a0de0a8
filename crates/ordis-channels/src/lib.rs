pub mod router;

pub use router::{BindingSource, ChannelRouter, MessageProcessor};
