pub mod content_type;
pub mod http;
pub mod listing;
pub mod object;
pub mod signing;
