pub mod http;
pub mod pipe;
