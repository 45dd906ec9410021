pub mod driver;
pub mod http;
