// Provider implementations for news backends
pub mod newsapi;

pub use newsapi::NewsApiProvider;
