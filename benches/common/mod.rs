pub mod fixtures;

pub use fixtures::{BenchPage, FakeApi, KeyGenerator, page_key};
