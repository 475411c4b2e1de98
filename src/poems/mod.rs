mod service;

pub use service::{Fetched, PoemService, Source};
