#![doc = include_str!("../README.md")]

pub mod mock_backend;

pub use mock_backend::MockBackend;
