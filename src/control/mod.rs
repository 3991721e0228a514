pub mod client;

pub use client::ControlClient;
