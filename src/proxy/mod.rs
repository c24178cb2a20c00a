pub mod handler;
pub mod listener;
pub mod relay;
pub mod upstream;
