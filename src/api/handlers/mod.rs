pub mod configs;
pub mod register;
pub mod saved;
pub mod serial;
