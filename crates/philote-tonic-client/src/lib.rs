#![doc = include_str!("../README.md")]

mod discipline;
mod explicit;
mod implicit;

pub use discipline::{ClientConfig, DisciplineClient, recover_arrays, recover_partials};
pub use explicit::ExplicitClient;
pub use implicit::ImplicitClient;
