#![doc = include_str!("../README.md")]

pub mod discipline;
pub mod disciplines;
pub mod server;

pub use discipline::{AnyDiscipline, Discipline, ExplicitDiscipline, ImplicitDiscipline};
pub use server::{config::ServerConfig, service::DisciplineServer};
