#[allow(clippy::module_inception)]
mod db;

pub use db::{DB, DBOptions};
