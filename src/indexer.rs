pub(crate) mod db;
pub(crate) mod models;
pub(crate) mod types;
