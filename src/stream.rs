pub(crate) mod coin_movement;
pub(crate) mod consumer;
pub(crate) mod errors;
pub(crate) mod events;
pub(crate) mod source;
