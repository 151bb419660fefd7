pub(crate) mod actor;
pub(crate) mod context;
pub(crate) mod marker_transfer_queue;
