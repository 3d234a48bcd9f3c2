pub mod extract;
pub mod load;
pub mod reconcile;
pub mod status;
