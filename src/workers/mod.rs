pub mod finalizer;
pub mod status;
pub mod trigger;
