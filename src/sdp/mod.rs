//! Session descriptor writer

pub mod descriptor;

pub use descriptor::SessionDescriptor;
