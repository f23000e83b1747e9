pub mod batch;
pub mod error;
pub mod filters;
pub mod glob;
pub mod gpu;
pub mod regex;
pub mod walker;

#[cfg(not(target_pointer_width = "64"))]
compile_error!("Target architecture is not 64-bit - This software is only supported on 64-bit platforms");
