#![no_std]

pub mod klog;
pub mod testing;

#[doc(hidden)]
pub use paste;

pub use klog::{KlogLevel, klog_get_level, klog_register_backend, klog_set_level};
