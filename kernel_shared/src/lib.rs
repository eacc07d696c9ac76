#![cfg_attr(not(test), no_std)]
extern crate alloc;
extern crate core;

pub mod board;
pub mod bugcheck;
pub mod config;
pub mod constants;
pub mod error;
pub mod object;
pub mod services;
pub mod thread;
pub mod time;
