#![doc = include_str!("../README.md")]
#![no_std]

pub mod amd64;
mod assembler;

extern crate alloc;

pub use crate::assembler::{Assembler, EncInst, Instruction, Label};
