//! Operations available inside mapped function bodies.
//!
//! Each operation is an [`Op`](crate::programs::Op) that can be recorded in a program, plus a [`Tracer`] method (or a
//! free function for nullary operations) that records it in the innermost active trace.
//!
//! [`Tracer`]: crate::tracer::Tracer

pub mod arithmetic;
pub mod collectives;
pub mod constants;
pub mod reductions;
pub mod shape;
