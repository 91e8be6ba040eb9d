//! Whole-kernel scenarios on the hosted port.
//!
//! Each test boots its own leaked [`Kernel`](crate::Kernel) and adopts the
//! test thread as the running thread, so tests never share scheduler state.

mod helpers;
mod scenarios;
