//! This module exports a minimal message-passing API, which is encapsulated
//! by a `Communicator` trait. Implementors only need to write `send` and
//! `recv` operations for a given transport layer (a serial and an
//! in-process channel transport are included). The trait then provides
//! default implementations for broadcast, reduce, all-reduce, all-gather and
//! a sparse tagged exchange. The AMR engine gathers block metadata with
//! all-gather, and moves ghost slabs and donor blocks with the exchange.
//!

pub mod comm;
pub mod local;
pub mod util;
