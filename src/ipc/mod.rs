//! Control surface over a Unix socket.
//!
//! Lets a menu-bar helper or a script connect, disconnect, toggle and query
//! the channel with newline-delimited JSON; see [`listener`].

pub mod listener;
