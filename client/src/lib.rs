//! # Chat Client Library
//!
//! Terminal client for the chat broker. Maintains the TCP connection,
//! decodes broker packets into printable lines, and turns stdin input
//! into protocol packets (`/name`, `/img`, plain messages).

pub mod network;
