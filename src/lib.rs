//! Kart Arena Server Library
//!
//! An authoritative real-time kart-combat server using WebTransport.
//! The simulation (items, shells, collisions, timers) lives in [`game`];
//! [`net`] carries sessions, wire encoding and the transport.

pub mod config;
pub mod util;
pub mod game;
pub mod net;
pub mod metrics;
