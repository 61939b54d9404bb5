//! External IP discovery by racing "echo my IP" endpoints.
//!
//! [`race::Race`] probes every candidate at once and keeps the first usable
//! answer; [`scorer::EndpointScorer`] remembers which endpoints win so later
//! races list them first.

pub mod app;
pub mod config;
pub mod geoip;
pub mod net;
pub mod probe;
pub mod race;
pub mod scorer;
pub mod state;
