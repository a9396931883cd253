//! rrdkit archive hub.
pub mod hub;
