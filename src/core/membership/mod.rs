// src/core/membership/mod.rs

//! Membership and ownership arbitration via a consistent-hash ring.

pub mod ring;

pub use ring::MembershipRing;
