//! Core data models for the resource service.
//!
//! Paths, versions, stored objects and their access-control lists. Every
//! object kind shares the same [`object::Object`] representation; kind
//! specific rules (group members, account passwords) sit in small helpers.

pub mod epoch;
pub mod group;
pub mod object;
pub mod path;
pub mod permissions;
