#![doc = "drive-sync-core: content synchronisation between Google Drive and GitHub."]

//! This crate holds the data model, service traits and every pipeline stage.
//! Concrete HTTP clients and the CLI live in the `drive-sync` crate.
//!
//! # Usage
//! Build a [`synchronise::SyncServices`] bundle from implementations of the
//! [`contract`] traits and hand it to [`synchronise::synchronise`].

pub mod apply;
pub mod config;
pub mod contract;
pub mod detect;
pub mod download;
pub mod duplicates;
pub mod error;
pub mod git;
pub mod merge;
pub mod metadata;
pub mod status;
pub mod synchronise;
pub mod upload;
pub mod validate;
