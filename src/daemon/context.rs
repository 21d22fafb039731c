// src/daemon/context.rs

//! Bundles the wired-up components a running daemon instance needs, so
//! `daemon::mod::run` and the signal/reload handlers share one thing
//! instead of threading eight `Arc`s through every function signature.

use crate::core::election::FailoverEngine;
use crate::core::events::EventLog;
use crate::core::reload::ConfigHandle;
use crate::core::store::MetadataStoreClient;
use std::path::PathBuf;
use std::sync::Arc;

pub struct DaemonContext {
    pub config_path: PathBuf,
    pub config_handle: ConfigHandle,
    pub engine: Arc<FailoverEngine>,
    pub store: Arc<MetadataStoreClient>,
    pub events: Arc<EventLog>,
    pub peer_port: u16,
}
