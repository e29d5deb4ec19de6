//! Compile-time configuration.
//!
//! `trouble-controller` has some configuration settings that are set at compile time.
//!
//! They can be set in two ways:
//!
//! - Via Cargo features: enable a feature like `<name>-<value>`. `name` must be in lowercase and
//!   use dashes instead of underscores. For example. `pdu-pool-size-32`. Only a selection of values
//!   is available, check `Cargo.toml` for the list.
//! - Via environment variables at build time: set the variable named `TROUBLE_CONTROLLER_<value>`. For example
//!   `TROUBLE_CONTROLLER_PDU_POOL_SIZE=24 cargo build`. You can also set them in the `[env]` section of `.cargo/config.toml`.
//!   Any value can be set, unlike with Cargo features.
//!
//! Environment variables take precedence over Cargo features. If two Cargo features are enabled for the same setting
//! with different values, compilation fails.

mod raw {
    #![allow(unused)]
    include!(concat!(env!("OUT_DIR"), "/config.rs"));
}

/// Advertising PDU pool size
///
/// Number of advertising PDU buffers shared by every primary, auxiliary and periodic PDU chain,
/// both halves of their double buffers included.
///
/// Default: 16.
pub const PDU_POOL_SIZE: usize = raw::PDU_POOL_SIZE;

/// Number of advertising sets.
///
/// Default: 2.
pub const ADV_SET_COUNT: usize = raw::ADV_SET_COUNT;

/// Number of broadcast isochronous groups.
///
/// Default: 1.
pub const ADV_ISO_SET_COUNT: usize = raw::ADV_ISO_SET_COUNT;

/// Number of broadcast isochronous streams, shared by all groups.
///
/// Default: 2.
pub const ADV_ISO_STREAM_COUNT: usize = raw::ADV_ISO_STREAM_COUNT;

/// Number of connections
///
/// Only reserves ticker identifiers, the free slot search treats connection events as occupied time.
///
/// Default: 2.
pub const CONN_COUNT: usize = raw::CONN_COUNT;

/// Mayfly queue size
///
/// Depth of each deferred call queue (radio, upper link layer high and low priority).
///
/// Default: 8.
pub const MAYFLY_QUEUE_SIZE: usize = raw::MAYFLY_QUEUE_SIZE;

/// Maximum advertising data length per set, after reassembly of host fragments.
///
/// Default: 1650.
pub const ADV_DATA_LEN_MAX: usize = raw::ADV_DATA_LEN_MAX;

/// Ticker job spin limit
///
/// How many times a busy ticker operation gets its job scheduled before the free slot search gives up.
///
/// Default: 64.
pub const TICKER_JOB_SPIN_MAX: usize = raw::TICKER_JOB_SPIN_MAX;
