//! Parameters for the motor board executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the motor board executable.
#[derive(Debug, Clone, Deserialize)]
pub struct MotorExecParams {
    /// Name advertised on the beacon socket
    pub name: String,

    /// Endpoint the beacon (advertisement) socket binds to
    pub beacon_endpoint: String,

    /// Endpoint the data socket binds to
    pub data_endpoint: String,

    /// Data endpoint as seen from the controller, placed in advertisements
    pub advertised_data_endpoint: String,

    /// Interval between advertisements in seconds
    pub advertise_interval_s: f64,

    /// Signal strength reported in advertisements, in dBm
    pub reported_rssi_dbm: i16,

    /// Maximum single-write size accepted on the data socket. Longer frames
    /// must arrive chunked.
    pub max_write_len: usize,

    /// Receive timeout on the data socket in milliseconds. Sets the cadence
    /// of the main loop.
    pub data_recv_timeout_ms: i32,

    /// Whether the watchdog is enabled at boot
    pub watchdog_enabled: bool,

    /// Watchdog timeout at boot, in seconds
    pub watchdog_timeout_s: f64,

    /// Period of the watchdog tick thread in milliseconds
    pub watchdog_tick_ms: u64,
}
