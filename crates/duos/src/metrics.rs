//! Metric recording helpers.
//!
//! Thin wrappers over the `metrics` facade. Without an installed recorder
//! every call is a no-op, which is what the tests rely on.

/// Connection count gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("duos_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("duos_connections_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Count one classified inbound payload.
    pub fn payloads_total(kind: &'static str) {
        metrics::counter!("duos_payloads_total", "kind" => kind).increment(1);
    }

    /// Record bytes relayed in the given direction.
    pub fn payload_bytes_total(direction: &'static str, bytes: u64) {
        metrics::counter!("duos_payload_bytes_total", "direction" => direction).increment(bytes);
    }

    /// Count one failed write during fan-out.
    pub fn fanout_failures_total() {
        metrics::counter!("duos_fanout_failures_total").increment(1);
    }

    /// Count a connection dropped because the relay was full.
    pub fn connections_rejected_total() {
        metrics::counter!("duos_connections_rejected_total").increment(1);
    }

    /// Count a shutdown with the given reason label.
    pub fn shutdowns_total(reason: &'static str) {
        metrics::counter!("duos_shutdowns_total", "reason" => reason).increment(1);
    }
}
