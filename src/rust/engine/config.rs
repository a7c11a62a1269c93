// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::engine::constants::{DEFAULT_MSS, DEFAULT_RECEIVE_BUFFER_SIZE, MAX_MSS, MIN_MSS, MSL};
use ::std::time::Duration;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Connection Configuration Descriptor
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Issue the handshake ourselves (active open) or wait for the peer (passive open)?
    active_open: bool,
    /// Advertised Maximum Segment Size
    advertised_mss: usize,
    /// Capacity of the receive (reassembly) buffer in bytes.
    receive_buffer_size: u32,
    /// Maximum Segment Lifetime; TIME-WAIT lingers for twice this.
    msl: Duration,
    /// Disable the Nagle algorithm and send eagerly whenever window is available?
    no_delay: bool,
    /// How long the Nagle algorithm may delay small segments at most.
    override_timeout: Duration,
    /// Nagle fraction: a sender with nothing in flight may also transmit once at least
    /// `fs * max_snd_wnd` bytes are ready.  RFC 9293 recommends 1/2.
    fs: f64,
    /// How long a handshake or unacknowledged data may remain outstanding before the connection
    /// is aborted.
    user_timeout: Duration,
    /// Negotiate the timestamps option for round-trip time measurement?
    timestamps: bool,
    /// Retransmission timeout before the first round-trip measurement.
    rto_initial: Duration,
    /// Lower bound for the retransmission timeout.
    rto_lower_bound: Duration,
    /// Upper bound for the retransmission timeout.
    rto_upper_bound: Duration,
    /// Smoothing factor for the round-trip estimator (RFC 6298 suggests 1/8).
    alpha: f64,
    /// Variance factor for the round-trip estimator (RFC 6298 suggests 1/4).
    beta: f64,
    /// Variance weight in the timeout computation (RFC 6298 suggests 4).
    k: u32,
    /// Granularity of the clock feeding the round-trip estimator.
    clock_granularity: Duration,
    /// Distinguish partial from full acknowledgments during fast recovery (RFC 6582)?
    new_reno: bool,
    /// Send new data on the first two duplicate ACKs (RFC 3042)?
    limited_transmit: bool,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl ConnectionConfig {
    /// Gets whether this endpoint issues the handshake itself.
    pub fn get_active_open(&self) -> bool {
        self.active_open
    }

    /// Gets the advertised maximum segment size.
    pub fn get_advertised_mss(&self) -> usize {
        self.advertised_mss
    }

    /// Gets the receive buffer capacity.
    pub fn get_receive_buffer_size(&self) -> u32 {
        self.receive_buffer_size
    }

    /// Gets the maximum segment lifetime.
    pub fn get_msl(&self) -> Duration {
        self.msl
    }

    /// Gets whether the Nagle algorithm is disabled.
    pub fn get_no_delay(&self) -> bool {
        self.no_delay
    }

    /// Gets the Nagle override timeout.
    pub fn get_override_timeout(&self) -> Duration {
        self.override_timeout
    }

    /// Gets the Nagle fraction.
    pub fn get_fs(&self) -> f64 {
        self.fs
    }

    /// Gets the user timeout.
    pub fn get_user_timeout(&self) -> Duration {
        self.user_timeout
    }

    /// Gets whether the timestamps option is negotiated.
    pub fn get_timestamps(&self) -> bool {
        self.timestamps
    }

    /// Gets the initial retransmission timeout.
    pub fn get_rto_initial(&self) -> Duration {
        self.rto_initial
    }

    /// Gets the lower bound of the retransmission timeout.
    pub fn get_rto_lower_bound(&self) -> Duration {
        self.rto_lower_bound
    }

    /// Gets the upper bound of the retransmission timeout.
    pub fn get_rto_upper_bound(&self) -> Duration {
        self.rto_upper_bound
    }

    /// Gets the round-trip estimator smoothing factor.
    pub fn get_alpha(&self) -> f64 {
        self.alpha
    }

    /// Gets the round-trip estimator variance factor.
    pub fn get_beta(&self) -> f64 {
        self.beta
    }

    /// Gets the round-trip variance weight.
    pub fn get_k(&self) -> u32 {
        self.k
    }

    /// Gets the estimator clock granularity.
    pub fn get_clock_granularity(&self) -> Duration {
        self.clock_granularity
    }

    /// Gets whether NewReno fast recovery is enabled.
    pub fn get_new_reno(&self) -> bool {
        self.new_reno
    }

    /// Gets whether limited transmit is enabled.
    pub fn get_limited_transmit(&self) -> bool {
        self.limited_transmit
    }

    /// Sets whether this endpoint issues the handshake itself.
    pub fn set_active_open(mut self, value: bool) -> Self {
        self.active_open = value;
        self
    }

    /// Sets the advertised maximum segment size.
    pub fn set_advertised_mss(mut self, value: usize) -> Self {
        assert!(value >= MIN_MSS);
        assert!(value <= MAX_MSS);
        self.advertised_mss = value;
        self
    }

    /// Sets the receive buffer capacity.
    pub fn set_receive_buffer_size(mut self, value: u32) -> Self {
        assert!(value > 0);
        self.receive_buffer_size = value;
        self
    }

    /// Sets the maximum segment lifetime.
    pub fn set_msl(mut self, value: Duration) -> Self {
        assert!(value > Duration::new(0, 0));
        self.msl = value;
        self
    }

    /// Sets whether the Nagle algorithm is disabled.
    pub fn set_no_delay(mut self, value: bool) -> Self {
        self.no_delay = value;
        self
    }

    /// Sets the Nagle override timeout.  RFC 9293 wants this in the 0.1 - 1.0 second range.
    pub fn set_override_timeout(mut self, value: Duration) -> Self {
        assert!(value >= Duration::from_millis(100));
        assert!(value <= Duration::from_secs(1));
        self.override_timeout = value;
        self
    }

    /// Sets the Nagle fraction.
    pub fn set_fs(mut self, value: f64) -> Self {
        assert!(value > 0.0 && value <= 1.0);
        self.fs = value;
        self
    }

    /// Sets the user timeout.
    pub fn set_user_timeout(mut self, value: Duration) -> Self {
        assert!(value > Duration::new(0, 0));
        self.user_timeout = value;
        self
    }

    /// Sets whether the timestamps option is negotiated.
    pub fn set_timestamps(mut self, value: bool) -> Self {
        self.timestamps = value;
        self
    }

    /// Sets the initial retransmission timeout.
    pub fn set_rto_initial(mut self, value: Duration) -> Self {
        assert!(value > Duration::new(0, 0));
        self.rto_initial = value;
        self
    }

    /// Sets the bounds of the retransmission timeout.
    pub fn set_rto_bounds(mut self, lower: Duration, upper: Duration) -> Self {
        assert!(lower > Duration::new(0, 0));
        assert!(upper >= lower);
        self.rto_lower_bound = lower;
        self.rto_upper_bound = upper;
        self
    }

    /// Sets the round-trip estimator factors.
    pub fn set_rtt_factors(mut self, alpha: f64, beta: f64, k: u32) -> Self {
        assert!(alpha > 0.0 && alpha < 1.0);
        assert!(beta > 0.0 && beta < 1.0);
        assert!(k > 0);
        self.alpha = alpha;
        self.beta = beta;
        self.k = k;
        self
    }

    /// Sets whether NewReno fast recovery is enabled.
    pub fn set_new_reno(mut self, value: bool) -> Self {
        self.new_reno = value;
        self
    }

    /// Sets whether limited transmit is enabled.
    pub fn set_limited_transmit(mut self, value: bool) -> Self {
        self.limited_transmit = value;
        self
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default Trait Implementation for the Connection Configuration Descriptor
impl Default for ConnectionConfig {
    /// Creates a Connection Configuration Descriptor with the default values.
    fn default() -> Self {
        ConnectionConfig {
            active_open: true,
            advertised_mss: DEFAULT_MSS,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            msl: MSL,
            no_delay: false,
            override_timeout: Duration::from_millis(100),
            fs: 0.5,
            user_timeout: Duration::from_secs(60),
            timestamps: false,
            rto_initial: Duration::from_secs(1),
            rto_lower_bound: Duration::from_secs(1),
            rto_upper_bound: Duration::from_secs(60),
            alpha: 0.125,
            beta: 0.25,
            k: 4,
            clock_granularity: Duration::from_millis(1),
            new_reno: true,
            limited_transmit: true,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use crate::engine::{config::ConnectionConfig, constants::DEFAULT_MSS};
    use ::anyhow::Result;
    use ::std::time::Duration;

    /// Tests default instantiation for [ConnectionConfig].
    #[test]
    fn test_connection_config_default() -> Result<()> {
        let config: ConnectionConfig = ConnectionConfig::default();
        crate::ensure_eq!(config.get_active_open(), true);
        crate::ensure_eq!(config.get_advertised_mss(), DEFAULT_MSS);
        crate::ensure_eq!(config.get_receive_buffer_size(), 65_535);
        crate::ensure_eq!(config.get_no_delay(), false);
        crate::ensure_eq!(config.get_override_timeout(), Duration::from_millis(100));
        crate::ensure_eq!(config.get_user_timeout(), Duration::from_secs(60));
        crate::ensure_eq!(config.get_rto_initial(), Duration::from_secs(1));
        crate::ensure_eq!(config.get_new_reno(), true);
        crate::ensure_eq!(config.get_limited_transmit(), true);

        Ok(())
    }

    /// Tests that the chainable setters validate and apply.
    #[test]
    fn test_connection_config_setters() -> Result<()> {
        let config: ConnectionConfig = ConnectionConfig::default()
            .set_active_open(false)
            .set_advertised_mss(536)
            .set_no_delay(true)
            .set_msl(Duration::from_millis(50));
        crate::ensure_eq!(config.get_active_open(), false);
        crate::ensure_eq!(config.get_advertised_mss(), 536);
        crate::ensure_eq!(config.get_no_delay(), true);
        crate::ensure_eq!(config.get_msl(), Duration::from_millis(50));

        Ok(())
    }
}
