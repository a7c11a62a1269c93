// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Retransmission Timeout (RTO) calculator.  The base algorithm is RFC 6298; the per-sample
// smoothing factors are scaled by the expected number of samples per window as described in
// RFC 7323, Appendix G, so that taking an RTT sample on every ACK does not shorten the estimator's
// memory.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::engine::config::ConnectionConfig;
use ::std::time::Duration;

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Debug)]
pub struct RtoCalculator {
    // Smoothed round-trip time, in seconds.
    srtt: f64,

    // Round-trip time variation, in seconds.
    rttvar: f64,

    // Current retransmission timeout, in seconds.
    rto: f64,

    // Whether an RTT sample has been taken on this connection yet.
    received_sample: bool,

    // Estimator parameters (see ConnectionConfig).
    alpha: f64,
    beta: f64,
    k: f64,
    granularity: f64,
    lower_bound: f64,
    upper_bound: f64,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl RtoCalculator {
    pub fn new(config: &ConnectionConfig) -> Self {
        // Until the first sample arrives the timeout is the configured initial value; SRTT and
        // RTTVAR hold placeholder values that are never read before then.
        Self {
            srtt: config.get_rto_initial().as_secs_f64(),
            rttvar: 0.0,
            rto: config.get_rto_initial().as_secs_f64(),
            received_sample: false,
            alpha: config.get_alpha(),
            beta: config.get_beta(),
            k: config.get_k() as f64,
            granularity: config.get_clock_granularity().as_secs_f64(),
            lower_bound: config.get_rto_lower_bound().as_secs_f64(),
            upper_bound: config.get_rto_upper_bound().as_secs_f64(),
        }
    }

    /// Folds a new round-trip measurement into the estimator.  `flight_size` and `smss` determine
    /// how many samples one window's worth of data is expected to yield (RFC 7323):
    ///
    /// ```text
    /// ExpectedSamples = ceil(FlightSize / (SMSS * 2))
    /// alpha' = alpha / ExpectedSamples ; beta' = beta / ExpectedSamples
    /// RTTVAR <- (1 - beta') * RTTVAR + beta' * |SRTT - R'|
    /// SRTT   <- (1 - alpha') * SRTT + alpha' * R'
    /// RTO    <- SRTT + max(G, K * RTTVAR)
    /// ```
    pub fn add_sample(&mut self, rtt: Duration, flight_size: u32, smss: usize) {
        let rtt: f64 = rtt.as_secs_f64();

        if !self.received_sample {
            // First measurement (RFC 6298, Section 2.2).
            self.srtt = rtt;
            self.rttvar = rtt / 2.0;
            self.received_sample = true;
        } else {
            let expected_samples: f64 = (flight_size as f64 / (smss as f64 * 2.0)).ceil().max(1.0);
            let alpha: f64 = self.alpha / expected_samples;
            let beta: f64 = self.beta / expected_samples;

            // RTTVAR must be updated with the pre-update SRTT (RFC 6298, Section 2.3).
            self.rttvar = (1.0 - beta) * self.rttvar + beta * (self.srtt - rtt).abs();
            self.srtt = (1.0 - alpha) * self.srtt + alpha * rtt;
        }

        let rto: f64 = self.srtt + self.granularity.max(self.k * self.rttvar);
        self.update_rto(rto);
    }

    /// Updates the stored RTO while keeping it within the configured bounds (RFC 6298 Section 2.4).
    fn update_rto(&mut self, new_rto: f64) {
        self.rto = new_rto.clamp(self.lower_bound, self.upper_bound);
    }

    /// Doubles the current timeout ("backs off the timer", RFC 6298 Section 5.5).  The inflated
    /// value stays in effect until the next round-trip measurement collapses it again.
    pub fn back_off(&mut self) {
        self.update_rto(self.rto * 2.0);
    }

    /// Gets the current RTO value.
    pub fn rto(&self) -> Duration {
        Duration::from_secs_f64(self.rto)
    }

    #[cfg(test)]
    pub fn srtt(&self) -> Duration {
        Duration::from_secs_f64(self.srtt)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
