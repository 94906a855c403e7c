use tablesync_state::MeasuredMetrics;

/// Network profile for simulated clients
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkConditions {
    /// Packet loss fraction (0.0 to 1.0)
    pub packet_loss: f64,
    /// Base latency in milliseconds
    pub latency_ms: f64,
    /// Latency jitter in milliseconds
    pub jitter_ms: f64,
    /// Bandwidth in bits per second
    pub bandwidth_bps: f64,
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self::lan()
    }
}

impl NetworkConditions {
    /// Same building, fast wired link
    pub fn lan() -> Self {
        Self {
            packet_loss: 0.0,
            latency_ms: 5.0,
            jitter_ms: 1.0,
            bandwidth_bps: 100_000_000.0,
        }
    }

    /// Typical home broadband
    pub fn broadband() -> Self {
        Self {
            packet_loss: 0.005,
            latency_ms: 40.0,
            jitter_ms: 6.0,
            bandwidth_bps: 20_000_000.0,
        }
    }

    /// Typical mobile network (3G/4G)
    pub fn mobile() -> Self {
        Self {
            packet_loss: 0.02,
            latency_ms: 150.0,
            jitter_ms: 50.0,
            bandwidth_bps: 1_000_000.0,
        }
    }

    /// Poor network conditions
    pub fn poor() -> Self {
        Self {
            packet_loss: 0.10,
            latency_ms: 500.0,
            jitter_ms: 200.0,
            bandwidth_bps: 56_000.0,
        }
    }

    /// The exact profile, no noise
    pub fn measurement(&self) -> MeasuredMetrics {
        MeasuredMetrics::new(self.latency_ms, self.jitter_ms, self.packet_loss)
            .with_bandwidth(self.bandwidth_bps)
    }
}
