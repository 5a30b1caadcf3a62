use std::time::Duration;

/// How PCR samples are turned into output time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockMode {
    /// Smooth PCR against arrival times (live sources).
    #[default]
    Skew,
    /// Interpolate between recorded PCR/offset pairs (seekable sources).
    Offset,
}

/// Demuxer configuration
#[derive(Debug, Clone)]
pub struct DemuxConfig {
    /// Only expose this program; `None` exposes every program
    pub program_number: Option<u16>,
    /// Report per-unit statistics to the sink
    pub emit_statistics: bool,
    /// Clock recovery mode
    pub clock_mode: ClockMode,
    /// Largest skew change tolerated before the estimator resyncs
    pub pcr_discont_threshold: Duration,
    /// Verify section CRCs
    pub check_crc: bool,
    /// Treat private-section streams as PSI and emit their sections
    pub parse_private_sections: bool,
    /// Ignore PCR and derive times from arrival timestamps only
    pub ignore_pcr: bool,
    /// Bytes discarded during packet size discovery before giving up
    pub discovery_limit: usize,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            program_number: None,
            emit_statistics: false,
            clock_mode: ClockMode::Skew,
            pcr_discont_threshold: Duration::from_secs(1),
            check_crc: true,
            parse_private_sections: true,
            ignore_pcr: false,
            discovery_limit: 10 * 65536,
        }
    }
}

impl DemuxConfig {
    pub fn with_program_number(mut self, program_number: u16) -> Self {
        self.program_number = Some(program_number);
        self
    }

    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.emit_statistics = enabled;
        self
    }

    pub fn with_clock_mode(mut self, mode: ClockMode) -> Self {
        self.clock_mode = mode;
        self
    }

    pub fn with_pcr_discont_threshold(mut self, threshold: Duration) -> Self {
        self.pcr_discont_threshold = threshold;
        self
    }

    pub fn with_crc_check(mut self, enabled: bool) -> Self {
        self.check_crc = enabled;
        self
    }

    pub fn with_private_sections(mut self, enabled: bool) -> Self {
        self.parse_private_sections = enabled;
        self
    }

    pub fn with_ignore_pcr(mut self, ignore: bool) -> Self {
        self.ignore_pcr = ignore;
        self
    }

    pub fn with_discovery_limit(mut self, bytes: usize) -> Self {
        self.discovery_limit = bytes;
        self
    }

    /// Whether units of `program_number` should reach the sink.
    pub fn wants_program(&self, program_number: u16) -> bool {
        self.program_number.is_none_or(|n| n == program_number)
    }

    pub(crate) fn discont_threshold_ns(&self) -> i64 {
        i64::try_from(self.pcr_discont_threshold.as_nanos()).unwrap_or(i64::MAX)
    }
}
