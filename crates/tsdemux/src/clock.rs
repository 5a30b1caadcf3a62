//! Clock recovery from PCR samples.
//!
//! Every PCR-carrying PID gets a [`PcrTable`] with two independent views of
//! the same samples:
//!
//! * [`SkewEstimator`] relates PCR time to the arrival time of the bytes
//!   that carried it and smooths network jitter with a windowed low-point
//!   average. Used for live (push) sources.
//! * [`OffsetTracker`] keeps the first and last (PCR, byte offset) pairs
//!   and interpolates between them. Used for seekable (pull) sources, for
//!   duration estimates and for seeking.
//!
//! All internal times are signed nanoseconds so offset corrections can be
//! applied without wrapping; public entry points take and return `u64`.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::config::ClockMode;
use crate::packet::PID_NULL;

/// One second in nanoseconds.
pub const SECOND: i64 = 1_000_000_000;

/// PCR ticks per wrap of the 33-bit base.
pub const PCR_WRAP_TICKS: u64 = (1u64 << 33) * 300;

/// Duration of one PCR wrap in nanoseconds.
pub const PCR_MAX_NS: i64 = (PCR_WRAP_TICKS as i128 * 1000 / 27) as i64;

/// Most samples held in the skew window.
pub const MAX_WINDOW: usize = 512;

/// Longest span of PCR time the skew window covers while filling.
pub const MAX_WINDOW_TIME: i64 = 2 * SECOND;

/// A backwards PCR step larger than this, with an arrival time at hand, is
/// treated as an encoder reset.
pub const RESET_THRESHOLD: i64 = 15 * SECOND;

/// Default bound on `|delta - skew|` before the estimator resyncs.
pub const DEFAULT_DISCONT_THRESHOLD: i64 = SECOND;

/// Convert 27 MHz ticks to nanoseconds.
pub fn pcr_to_ns(pcr: u64) -> u64 {
    (pcr as u128 * 1000 / 27) as u64
}

/// Convert nanoseconds to 27 MHz ticks.
pub fn ns_to_pcr(ns: u64) -> u64 {
    (ns as u128 * 27 / 1000) as u64
}

/// Convert 90 kHz ticks to nanoseconds.
pub fn mpeg_to_ns(ts: u64) -> u64 {
    (ts as u128 * 100_000 / 9) as u64
}

/// How a PCR that went backwards is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackwardJump {
    /// The 33-bit counter wrapped.
    Wraparound,
    /// The encoder restarted its clock.
    Reset,
    /// Sub-second reordering; the sample is used without skew update.
    SmallJitter,
    /// Too large for jitter, too small for a reset; resync the PCR base.
    LargeJitter,
}

/// Classify a PCR that is `drop_ns` below the previous one.
pub fn classify_backward_jump(drop_ns: i64, have_arrival_time: bool) -> BackwardJump {
    if drop_ns > PCR_MAX_NS / 2 {
        BackwardJump::Wraparound
    } else if have_arrival_time && drop_ns > RESET_THRESHOLD {
        BackwardJump::Reset
    } else if drop_ns < SECOND {
        BackwardJump::SmallJitter
    } else {
        BackwardJump::LargeJitter
    }
}

/// Windowed low-point skew estimator for one PCR PID.
#[derive(Debug, Clone)]
pub struct SkewEstimator {
    base_time: Option<i64>,
    base_pcrtime: Option<i64>,
    last_pcrtime: Option<i64>,
    wrap_offset: i64,
    reset_offset: i64,

    window: Vec<i64>,
    window_pos: usize,
    window_size: usize,
    window_min: i64,
    window_filling: bool,
    skew: i64,

    prev_out_time: Option<i64>,
    prev_in_time: Option<i64>,
    prev_send_diff: Option<i64>,

    discont_threshold: i64,
}

impl Default for SkewEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_DISCONT_THRESHOLD)
    }
}

impl SkewEstimator {
    pub fn new(discont_threshold: i64) -> Self {
        SkewEstimator {
            base_time: None,
            base_pcrtime: None,
            last_pcrtime: None,
            wrap_offset: 0,
            reset_offset: 0,
            window: vec![0; MAX_WINDOW],
            window_pos: 0,
            window_size: 0,
            window_min: 0,
            window_filling: true,
            skew: 0,
            prev_out_time: None,
            prev_in_time: None,
            prev_send_diff: None,
            discont_threshold,
        }
    }

    /// Current skew estimate in nanoseconds.
    pub fn skew(&self) -> i64 {
        self.skew
    }

    pub fn base_time(&self) -> Option<i64> {
        self.base_time
    }

    /// Last PCR time, extended over wraps and resets.
    pub fn last_pcrtime(&self) -> Option<i64> {
        self.last_pcrtime
    }

    /// Sum of the offsets applied on PCR wraps and resets.
    pub fn pcr_offset(&self) -> i64 {
        self.wrap_offset + self.reset_offset
    }

    fn resync(&mut self, time: Option<i64>, pcrtime: i64) {
        self.base_time = time;
        self.base_pcrtime = Some(pcrtime);
        self.prev_out_time = None;
        self.prev_send_diff = None;
        self.window_filling = true;
        self.window_pos = 0;
        self.window_min = 0;
        self.window_size = 0;
        self.skew = 0;
    }

    /// Feed one PCR (27 MHz) that arrived at `arrival_ns`, returning the
    /// smoothed local time for it.
    pub fn update(&mut self, pcr: u64, arrival_ns: u64) -> Option<u64> {
        let mut time = Some(arrival_ns as i64);
        let raw = pcr_to_ns(pcr) as i64;
        let mut pcrtime = raw + self.pcr_offset();

        if self.base_time.is_none() {
            self.base_time = time;
            self.prev_out_time = None;
            debug!(base_time = ?time, "taking new base time");
        }
        if self.base_pcrtime.is_none() {
            self.base_pcrtime = Some(pcrtime);
            self.prev_send_diff = None;
            debug!(base_pcrtime = pcrtime, "taking new base pcrtime");
        }
        let base_pcrtime = self.base_pcrtime.unwrap_or(pcrtime);

        let mut send_diff = match self.last_pcrtime {
            Some(last) if pcrtime < last => {
                let drop_ns = last - pcrtime;
                match classify_backward_jump(drop_ns, time.is_some()) {
                    BackwardJump::Wraparound => {
                        debug!("PCR wrap");
                        self.wrap_offset += PCR_MAX_NS;
                        pcrtime = raw + self.pcr_offset();
                        pcrtime - base_pcrtime
                    }
                    BackwardJump::Reset => {
                        let now = arrival_ns as i64;
                        let base_time = self.base_time.unwrap_or(now);
                        self.reset_offset += now - base_time + base_pcrtime - pcrtime;
                        pcrtime = raw + self.pcr_offset();
                        warn!(
                            drop_ms = drop_ns / 1_000_000,
                            offset = self.pcr_offset(),
                            "PCR reset"
                        );
                        pcrtime - base_pcrtime
                    }
                    jump => {
                        if time == self.base_time {
                            debug!("ignoring PCR reset on non fully timestamped stream");
                        } else if jump == BackwardJump::SmallJitter {
                            warn!(drop_ns, "small backward PCR step, ignoring");
                            time = None;
                        } else {
                            warn!(drop_ns, "backward PCR step, resyncing base");
                            self.base_pcrtime = None;
                        }
                        0
                    }
                }
            }
            _ => pcrtime - base_pcrtime,
        };

        self.last_pcrtime = Some(pcrtime);

        if let (Some(now), Some(base_time)) = (time, self.base_time)
            && time != self.prev_in_time
        {
            self.update_window(now, base_time, pcrtime, &mut send_diff);
        }

        let out = match self.base_time {
            Some(base_time) => {
                let mut out = base_time + send_diff;
                if self.skew < 0 && out < -self.skew {
                    out = 0;
                } else {
                    out += self.skew;
                }
                if let (Some(prev_out), Some(prev_send)) = (self.prev_out_time, self.prev_send_diff)
                    && ((send_diff > prev_send && out < prev_out)
                        || (send_diff < prev_send && out > prev_out)
                        || send_diff == prev_send)
                {
                    trace!(out, prev_out, "backwards timestamp, using previous time");
                    out = prev_out;
                }
                Some(out)
            }
            None => time,
        };

        self.prev_out_time = out;
        self.prev_in_time = time;
        self.prev_send_diff = Some(send_diff);
        trace!(skew = self.skew, out = ?out, "skew update");
        out.map(|t| t.max(0) as u64)
    }

    fn update_window(&mut self, time: i64, base_time: i64, pcrtime: i64, send_diff: &mut i64) {
        let recv_diff = time - base_time;
        let mut delta = recv_diff - *send_diff;

        if (delta - self.skew).abs() > self.discont_threshold {
            warn!(delta_minus_skew = delta - self.skew, "skew jump too large, resyncing");
            self.resync(Some(time), pcrtime);
            *send_diff = 0;
            delta = 0;
        }

        let mut pos = self.window_pos;
        if self.window_filling {
            self.window[pos] = delta;
            pos += 1;
            if pos == 1 || delta < self.window_min {
                self.window_min = delta;
            }
            if *send_diff >= MAX_WINDOW_TIME || pos >= MAX_WINDOW {
                self.window_size = pos;
                self.skew = self.window_min;
                self.window_filling = false;
                debug!(min = self.window_min, "skew window filled");
            } else {
                let perc_time = *send_diff * 100 / MAX_WINDOW_TIME;
                let perc_window = (pos * 100 / MAX_WINDOW) as i64;
                let perc = perc_time.max(perc_window);
                let perc = perc * perc;
                self.skew = (perc * self.window_min + (10000 - perc) * self.skew) / 10000;
                self.window_size = pos + 1;
            }
        } else {
            let old = self.window[pos];
            self.window[pos] = delta;
            pos += 1;
            if delta <= self.window_min {
                self.window_min = delta;
            } else if old == self.window_min {
                let mut min = i64::MAX;
                for &value in &self.window[..self.window_size] {
                    if value == old {
                        min = old;
                        break;
                    }
                    min = min.min(value);
                }
                self.window_min = min;
            }
            self.skew = (self.window_min + 124 * self.skew) / 125;
        }
        if pos >= self.window_size {
            pos = 0;
        }
        self.window_pos = pos;
    }
}

/// A recorded (PCR, byte offset) observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcrOffset {
    /// PCR in 27 MHz ticks, extended across wraps
    pub pcr: u64,
    pub offset: u64,
}

/// First/last PCR positions of one PID for offset-time interpolation.
#[derive(Debug, Clone, Default)]
pub struct OffsetTracker {
    first: Option<PcrOffset>,
    last: Option<PcrOffset>,
    last_raw: u64,
    wraps: u64,
    /// Ticks added to bridge encoder clock restarts
    reset_ticks: u64,
    observations: usize,
}

impl OffsetTracker {
    /// Record a PCR seen at `offset`. Observations before the first one or
    /// not beyond the last one carry no new information and are skipped.
    pub fn record(&mut self, pcr: u64, offset: u64) {
        let (Some(first), Some(last)) = (self.first, self.last) else {
            let sample = PcrOffset { pcr, offset };
            self.first = Some(sample);
            self.last = Some(sample);
            self.last_raw = pcr;
            self.observations = 1;
            return;
        };
        if offset < first.offset || offset <= last.offset {
            return;
        }
        if pcr < self.last_raw {
            let drop = self.last_raw - pcr;
            if drop > PCR_WRAP_TICKS / 2 {
                self.wraps += 1;
                debug!(offset, "PCR wrap between offset observations");
            } else {
                // continue from the last PCR at the byte rate seen so far
                let gap = rate_gap(first, last, offset - last.offset);
                self.reset_ticks += drop + gap;
                warn!(
                    offset,
                    drop_ms = pcr_to_ns(drop) / 1_000_000,
                    "PCR reset between offset observations"
                );
            }
        }
        self.last_raw = pcr;
        self.last = Some(PcrOffset {
            pcr: pcr + self.wraps * PCR_WRAP_TICKS + self.reset_ticks,
            offset,
        });
        self.observations += 1;
    }

    pub fn first(&self) -> Option<PcrOffset> {
        self.first
    }

    pub fn last(&self) -> Option<PcrOffset> {
        self.last
    }

    pub fn observations(&self) -> usize {
        self.observations
    }

    /// Stream time of a byte offset relative to `refoffset`.
    pub fn offset_to_ts(&self, offset: u64, refoffset: u64) -> Option<u64> {
        let (first, last) = (self.first?, self.last?);
        if offset < refoffset {
            return None;
        }
        let lastpcr = last.pcr.checked_sub(first.pcr)?;
        let lastoffset = last.offset.checked_sub(refoffset)?;
        if lastoffset == 0 {
            return None;
        }
        let pcr = (offset - refoffset) as u128 * lastpcr as u128 / lastoffset as u128;
        Some(pcr_to_ns(pcr as u64))
    }

    /// Byte offset at which stream time `ts_ns` is expected.
    pub fn ts_to_offset(&self, ts_ns: u64) -> Option<u64> {
        let (first, last) = (self.first?, self.last?);
        let query = ns_to_pcr(ts_ns);
        let span_pcr = last.pcr.checked_sub(first.pcr)?;
        let span_offset = last.offset.checked_sub(first.offset)?;
        if span_pcr == 0 {
            return Some(first.offset);
        }
        let delta = query as u128 * span_offset as u128 / span_pcr as u128;
        first.offset.checked_add(u64::try_from(delta).ok()?)
    }

    /// Stream time of an extended PTS (nanoseconds) relative to the first
    /// PCR.
    pub fn pts_to_ts(&self, pts_ns: u64) -> Option<u64> {
        let first_ns = pcr_to_ns(self.first?.pcr);
        let mut pts = pts_ns;
        if pts < first_ns {
            // only treat as a wrap when clearly before the first PCR
            if first_ns - pts > SECOND as u64 {
                pts += PCR_MAX_NS as u64;
            } else {
                return None;
            }
        }
        Some(pts - first_ns)
    }
}

/// PCR ticks expected over `bytes` at the rate between `first` and `last`.
fn rate_gap(first: PcrOffset, last: PcrOffset, bytes: u64) -> u64 {
    let span_offset = last.offset.saturating_sub(first.offset);
    if span_offset == 0 {
        return 0;
    }
    let span_pcr = last.pcr.saturating_sub(first.pcr);
    (bytes as u128 * span_pcr as u128 / span_offset as u128) as u64
}

/// Clock state for one PCR PID.
#[derive(Debug, Clone)]
pub struct PcrTable {
    pub skew: SkewEstimator,
    pub offsets: OffsetTracker,
}

impl PcrTable {
    fn new(discont_threshold: i64) -> Self {
        PcrTable {
            skew: SkewEstimator::new(discont_threshold),
            offsets: OffsetTracker::default(),
        }
    }
}

/// All PCR tables of a stream plus the conversions built on them.
#[derive(Debug, Clone)]
pub struct PcrClock {
    tables: HashMap<u16, PcrTable>,
    mode: ClockMode,
    discont_threshold: i64,
    refoffset: Option<u64>,
}

impl PcrClock {
    pub fn new(mode: ClockMode, discont_threshold: i64) -> Self {
        PcrClock {
            tables: HashMap::new(),
            mode,
            discont_threshold,
            refoffset: None,
        }
    }

    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ClockMode) {
        self.mode = mode;
    }

    fn table_mut(&mut self, pid: u16) -> &mut PcrTable {
        let threshold = self.discont_threshold;
        self.tables
            .entry(pid)
            .or_insert_with(|| PcrTable::new(threshold))
    }

    pub fn table(&self, pid: u16) -> Option<&PcrTable> {
        self.tables.get(&pid)
    }

    /// PIDs that carried at least one PCR, lowest first.
    pub fn pids(&self) -> Vec<u16> {
        let mut pids: Vec<u16> = self
            .tables
            .iter()
            .filter(|(_, t)| t.offsets.observations() > 0)
            .map(|(&pid, _)| pid)
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Offset observations kept across all PIDs.
    pub fn observations(&self) -> usize {
        self.tables.values().map(|t| t.offsets.observations()).sum()
    }

    /// Record a PCR seen on `pid` at byte `offset`.
    pub fn observe(&mut self, pid: u16, pcr: u64, offset: u64, arrival_ns: Option<u64>) {
        let mode = self.mode;
        let table = self.table_mut(pid);
        if mode == ClockMode::Skew
            && let Some(arrival) = arrival_ns
        {
            table.skew.update(pcr, arrival);
        }
        table.offsets.record(pcr, offset);
    }

    pub fn set_reference_offset(&mut self, offset: u64) {
        debug!(offset, "setting reference offset");
        self.refoffset = Some(offset);
    }

    pub fn reference_offset(&self) -> Option<u64> {
        self.refoffset
    }

    pub fn offset_to_ts(&self, offset: u64, pid: u16) -> Option<u64> {
        let refoffset = self.refoffset?;
        self.tables.get(&pid)?.offsets.offset_to_ts(offset, refoffset)
    }

    pub fn ts_to_offset(&self, ts_ns: u64, pid: u16) -> Option<u64> {
        self.tables.get(&pid)?.offsets.ts_to_offset(ts_ns)
    }

    /// Convert an extended PTS/DTS (nanoseconds) into output time using the
    /// clock of `pcr_pid`.
    pub fn pts_to_ts(&mut self, pts_ns: u64, pcr_pid: u16, last_in_time: Option<u64>) -> Option<u64> {
        let mode = self.mode;
        let table = self.table_mut(pcr_pid);

        if table.skew.base_time.is_none()
            && pcr_pid == PID_NULL
            && let Some(time) = last_in_time
        {
            table.skew.base_time = Some(time as i64);
            table.skew.base_pcrtime = Some(pts_ns as i64);
        }

        if mode == ClockMode::Skew
            && let Some(base_time) = table.skew.base_time
        {
            return skew_pts_to_ts(&table.skew, pts_ns, base_time, pcr_pid);
        }
        table.offsets.pts_to_ts(pts_ns)
    }

    /// Forget arrival-time state that does not survive a discontinuity.
    pub fn reset_arrival_base(&mut self) {
        if let Some(table) = self.tables.get_mut(&PID_NULL) {
            table.skew.base_time = None;
        }
    }

    /// Drop every observation.
    pub fn clear(&mut self) {
        self.tables.clear();
        self.refoffset = None;
    }
}

fn skew_pts_to_ts(skew: &SkewEstimator, pts_ns: u64, base_time: i64, pcr_pid: u16) -> Option<u64> {
    let mut res = pts_ns as i64 + skew.reset_offset;

    if pcr_pid != PID_NULL
        && let Some(last) = skew.last_pcrtime
    {
        // keep the PTS in the same wrap period as the PCR it is compared to
        while res - last > PCR_MAX_NS / 2 {
            res -= PCR_MAX_NS;
        }
        while last - res > PCR_MAX_NS / 2 {
            res += PCR_MAX_NS;
        }
        if (res - last).abs() > RESET_THRESHOLD {
            trace!(pts = res, last_pcr = last, "PTS too far from last PCR");
            return None;
        }
    }

    let base_pcrtime = skew.base_pcrtime?;
    let tmp = base_time + skew.skew;
    if tmp + res >= base_pcrtime {
        res += tmp - base_pcrtime;
    } else if (tmp + res + PCR_MAX_NS - base_pcrtime).abs() < PCR_MAX_NS / 2 {
        res += tmp + PCR_MAX_NS - base_pcrtime;
    } else {
        return None;
    }
    Some(res.max(0) as u64)
}
