//! Program and stream bookkeeping.
//!
//! The registry follows the PAT and the PMTs of a transport stream. It
//! decides which PIDs carry PSI sections and which carry PES payload, and
//! reports program activation changes as [`ProgramEvent`]s for the demuxer
//! to act on.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use crate::packet::{
    PID_ATSC_PSIP, PID_CAT, PID_EIT, PID_IPMP, PID_NETWORK_SYNC, PID_NIT, PID_NULL, PID_PAT,
    PID_SDT, PID_SPACE, PID_TDT, PID_TSDT,
};
use crate::tables::{Eit, Pat, Pmt, StreamType};
use crate::{Result, TsError};

/// PIDs treated as PSI before any table has been seen.
pub const DEFAULT_PSI_PIDS: [u16; 10] = [
    PID_PAT,
    PID_CAT,
    PID_TSDT,
    PID_IPMP,
    PID_NIT,
    PID_SDT,
    PID_EIT,
    PID_TDT,
    PID_NETWORK_SYNC,
    PID_ATSC_PSIP,
];

/// Fixed-size set of PIDs.
#[derive(Clone, PartialEq, Eq)]
pub struct PidSet {
    bits: [u64; PID_SPACE / 64],
}

impl Default for PidSet {
    fn default() -> Self {
        PidSet {
            bits: [0; PID_SPACE / 64],
        }
    }
}

impl std::fmt::Debug for PidSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl PidSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn contains(&self, pid: u16) -> bool {
        let pid = (pid & 0x1FFF) as usize;
        self.bits[pid / 64] & (1 << (pid % 64)) != 0
    }

    #[inline]
    pub fn insert(&mut self, pid: u16) {
        let pid = (pid & 0x1FFF) as usize;
        self.bits[pid / 64] |= 1 << (pid % 64);
    }

    #[inline]
    pub fn remove(&mut self, pid: u16) {
        let pid = (pid & 0x1FFF) as usize;
        self.bits[pid / 64] &= !(1 << (pid % 64));
    }

    pub fn clear(&mut self) {
        self.bits = [0; PID_SPACE / 64];
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (0..PID_SPACE as u16).filter(|&pid| self.contains(pid))
    }
}

/// One PID of a program.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    pub pid: u16,
    /// `None` for a PID that only carries the PCR
    pub stream_type: Option<StreamType>,
    pub registration_id: Option<u32>,
    pub program_number: u16,
    /// Carries private sections instead of PES
    pub private_sections: bool,
}

/// Metadata gathered from the event information table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramTags {
    pub event_id: Option<u16>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
}

/// A program announced in the PAT.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub program_number: u16,
    pub pmt_pid: u16,
    /// 0x1FFF until a PMT was applied, or when PCR is ignored
    pub pcr_pid: u16,
    pub registration_id: Option<u32>,
    /// Number of PATs currently referencing the program
    pub patcount: u32,
    pub active: bool,
    pub streams: Vec<Stream>,
    pub pmt: Option<Pmt>,
    pub tags: ProgramTags,
}

impl Program {
    fn new(program_number: u16, pmt_pid: u16) -> Self {
        Program {
            program_number,
            pmt_pid,
            pcr_pid: PID_NULL,
            registration_id: None,
            patcount: 0,
            active: false,
            streams: Vec::new(),
            pmt: None,
            tags: ProgramTags::default(),
        }
    }

    pub fn stream(&self, pid: u16) -> Option<&Stream> {
        self.streams.iter().find(|s| s.pid == pid)
    }

    pub fn has_pid(&self, pid: u16) -> bool {
        self.stream(pid).is_some()
    }

    /// Streams carrying PES payload, the PCR-only PID included.
    pub fn pes_streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter().filter(|s| !s.private_sections)
    }
}

/// Program lifecycle changes produced by applying a table.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramEvent {
    /// The program became active. Carries a snapshot with its streams.
    Started(Program),
    /// The program was deactivated. The snapshot still lists the streams
    /// it had.
    Stopped(Program),
    /// Section state kept for this PID should be dropped.
    PidReleased(u16),
}

/// Programs and PID roles of one transport stream.
#[derive(Debug, Clone)]
pub struct Registry {
    programs: BTreeMap<u16, Program>,
    pat: Option<Pat>,
    known_psi: PidSet,
    is_pes: PidSet,
    seen_pat: bool,
    ignore_pcr: bool,
    parse_private_sections: bool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(false, true)
    }
}

impl Registry {
    pub fn new(ignore_pcr: bool, parse_private_sections: bool) -> Self {
        let mut registry = Registry {
            programs: BTreeMap::new(),
            pat: None,
            known_psi: PidSet::new(),
            is_pes: PidSet::new(),
            seen_pat: false,
            ignore_pcr,
            parse_private_sections,
        };
        registry.reset();
        registry
    }

    /// Forget every program and go back to the default PSI PIDs.
    pub fn reset(&mut self) {
        self.programs.clear();
        self.pat = None;
        self.seen_pat = false;
        self.is_pes.clear();
        self.known_psi.clear();
        for pid in DEFAULT_PSI_PIDS {
            self.known_psi.insert(pid);
        }
    }

    #[inline]
    pub fn is_psi(&self, pid: u16) -> bool {
        self.known_psi.contains(pid)
    }

    #[inline]
    pub fn is_pes(&self, pid: u16) -> bool {
        self.is_pes.contains(pid)
    }

    pub fn seen_pat(&self) -> bool {
        self.seen_pat
    }

    pub fn pat(&self) -> Option<&Pat> {
        self.pat.as_ref()
    }

    pub fn program(&self, program_number: u16) -> Option<&Program> {
        self.programs.get(&program_number)
    }

    pub fn programs(&self) -> impl Iterator<Item = &Program> {
        self.programs.values()
    }

    /// The active program that owns `pid`, if any.
    pub fn program_for_pid(&self, pid: u16) -> Option<&Program> {
        self.programs
            .values()
            .find(|p| p.active && p.has_pid(pid))
    }

    fn pid_in_active_programs(&self, pid: u16) -> bool {
        self.program_for_pid(pid).is_some()
    }

    /// Apply a new program association table.
    ///
    /// Every program of the new table gains a reference, then every program
    /// of the previous table loses one. Programs left without references
    /// are deactivated and removed, so a program listed in both tables is
    /// never touched.
    pub fn apply_pat(&mut self, pat: Pat) -> Vec<ProgramEvent> {
        let mut events = Vec::new();
        let old_pat = self.pat.replace(pat.clone());
        self.seen_pat = true;
        info!(
            transport_stream_id = pat.transport_stream_id,
            version = pat.version_number,
            programs = pat.programs.len(),
            "applying PAT"
        );

        // programs that were recreated, their previous reference is gone
        let mut replaced = BTreeSet::new();

        for entry in &pat.programs {
            let number = entry.program_number;
            let pmt_pid = entry.pmt_pid;
            if number == 0 {
                // network PID
                self.known_psi.insert(pmt_pid);
                continue;
            }

            let existing = self.programs.get(&number).map(|p| p.pmt_pid);
            match existing {
                Some(_) if self.is_pes.contains(pmt_pid) => {
                    debug!(program_number = number, pmt_pid, "PMT PID clashes with a PES stream, new program");
                    if let Some(mut old) = self.programs.remove(&number) {
                        self.deactivate(&mut old, &mut events);
                        self.known_psi.insert(old.pmt_pid);
                        events.push(ProgramEvent::PidReleased(old.pmt_pid));
                    }
                    self.add_program(number, pmt_pid);
                    replaced.insert(number);
                }
                Some(old_pid) if old_pid != pmt_pid => {
                    debug!(program_number = number, old = old_pid, new = pmt_pid, "PMT moved to a different PID");
                    if let Some(program) = self.programs.get_mut(&number) {
                        program.pmt_pid = pmt_pid;
                    }
                    if old_pid != PID_NULL {
                        self.known_psi.remove(old_pid);
                    }
                    self.known_psi.insert(pmt_pid);
                }
                Some(_) => trace!(program_number = number, "program unchanged"),
                None => self.add_program(number, pmt_pid),
            }

            if let Some(program) = self.programs.get_mut(&number) {
                program.patcount += 1;
            }
        }

        if let Some(old_pat) = old_pat {
            for entry in &old_pat.programs {
                let number = entry.program_number;
                if number == 0 || replaced.contains(&number) {
                    continue;
                }
                let Some(program) = self.programs.get_mut(&number) else {
                    debug!(program_number = number, "duplicated entry in previous PAT");
                    continue;
                };
                program.patcount = program.patcount.saturating_sub(1);
                if program.patcount > 0 {
                    continue;
                }

                info!(program_number = number, pmt_pid = entry.pmt_pid, "PAT removed program");
                if let Some(mut program) = self.programs.remove(&number) {
                    self.deactivate(&mut program, &mut events);
                }
                // the PID may now carry something else, look at it again
                self.known_psi.insert(entry.pmt_pid);
                events.push(ProgramEvent::PidReleased(entry.pmt_pid));
            }
        }

        events
    }

    fn add_program(&mut self, program_number: u16, pmt_pid: u16) {
        debug!(program_number, pmt_pid, "adding program");
        self.known_psi.insert(pmt_pid);
        if self.is_pes.contains(pmt_pid) {
            debug!(pmt_pid, "PMT PID was previously used by a PES stream");
            self.is_pes.remove(pmt_pid);
        }
        self.programs
            .insert(program_number, Program::new(program_number, pmt_pid));
    }

    /// Apply a program map table received on `pmt_pid`.
    ///
    /// A PMT that describes the same program as the active one is dropped.
    /// A different one replaces the active program: the new program is
    /// started before the old one is stopped.
    pub fn apply_pmt(&mut self, pmt_pid: u16, pmt: Pmt) -> Result<Vec<ProgramEvent>> {
        let mut events = Vec::new();
        if !self.seen_pat {
            warn!(pid = pmt_pid, "PMT received before any PAT");
            return Err(TsError::PmtBeforePat(pmt_pid));
        }
        if pmt.streams.is_empty() {
            warn!(pid = pmt_pid, program_number = pmt.program_number, "skipping PMT without streams");
            return Ok(events);
        }

        let number = pmt.program_number;
        let Some(old) = self.programs.get(&number) else {
            warn!(pid = pmt_pid, program_number = number, "PMT for a program the PAT does not list");
            return Err(TsError::UnknownProgram(number));
        };
        if self.is_same_program(old, pmt_pid, &pmt) {
            trace!(program_number = number, "identical program, not applying");
            return Ok(events);
        }

        if old.active {
            let mut old = match self.programs.remove(&number) {
                Some(old) => old,
                None => return Ok(events),
            };
            info!(program_number = number, version = pmt.version_number, "program changed, replacing");
            let mut program = Program::new(number, pmt_pid);
            program.patcount = old.patcount;
            program.tags = old.tags.clone();
            self.activate(&mut program, pmt_pid, pmt, &mut events);
            self.programs.insert(number, program);
            self.deactivate(&mut old, &mut events);
        } else {
            let mut program = match self.programs.remove(&number) {
                Some(program) => program,
                None => return Ok(events),
            };
            self.activate(&mut program, pmt_pid, pmt, &mut events);
            self.programs.insert(number, program);
        }
        Ok(events)
    }

    /// Whether `pmt` describes the program already applied.
    ///
    /// Only PIDs and stream types are compared; descriptor-only changes
    /// do not count.
    fn is_same_program(&self, program: &Program, pmt_pid: u16, pmt: &Pmt) -> bool {
        let Some(old_pmt) = program.pmt.as_ref() else {
            return false;
        };
        if program.pmt_pid != pmt_pid {
            return false;
        }
        if !self.ignore_pcr && program.pcr_pid != pmt.pcr_pid {
            return false;
        }
        let all_known = pmt.streams.iter().all(|s| {
            program
                .stream(s.elementary_pid)
                .is_some_and(|old| old.stream_type == Some(s.stream_type))
        });
        all_known && pmt.streams.len() == old_pmt.streams.len()
    }

    fn activate(
        &mut self,
        program: &mut Program,
        pmt_pid: u16,
        pmt: Pmt,
        events: &mut Vec<ProgramEvent>,
    ) {
        if program.active {
            return;
        }
        let number = program.program_number;
        program.pmt_pid = pmt_pid;
        program.pcr_pid = if self.ignore_pcr { PID_NULL } else { pmt.pcr_pid };
        program.registration_id = pmt.registration_id();
        program.streams.clear();

        for es in &pmt.streams {
            let pid = es.elementary_pid;
            let private_sections = pmt.is_private_section(es);
            if private_sections {
                if self.parse_private_sections {
                    self.known_psi.insert(pid);
                }
            } else {
                if self.known_psi.contains(pid) {
                    debug!(pid, "PSI PID now carries PES");
                    self.known_psi.remove(pid);
                }
                self.is_pes.insert(pid);
            }
            if program.has_pid(pid) {
                debug!(pid, program_number = number, "stream listed twice");
                continue;
            }
            program.streams.push(Stream {
                pid,
                stream_type: Some(es.stream_type),
                registration_id: es.registration_id(),
                program_number: number,
                private_sections,
            });
        }

        // the PCR PID only gets its own stream when no media uses it
        if !program.has_pid(program.pcr_pid) {
            program.streams.push(Stream {
                pid: program.pcr_pid,
                stream_type: None,
                registration_id: None,
                program_number: number,
                private_sections: false,
            });
        }
        self.is_pes.insert(program.pcr_pid);

        program.pmt = Some(pmt);
        program.active = true;
        info!(
            program_number = number,
            pmt_pid,
            pcr_pid = program.pcr_pid,
            streams = program.streams.len(),
            "program activated"
        );
        events.push(ProgramEvent::Started(program.clone()));
    }

    fn deactivate(&mut self, program: &mut Program, events: &mut Vec<ProgramEvent>) {
        if !program.active {
            return;
        }
        program.active = false;
        let snapshot = program.clone();
        let streams = std::mem::take(&mut program.streams);

        for stream in &streams {
            if self.pid_in_active_programs(stream.pid) {
                continue;
            }
            if stream.private_sections {
                if self.parse_private_sections {
                    self.known_psi.remove(stream.pid);
                    events.push(ProgramEvent::PidReleased(stream.pid));
                }
            } else {
                self.is_pes.remove(stream.pid);
            }
        }
        if !self.pid_in_active_programs(program.pcr_pid) {
            self.is_pes.remove(program.pcr_pid);
        }

        info!(program_number = program.program_number, "program deactivated");
        events.push(ProgramEvent::Stopped(snapshot));
    }

    /// Deactivate every program, keeping them registered.
    pub fn deactivate_all(&mut self) -> Vec<ProgramEvent> {
        let mut events = Vec::new();
        let numbers: Vec<u16> = self.programs.keys().copied().collect();
        for number in numbers {
            if let Some(mut program) = self.programs.remove(&number) {
                self.deactivate(&mut program, &mut events);
                self.programs.insert(number, program);
            }
        }
        events
    }

    /// Update program tags from a present/following EIT.
    ///
    /// Returns true if a program picked up the running event.
    pub fn apply_eit(&mut self, eit: &Eit) -> bool {
        if !eit.present_following() {
            return false;
        }
        let Some(program) = self.programs.get_mut(&eit.service_id) else {
            trace!(service_id = eit.service_id, "EIT for an unknown program");
            return false;
        };
        let Some(event) = eit.running_event() else {
            return false;
        };
        program.tags.event_id = Some(event.event_id);
        let Some((title, text)) = event.short_event() else {
            return false;
        };
        debug!(program_number = program.program_number, event_id = event.event_id, title, "running event");
        program.tags.title = Some(title.to_string());
        program.tags.description = Some(text.to_string());
        program.tags.start_time = event.start_time;
        program.tags.duration = event.duration;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::Section;
    use crate::test_utils::{EitEventSpec, build_eit_section, build_pat_section, build_pmt_section};
    use bytes::Bytes;

    fn pat(version: u8, programs: &[(u16, u16)]) -> Pat {
        let raw = build_pat_section(version, 1, programs);
        Pat::parse(&Section::parse(0, Bytes::from(raw), 0).unwrap()).unwrap()
    }

    fn pmt(program_number: u16, version: u8, pcr_pid: u16, streams: &[(u8, u16)]) -> Pmt {
        let streams: Vec<(u8, u16, Vec<u8>)> =
            streams.iter().map(|&(t, p)| (t, p, vec![])).collect();
        let raw = build_pmt_section(program_number, version, pcr_pid, &[], &streams);
        Pmt::parse(&Section::parse(0x1000, Bytes::from(raw), 0).unwrap()).unwrap()
    }

    fn started(events: &[ProgramEvent]) -> Vec<u16> {
        events
            .iter()
            .filter_map(|e| match e {
                ProgramEvent::Started(p) => Some(p.program_number),
                _ => None,
            })
            .collect()
    }

    fn stopped(events: &[ProgramEvent]) -> Vec<u16> {
        events
            .iter()
            .filter_map(|e| match e {
                ProgramEvent::Stopped(p) => Some(p.program_number),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn pid_set_bits() {
        let mut set = PidSet::new();
        assert!(!set.contains(0x1FFF));
        set.insert(0x1FFF);
        set.insert(0);
        set.insert(64);
        assert!(set.contains(0x1FFF));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 64, 0x1FFF]);
        set.remove(64);
        assert!(!set.contains(64));
    }

    #[test]
    fn default_psi_pids() {
        let registry = Registry::default();
        for pid in [0x00, 0x01, 0x02, 0x03, 0x10, 0x11, 0x12, 0x14, 0x15, 0x1FFB] {
            assert!(registry.is_psi(pid), "0x{pid:04x}");
        }
        assert!(!registry.is_psi(0x1000));
        assert!(!registry.is_pes(0x100));
    }

    #[test]
    fn pat_then_pmt_activates_program() {
        let mut registry = Registry::default();
        let events = registry.apply_pat(pat(0, &[(1, 0x1000)]));
        assert!(events.is_empty());
        assert!(registry.is_psi(0x1000));
        assert_eq!(registry.program(1).unwrap().patcount, 1);

        let events = registry
            .apply_pmt(0x1000, pmt(1, 0, 0x101, &[(0x1B, 0x101), (0x0F, 0x102)]))
            .unwrap();
        assert_eq!(started(&events), vec![1]);

        let program = registry.program(1).unwrap();
        assert!(program.active);
        assert_eq!(program.pcr_pid, 0x101);
        // PCR shares the video PID, no extra stream
        assert_eq!(program.streams.len(), 2);
        assert!(registry.is_pes(0x101));
        assert!(registry.is_pes(0x102));
        assert_eq!(registry.program_for_pid(0x102).unwrap().program_number, 1);
    }

    #[test]
    fn separate_pcr_pid_gets_its_own_stream() {
        let mut registry = Registry::default();
        registry.apply_pat(pat(0, &[(1, 0x1000)]));
        registry
            .apply_pmt(0x1000, pmt(1, 0, 0x1FF, &[(0x1B, 0x101)]))
            .unwrap();
        let program = registry.program(1).unwrap();
        let pcr = program.streams.last().unwrap();
        assert_eq!(pcr.pid, 0x1FF);
        assert_eq!(pcr.stream_type, None);
        assert!(registry.is_pes(0x1FF));
    }

    #[test]
    fn identical_tables_do_not_churn() {
        let mut registry = Registry::default();
        registry.apply_pat(pat(0, &[(1, 0x1000)]));
        let first = registry
            .apply_pmt(0x1000, pmt(1, 0, 0x101, &[(0x1B, 0x101)]))
            .unwrap();
        assert_eq!(started(&first), vec![1]);

        let events = registry.apply_pat(pat(0, &[(1, 0x1000)]));
        assert!(events.is_empty());
        assert_eq!(registry.program(1).unwrap().patcount, 1);
        assert!(registry.program(1).unwrap().active);

        // a new version with the same streams is still the same program
        let events = registry
            .apply_pmt(0x1000, pmt(1, 1, 0x101, &[(0x1B, 0x101)]))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn changed_pmt_starts_new_before_stopping_old() {
        let mut registry = Registry::default();
        registry.apply_pat(pat(0, &[(1, 0x1000)]));
        registry
            .apply_pmt(0x1000, pmt(1, 0, 0x101, &[(0x1B, 0x101), (0x0F, 0x102)]))
            .unwrap();

        let events = registry
            .apply_pmt(0x1000, pmt(1, 1, 0x101, &[(0x1B, 0x101), (0x0F, 0x103)]))
            .unwrap();
        assert!(matches!(events[0], ProgramEvent::Started(_)));
        assert!(matches!(events.last(), Some(ProgramEvent::Stopped(_))));

        let ProgramEvent::Stopped(old) = events.last().unwrap() else {
            unreachable!()
        };
        assert!(!old.active);
        assert!(old.has_pid(0x102));

        // shared PID stays, the dropped one goes
        assert!(registry.is_pes(0x101));
        assert!(registry.is_pes(0x103));
        assert!(!registry.is_pes(0x102));
        let program = registry.program(1).unwrap();
        assert!(program.active);
        assert_eq!(program.patcount, 1);
    }

    #[test]
    fn pmt_before_pat_is_refused() {
        let mut registry = Registry::default();
        let result = registry.apply_pmt(0x1000, pmt(1, 0, 0x101, &[(0x1B, 0x101)]));
        assert!(matches!(result, Err(TsError::PmtBeforePat(0x1000))));
        assert_eq!(registry.programs().count(), 0);
    }

    #[test]
    fn pmt_for_unknown_program_is_refused() {
        let mut registry = Registry::default();
        registry.apply_pat(pat(0, &[(1, 0x1000)]));
        let result = registry.apply_pmt(0x1000, pmt(9, 0, 0x101, &[(0x1B, 0x101)]));
        assert!(matches!(result, Err(TsError::UnknownProgram(9))));
    }

    #[test]
    fn empty_pmt_is_ignored() {
        let mut registry = Registry::default();
        registry.apply_pat(pat(0, &[(1, 0x1000)]));
        let events = registry.apply_pmt(0x1000, pmt(1, 0, 0x101, &[])).unwrap();
        assert!(events.is_empty());
        assert!(!registry.program(1).unwrap().active);
    }

    #[test]
    fn program_dropped_from_pat_is_removed() {
        let mut registry = Registry::default();
        registry.apply_pat(pat(0, &[(1, 0x1000), (2, 0x1001)]));
        registry
            .apply_pmt(0x1001, pmt(2, 0, 0x201, &[(0x1B, 0x201)]))
            .unwrap();

        let events = registry.apply_pat(pat(1, &[(1, 0x1000)]));
        assert_eq!(stopped(&events), vec![2]);
        assert!(events.contains(&ProgramEvent::PidReleased(0x1001)));
        assert!(registry.program(2).is_none());
        assert!(!registry.is_pes(0x201));
        assert_eq!(registry.program(1).unwrap().patcount, 1);
    }

    #[test]
    fn moved_pmt_pid_updates_psi_bits() {
        let mut registry = Registry::default();
        registry.apply_pat(pat(0, &[(1, 0x1000)]));
        registry.apply_pat(pat(1, &[(1, 0x1005)]));
        assert!(!registry.is_psi(0x1000));
        assert!(registry.is_psi(0x1005));
        assert_eq!(registry.program(1).unwrap().pmt_pid, 0x1005);
        assert_eq!(registry.program(1).unwrap().patcount, 1);
    }

    #[test]
    fn pmt_pid_clashing_with_pes_recreates_program() {
        let mut registry = Registry::default();
        registry.apply_pat(pat(0, &[(1, 0x1000)]));
        registry
            .apply_pmt(0x1000, pmt(1, 0, 0x101, &[(0x1B, 0x101), (0x0F, 0x102)]))
            .unwrap();

        let events = registry.apply_pat(pat(1, &[(1, 0x102)]));
        assert_eq!(stopped(&events), vec![1]);
        let program = registry.program(1).unwrap();
        assert!(!program.active);
        assert_eq!(program.pmt_pid, 0x102);
        assert_eq!(program.patcount, 1);
        assert!(registry.is_psi(0x102));
        assert!(!registry.is_pes(0x102));
    }

    #[test]
    fn private_sections_are_psi() {
        let mut registry = Registry::default();
        registry.apply_pat(pat(0, &[(1, 0x1000)]));
        registry
            .apply_pmt(0x1000, pmt(1, 0, 0x101, &[(0x1B, 0x101), (0x05, 0x120)]))
            .unwrap();
        assert!(registry.is_psi(0x120));
        assert!(!registry.is_pes(0x120));
        let program = registry.program(1).unwrap();
        assert!(program.stream(0x120).unwrap().private_sections);
        assert_eq!(program.pes_streams().count(), 1);

        let events = registry.deactivate_all();
        assert_eq!(stopped(&events), vec![1]);
        assert!(events.contains(&ProgramEvent::PidReleased(0x120)));
        assert!(!registry.is_psi(0x120));
    }

    #[test]
    fn ignore_pcr_uses_null_pid() {
        let mut registry = Registry::new(true, true);
        registry.apply_pat(pat(0, &[(1, 0x1000)]));
        registry
            .apply_pmt(0x1000, pmt(1, 0, 0x101, &[(0x1B, 0x101)]))
            .unwrap();
        assert_eq!(registry.program(1).unwrap().pcr_pid, PID_NULL);
        // a different PCR PID is not a different program here
        let events = registry
            .apply_pmt(0x1000, pmt(1, 1, 0x1FF, &[(0x1B, 0x101)]))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn network_entry_is_not_a_program() {
        let mut registry = Registry::default();
        registry.apply_pat(pat(0, &[(0, 0x0020), (1, 0x1000)]));
        assert!(registry.program(0).is_none());
        assert!(registry.is_psi(0x0020));
    }

    #[test]
    fn running_event_tags_program() {
        let mut registry = Registry::default();
        registry.apply_pat(pat(0, &[(7, 0x1000)]));

        let raw = build_eit_section(
            0x4E,
            7,
            0,
            &[
                EitEventSpec {
                    event_id: 1,
                    start: [0xE7, 0x3C, 0x12, 0x00, 0x00],
                    duration: [0x00, 0x30, 0x00],
                    running_status: 1,
                    name: "Earlier",
                    text: "",
                },
                EitEventSpec {
                    event_id: 2,
                    start: [0xE7, 0x3C, 0x12, 0x30, 0x00],
                    duration: [0x01, 0x00, 0x00],
                    running_status: 4,
                    name: "News",
                    text: "Headlines",
                },
            ],
        );
        let eit = Eit::parse(&Section::parse(0x12, Bytes::from(raw), 0).unwrap()).unwrap();
        assert!(registry.apply_eit(&eit));

        let tags = &registry.program(7).unwrap().tags;
        assert_eq!(tags.event_id, Some(2));
        assert_eq!(tags.title.as_deref(), Some("News"));
        assert_eq!(tags.description.as_deref(), Some("Headlines"));
        assert_eq!(tags.duration, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn reset_forgets_programs() {
        let mut registry = Registry::default();
        registry.apply_pat(pat(0, &[(1, 0x1000)]));
        registry
            .apply_pmt(0x1000, pmt(1, 0, 0x101, &[(0x1B, 0x101)]))
            .unwrap();
        registry.reset();
        assert!(!registry.seen_pat());
        assert!(!registry.is_pes(0x101));
        assert!(!registry.is_psi(0x1000));
        assert!(registry.is_psi(0x0000));
    }
}
