//! TOML-described arbitration scenarios.
//!
//! ```toml
//! name = "swap"
//!
//! [config]
//! recheck_cooldown_ms = 5000
//!
//! [[slots]]
//! index = 0
//! modes = ["gsm", "umts"]
//!
//! [[slots]]
//! index = 1
//! modes = ["gsm", "umts", "lte"]
//!
//! [[requests]]
//! slot = 0
//! modes = ["lte"]
//! role = "internet"
//!
//! [[failures]]
//! slot = 1
//! request = "apply"
//! error = "generic_failure"
//! times = 1
//!
//! [[steps]]
//! action = "settle"
//! ```
//!
//! With no `steps` the scenario just settles once.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use radiocaps::config::CapsConfigInput;
use radiocaps::events::CapsEvent;
use radiocaps::radio::{DataCall, RadioCapability, RadioRequest};
use radiocaps::raf::AccessModes;
use radiocaps::request::DataRole;

use crate::harness::{parse_failure, Harness, RequestKind};

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub name: String,
    pub config: CapsConfigInput,
    /// Whether data must be switched off explicitly before a switch.
    pub need_set_data_allowed: Option<bool>,
    pub slots: Vec<SlotSpec>,
    pub requests: Vec<RequestSpec>,
    pub failures: Vec<FailureSpec>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotSpec {
    pub index: usize,
    /// Access modes the slot's modem starts with; empty reports nothing.
    #[serde(default)]
    pub modes: Vec<String>,
    #[serde(default)]
    pub modem: Option<String>,
    #[serde(default = "yes")]
    pub online: bool,
    #[serde(default = "yes")]
    pub sim: bool,
    #[serde(default = "yes")]
    pub imsi: bool,
    #[serde(default)]
    pub sim_io: bool,
    /// Active data call ids.
    #[serde(default)]
    pub calls: Vec<i32>,
    /// Grant exclusive channel ownership immediately.
    #[serde(default = "yes")]
    pub grant: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestSpec {
    pub slot: usize,
    pub modes: Vec<String>,
    pub role: DataRole,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FailureSpec {
    pub slot: usize,
    pub request: RequestKind,
    pub error: String,
    #[serde(default)]
    pub times: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Settle,
    /// Move the clock forward, then settle.
    Advance { ms: u64 },
    SimIo { slot: usize, active: bool },
    Grant { slot: usize },
    Online { slot: usize, online: bool },
    Request { slot: usize, modes: Vec<String>, role: DataRole },
    Hold { slot: usize, request: RequestKind },
    Release { slot: usize, request: RequestKind },
    RemoveSlot { slot: usize },
}

fn parse_modes(names: &[String]) -> Result<AccessModes> {
    let mut modes = AccessModes::empty();
    for name in names {
        modes |= name.parse::<AccessModes>()?;
    }
    Ok(modes)
}

impl Scenario {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let scenario: Scenario = toml::from_str(input)?;
        let mut seen = BTreeSet::new();
        for slot in &scenario.slots {
            if !seen.insert(slot.index) {
                bail!("slot {} listed twice", slot.index);
            }
        }
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing scenario {}", path.display()))
    }

    /// Build the harness, play the steps, and report.
    pub fn run(&self) -> Result<ScenarioReport> {
        let config = self.config.clone().resolve()?;
        let mut h = Harness::new(config);
        if let Some(need) = self.need_set_data_allowed {
            h.data_manager().set_need_set_data_allowed(need);
        }

        for f in &self.failures {
            let error = parse_failure(&f.error)
                .ok_or_else(|| anyhow!("unknown error name {:?}", f.error))?;
            match f.times {
                Some(times) => h.policy_mut().fail_times(f.slot, f.request, error, times),
                None => h.policy_mut().fail(f.slot, f.request, error),
            }
        }

        for slot in &self.slots {
            let modes = parse_modes(&slot.modes)?;
            let cap = (!modes.is_empty()).then(|| {
                let modem = slot
                    .modem
                    .clone()
                    .unwrap_or_else(|| format!("modem{}", slot.index));
                RadioCapability::new(modes.to_raf(), modem)
            });
            h.add_slot(slot.index, cap)?;
            h.hal().set_grant(slot.index, slot.grant);
            if let Some(data) = h.slot_data(slot.index) {
                data.set_calls(
                    slot.calls
                        .iter()
                        .map(|&cid| DataCall { cid, active: true })
                        .collect(),
                );
            }
            h.set_sim_io(slot.index, slot.sim_io);
            let m = h.manager_mut();
            m.set_online(slot.index, slot.online);
            m.set_sim_present(slot.index, slot.sim);
            m.set_imsi_known(slot.index, slot.imsi);
        }

        let mut handles = Vec::new();
        for r in &self.requests {
            handles.push(h.add_request(r.slot, parse_modes(&r.modes)?, r.role));
        }

        let default_steps = [Step::Settle];
        let steps = if self.steps.is_empty() {
            &default_steps[..]
        } else {
            &self.steps[..]
        };
        for step in steps {
            tracing::debug!(?step, "scenario step");
            match step {
                Step::Settle => {
                    h.settle();
                }
                Step::Advance { ms } => {
                    h.advance(Duration::from_millis(*ms));
                    h.settle();
                }
                Step::SimIo { slot, active } => h.set_sim_io(*slot, *active),
                Step::Grant { slot } => h.grant_channel(*slot),
                Step::Online { slot, online } => h.manager_mut().set_online(*slot, *online),
                Step::Request { slot, modes, role } => {
                    handles.push(h.add_request(*slot, parse_modes(modes)?, *role));
                }
                Step::Hold { slot, request } => h.policy_mut().hold(*slot, *request),
                Step::Release { slot, request } => h.policy_mut().release(*slot, *request),
                Step::RemoveSlot { slot } => h.remove_slot(*slot)?,
            }
        }

        Ok(ScenarioReport::collect(&self.name, &mut h))
    }
}

// ─── Report ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventRecord {
    RafChanged { slot: usize, raf: String, modes: String },
    TxDone { tx_id: u32 },
    TxAborted { tx_id: u32 },
    CapsUnsupported { slot: usize },
}

impl From<&CapsEvent> for EventRecord {
    fn from(event: &CapsEvent) -> Self {
        match event {
            CapsEvent::RafChanged { slot, raf } => EventRecord::RafChanged {
                slot: *slot,
                raf: raf.to_string(),
                modes: raf.access_modes().to_string(),
            },
            CapsEvent::TxDone { tx_id } => EventRecord::TxDone { tx_id: *tx_id },
            CapsEvent::TxAborted { tx_id } => EventRecord::TxAborted { tx_id: *tx_id },
            CapsEvent::CapsUnsupported { slot } => EventRecord::CapsUnsupported { slot: *slot },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub slot: usize,
    pub id: u64,
    pub kind: RequestKind,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotReport {
    pub slot: usize,
    pub status: String,
    pub modes: Option<String>,
    pub modem: Option<String>,
}

/// Outcome of a scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub events: Vec<EventRecord>,
    pub requests: Vec<RequestRecord>,
    pub slots: Vec<SlotReport>,
    pub stage: String,
    pub tx_id: u32,
}

impl ScenarioReport {
    fn collect(name: &str, h: &mut Harness) -> Self {
        let events = h.events().iter().map(EventRecord::from).collect();
        let requests = h
            .hal()
            .log()
            .into_iter()
            .map(|sent| RequestRecord {
                slot: sent.slot,
                id: sent.id.0,
                kind: RequestKind::of(&sent.request),
                detail: describe(&sent.request),
            })
            .collect();
        let m = h.manager();
        let slots = m
            .slots()
            .into_iter()
            .map(|slot| {
                let record = m.record(slot);
                SlotReport {
                    slot,
                    status: m
                        .slot_status(slot)
                        .map_or_else(|| "unknown".into(), |s| format!("{s:?}")),
                    modes: record.map(|r| r.cap.raf.access_modes().to_string()),
                    modem: record.map(|r| r.cap.logical_modem_uuid.clone()),
                }
            })
            .collect();
        ScenarioReport {
            name: name.to_string(),
            events,
            requests,
            slots,
            stage: m.stage().to_string(),
            tx_id: m.tx_id(),
        }
    }

    pub fn count(&self, kind: RequestKind) -> usize {
        self.requests.iter().filter(|r| r.kind == kind).count()
    }
}

fn describe(request: &RadioRequest) -> String {
    match request {
        RadioRequest::SetRadioCapability(cap) => format!(
            "session={} phase={:?} status={:?} {}",
            cap.session, cap.phase, cap.status, cap
        ),
        RadioRequest::DeactivateDataCall { cid, .. } => format!("cid={cid}"),
        RadioRequest::SetDataAllowed(allowed) => format!("allowed={allowed}"),
        RadioRequest::SetAllowedNetworkTypes(raf) => raf.to_string(),
        RadioRequest::GetRadioCapability => String::new(),
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "scenario: {}", self.name)?;
        writeln!(f, "requests:")?;
        for r in &self.requests {
            writeln!(f, "  {:>4} slot {} {:<14} {}", r.id, r.slot, r.kind, r.detail)?;
        }
        writeln!(f, "events:")?;
        for e in &self.events {
            writeln!(f, "  {e:?}")?;
        }
        writeln!(f, "slots:")?;
        for s in &self.slots {
            writeln!(
                f,
                "  {} {} {} {}",
                s.slot,
                s.status,
                s.modes.as_deref().unwrap_or("-"),
                s.modem.as_deref().unwrap_or("-")
            )?;
        }
        writeln!(f, "stage: {} (tx {})", self.stage, self.tx_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_slots() {
        let err = Scenario::from_toml_str("[[slots]]\nindex = 0\n[[slots]]\nindex = 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn parses_steps() {
        let s = Scenario::from_toml_str(
            r#"
            [[steps]]
            action = "advance"
            ms = 5000

            [[steps]]
            action = "sim_io"
            slot = 1
            active = false
            "#,
        )
        .unwrap();
        assert!(matches!(s.steps[0], Step::Advance { ms: 5000 }));
        assert!(matches!(s.steps[1], Step::SimIo { slot: 1, active: false }));
    }

    #[test]
    fn unknown_error_name_fails_run() {
        let s = Scenario::from_toml_str(
            r#"
            [[failures]]
            slot = 0
            request = "apply"
            error = "meltdown"
            "#,
        )
        .unwrap();
        assert!(s.run().is_err());
    }
}
