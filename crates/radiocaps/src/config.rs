use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::raf::AccessModes;
use crate::request::{DataRole, RolePriority};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CapsConfigInput {
    pub version: u32,
    pub recheck_cooldown_ms: Option<u64>,
    pub check_retry_limit: Option<u32>,
    pub check_retry_delay_ms: Option<u64>,
    pub check_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub wait_timeout_ms: Option<u64>,
    pub role_priority: Option<Vec<String>>,
    pub slots: Vec<SlotConfigInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SlotConfigInput {
    pub index: Option<usize>,
    pub techs: Option<Vec<String>>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotConfig {
    pub index: usize,
    /// Technologies this slot may ever be asked to use.
    pub techs: AccessModes,
    pub enabled: bool,
}

impl SlotConfig {
    pub fn new(index: usize) -> Self {
        SlotConfig {
            index,
            techs: AccessModes::all(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapsConfig {
    pub version: u32,
    /// Delay before re-arbitrating after an aborted switch.
    pub recheck_cooldown: Duration,
    /// Extra attempts for the initial capability query.
    pub check_retry_limit: u32,
    pub check_retry_delay: Duration,
    pub check_timeout: Duration,
    /// Timeout passed with every switch-related request.
    pub request_timeout: Duration,
    /// How long a switch may wait for SIM I/O to settle and for exclusive
    /// channel ownership before it is abandoned.
    pub wait_timeout: Duration,
    pub role_priority: RolePriority,
    pub slots: Vec<SlotConfig>,
}

impl Default for CapsConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            recheck_cooldown: Duration::from_secs(5),
            check_retry_limit: 5,
            check_retry_delay: Duration::from_secs(1),
            check_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(30),
            wait_timeout: Duration::from_secs(30),
            role_priority: RolePriority::default(),
            slots: Vec::new(),
        }
    }
}

impl CapsConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(CapsConfig::default());
        }
        let parsed: CapsConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    /// Settings for `slot`, falling back to defaults for unlisted slots.
    pub fn slot(&self, slot: usize) -> SlotConfig {
        self.slots
            .iter()
            .find(|s| s.index == slot)
            .cloned()
            .unwrap_or_else(|| SlotConfig::new(slot))
    }
}

impl CapsConfigInput {
    pub fn resolve(self) -> Result<CapsConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::Version(version));
        }

        let defaults = CapsConfig::default();

        let role_priority = match self.role_priority {
            Some(names) => {
                let mut roles = Vec::new();
                for name in names {
                    let role: DataRole = name.parse()?;
                    if !roles.contains(&role) {
                        roles.push(role);
                    }
                }
                RolePriority::new(roles)
            }
            None => defaults.role_priority.clone(),
        };

        let mut used = HashSet::new();
        let mut slots = Vec::new();
        for (idx, slot) in self.slots.into_iter().enumerate() {
            let index = slot.index.unwrap_or(idx);
            if !used.insert(index) {
                continue;
            }
            let techs = match slot.techs {
                Some(names) => {
                    let mut techs = AccessModes::empty();
                    for name in names {
                        techs |= name.parse::<AccessModes>()?;
                    }
                    techs
                }
                None => AccessModes::all(),
            };
            slots.push(SlotConfig {
                index,
                techs,
                enabled: slot.enabled.unwrap_or(true),
            });
        }

        Ok(CapsConfig {
            version,
            recheck_cooldown: self
                .recheck_cooldown_ms
                .map_or(defaults.recheck_cooldown, Duration::from_millis),
            check_retry_limit: self.check_retry_limit.unwrap_or(defaults.check_retry_limit),
            check_retry_delay: self
                .check_retry_delay_ms
                .map_or(defaults.check_retry_delay, Duration::from_millis),
            check_timeout: self
                .check_timeout_ms
                .map_or(defaults.check_timeout, Duration::from_millis),
            request_timeout: self
                .request_timeout_ms
                .map_or(defaults.request_timeout, Duration::from_millis),
            wait_timeout: self
                .wait_timeout_ms
                .map_or(defaults.wait_timeout, Duration::from_millis),
            role_priority,
            slots,
        })
    }
}
