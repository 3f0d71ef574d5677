//! # Radio Access Families
//!
//! Two views of the same thing:
//!
//! - [`Raf`] is the HAL's RadioAccessFamily bitmap, one bit per radio
//!   technology (GPRS, EDGE, HSPA, LTE-CA, ...). This is what a logical
//!   modem reports and what capability-switch requests carry.
//! - [`AccessModes`] is the coarse four-tier view used by network-mode
//!   logic: GSM < UMTS < LTE < NR.
//!
//! ```text
//!   Raf: GSM|GPRS|EDGE|UMTS|HSPA|LTE|LTE_CA
//!          └── GSM ──┘ └─ UMTS ─┘ └─ LTE ─┘
//!   access_modes() = GSM|UMTS|LTE   access_mode() = LTE
//! ```

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

bitflags! {
    /// HAL RadioAccessFamily bitmap.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Raf: u32 {
        const UNKNOWN = 1 << 0;
        const GPRS = 1 << 1;
        const EDGE = 1 << 2;
        const UMTS = 1 << 3;
        const IS95A = 1 << 4;
        const IS95B = 1 << 5;
        const ONE_X_RTT = 1 << 6;
        const EVDO_0 = 1 << 7;
        const EVDO_A = 1 << 8;
        const HSDPA = 1 << 9;
        const HSUPA = 1 << 10;
        const HSPA = 1 << 11;
        const EVDO_B = 1 << 12;
        const EHRPD = 1 << 13;
        const LTE = 1 << 14;
        const HSPAP = 1 << 15;
        const GSM = 1 << 16;
        const TD_SCDMA = 1 << 17;
        const IWLAN = 1 << 18;
        const LTE_CA = 1 << 19;
        const NR = 1 << 20;
    }
}

bitflags! {
    /// Coarse access-mode tiers. Bit order is rank order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessModes: u32 {
        const GSM = 1 << 0;
        const UMTS = 1 << 1;
        const LTE = 1 << 2;
        const NR = 1 << 3;
    }
}

// ─── Family groups ──────────────────────────────────────────────────────────

impl Raf {
    /// Every 2G technology bit.
    pub const GSM_FAMILY: Raf = Raf::GSM.union(Raf::GPRS).union(Raf::EDGE);
    /// Every 3G technology bit.
    pub const UMTS_FAMILY: Raf = Raf::UMTS
        .union(Raf::HSDPA)
        .union(Raf::HSUPA)
        .union(Raf::HSPA)
        .union(Raf::HSPAP)
        .union(Raf::TD_SCDMA);
    /// Every 4G technology bit.
    pub const LTE_FAMILY: Raf = Raf::LTE.union(Raf::LTE_CA);
    /// Every 5G technology bit.
    pub const NR_FAMILY: Raf = Raf::NR;

    /// The highest access-mode tier present in this bitmap, or empty.
    pub fn access_mode(self) -> AccessModes {
        if self.intersects(Raf::NR_FAMILY) {
            AccessModes::NR
        } else if self.intersects(Raf::LTE_FAMILY) {
            AccessModes::LTE
        } else if self.intersects(Raf::UMTS_FAMILY) {
            AccessModes::UMTS
        } else if self.intersects(Raf::GSM_FAMILY) {
            AccessModes::GSM
        } else {
            AccessModes::empty()
        }
    }

    /// Every access-mode tier present in this bitmap.
    pub fn access_modes(self) -> AccessModes {
        let mut modes = AccessModes::empty();
        if self.intersects(Raf::GSM_FAMILY) {
            modes |= AccessModes::GSM;
        }
        if self.intersects(Raf::UMTS_FAMILY) {
            modes |= AccessModes::UMTS;
        }
        if self.intersects(Raf::LTE_FAMILY) {
            modes |= AccessModes::LTE;
        }
        if self.intersects(Raf::NR_FAMILY) {
            modes |= AccessModes::NR;
        }
        modes
    }
}

impl fmt::Display for Raf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06x} ({})", self.bits(), self.access_modes())
    }
}

// ─── Access modes ───────────────────────────────────────────────────────────

const MODE_NAMES: [(AccessModes, &str); 4] = [
    (AccessModes::GSM, "gsm"),
    (AccessModes::UMTS, "umts"),
    (AccessModes::LTE, "lte"),
    (AccessModes::NR, "nr"),
];

impl AccessModes {
    /// The single highest tier in the mask, or empty.
    pub fn highest(self) -> AccessModes {
        match self.bits() {
            0 => AccessModes::empty(),
            bits => AccessModes::from_bits_truncate(1 << (31 - bits.leading_zeros())),
        }
    }

    /// All tiers up to and including the highest tier of `max`.
    ///
    /// `up_to(LTE)` is `GSM|UMTS|LTE`. An empty `max` yields every tier.
    pub fn up_to(max: AccessModes) -> AccessModes {
        let top = max.highest();
        if top.is_empty() {
            AccessModes::all()
        } else {
            AccessModes::from_bits_truncate((top.bits() << 1) - 1)
        }
    }

    /// Whether a slot offering `self` satisfies a slot asking for `requested`.
    ///
    /// Masks compare as integers, so the highest tier dominates: `GSM|UMTS|LTE`
    /// covers `LTE`, `NR` covers `GSM|UMTS|LTE`, `GSM|UMTS` does not cover `LTE`.
    pub fn covers(self, requested: AccessModes) -> bool {
        self.bits() >= requested.bits()
    }

    /// Signed magnitude used by the scorer.
    pub fn weight(self) -> i64 {
        i64::from(self.bits())
    }

    /// The RAF bitmap holding every technology of every tier in the mask.
    pub fn to_raf(self) -> Raf {
        let mut raf = Raf::empty();
        if self.contains(AccessModes::GSM) {
            raf |= Raf::GSM_FAMILY;
        }
        if self.contains(AccessModes::UMTS) {
            raf |= Raf::UMTS_FAMILY;
        }
        if self.contains(AccessModes::LTE) {
            raf |= Raf::LTE_FAMILY;
        }
        if self.contains(AccessModes::NR) {
            raf |= Raf::NR_FAMILY;
        }
        raf
    }
}

impl fmt::Display for AccessModes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        for (mode, name) in MODE_NAMES {
            if self.contains(mode) {
                if !first {
                    write!(f, "+")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Error returned for an unknown access-mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown access mode {0:?}")]
pub struct UnknownAccessMode(pub String);

impl FromStr for AccessModes {
    type Err = UnknownAccessMode;

    /// Parses `"lte"`, `"gsm+umts"`, `"none"` and `"any"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => return Ok(AccessModes::empty()),
            "any" | "all" => return Ok(AccessModes::all()),
            _ => {}
        }
        let mut modes = AccessModes::empty();
        for part in s.split('+') {
            let part = part.trim().to_ascii_lowercase();
            let mode = MODE_NAMES
                .iter()
                .find(|(_, name)| *name == part)
                .map(|(mode, _)| *mode)
                .ok_or_else(|| UnknownAccessMode(part.clone()))?;
            modes |= mode;
        }
        Ok(modes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_mode_picks_highest_tier() {
        let raf = Raf::GSM | Raf::HSPA | Raf::LTE;
        assert_eq!(raf.access_mode(), AccessModes::LTE);
        assert_eq!(Raf::EDGE.access_mode(), AccessModes::GSM);
        assert_eq!((Raf::UMTS | Raf::NR).access_mode(), AccessModes::NR);
        assert_eq!(Raf::IWLAN.access_mode(), AccessModes::empty());
    }

    #[test]
    fn access_modes_collects_every_tier() {
        let raf = Raf::GPRS | Raf::TD_SCDMA | Raf::LTE_CA;
        assert_eq!(
            raf.access_modes(),
            AccessModes::GSM | AccessModes::UMTS | AccessModes::LTE
        );
    }

    #[test]
    fn to_raf_inverts_access_modes() {
        let modes = AccessModes::GSM | AccessModes::LTE;
        assert_eq!(modes.to_raf().access_modes(), modes);
        assert!(modes.to_raf().contains(Raf::LTE_CA));
        assert!(!modes.to_raf().intersects(Raf::UMTS_FAMILY));
    }

    #[test]
    fn covers_is_rank_ordered() {
        let gul = AccessModes::GSM | AccessModes::UMTS | AccessModes::LTE;
        assert!(gul.covers(AccessModes::LTE));
        assert!(AccessModes::NR.covers(gul));
        assert!(!(AccessModes::GSM | AccessModes::UMTS).covers(AccessModes::LTE));
        assert!(AccessModes::empty().covers(AccessModes::empty()));
    }

    #[test]
    fn highest_and_up_to() {
        let gul = AccessModes::GSM | AccessModes::UMTS | AccessModes::LTE;
        assert_eq!(gul.highest(), AccessModes::LTE);
        assert_eq!(AccessModes::empty().highest(), AccessModes::empty());
        assert_eq!(AccessModes::up_to(AccessModes::LTE), gul);
        assert_eq!(AccessModes::up_to(AccessModes::GSM), AccessModes::GSM);
        assert_eq!(AccessModes::up_to(AccessModes::empty()), AccessModes::all());
    }

    #[test]
    fn parse_and_display() {
        let modes: AccessModes = "gsm+LTE".parse().unwrap();
        assert_eq!(modes, AccessModes::GSM | AccessModes::LTE);
        assert_eq!(modes.to_string(), "gsm+lte");
        assert_eq!("none".parse::<AccessModes>().unwrap(), AccessModes::empty());
        assert_eq!("any".parse::<AccessModes>().unwrap(), AccessModes::all());
        assert!("wimax".parse::<AccessModes>().is_err());
    }
}
