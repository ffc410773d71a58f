//! Zone mapping tables
//!
//! Static lookup from (zone, wind direction) to the ordered list of lamp ids
//! that guide evacuation away from the hazard. The tables are compiled in so
//! a changeover is deterministic and auditable; list order is the order the
//! lamps are driven in, and the highest id in a list carries the flash marker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Evacuation zone label. `I` and `J` are reserved; `K` follows `H`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneName {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    K,
}

impl ZoneName {
    /// All defined zones, in label order.
    pub const ALL: [ZoneName; 9] = [
        ZoneName::A,
        ZoneName::B,
        ZoneName::C,
        ZoneName::D,
        ZoneName::E,
        ZoneName::F,
        ZoneName::G,
        ZoneName::H,
        ZoneName::K,
    ];

    fn letter(self) -> char {
        match self {
            ZoneName::A => 'A',
            ZoneName::B => 'B',
            ZoneName::C => 'C',
            ZoneName::D => 'D',
            ZoneName::E => 'E',
            ZoneName::F => 'F',
            ZoneName::G => 'G',
            ZoneName::H => 'H',
            ZoneName::K => 'K',
        }
    }
}

impl fmt::Display for ZoneName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Zone {}", self.letter())
    }
}

impl FromStr for ZoneName {
    type Err = UnknownZone;

    /// Accepts `"Zone A"`, `"zone a"` or a bare letter, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let label = trimmed
            .strip_prefix("Zone ")
            .or_else(|| trimmed.strip_prefix("zone "))
            .or_else(|| trimmed.strip_prefix("ZONE "))
            .unwrap_or(trimmed)
            .trim();

        let mut chars = label.chars();
        let letter = chars.next().ok_or_else(|| UnknownZone(s.to_string()))?;
        if chars.next().is_some() {
            return Err(UnknownZone(s.to_string()));
        }

        match letter.to_ascii_uppercase() {
            'A' => Ok(ZoneName::A),
            'B' => Ok(ZoneName::B),
            'C' => Ok(ZoneName::C),
            'D' => Ok(ZoneName::D),
            'E' => Ok(ZoneName::E),
            'F' => Ok(ZoneName::F),
            'G' => Ok(ZoneName::G),
            'H' => Ok(ZoneName::H),
            'K' => Ok(ZoneName::K),
            _ => Err(UnknownZone(s.to_string())),
        }
    }
}

/// Wind direction a zone activation is planned against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindDirection {
    /// North to south (`N-S`)
    NorthSouth,
    /// South to north (`S-N`)
    SouthNorth,
    /// East to west (`E-W`)
    EastWest,
    /// West to east (`W-E`)
    WestEast,
}

impl WindDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            WindDirection::NorthSouth => "N-S",
            WindDirection::SouthNorth => "S-N",
            WindDirection::EastWest => "E-W",
            WindDirection::WestEast => "W-E",
        }
    }
}

impl fmt::Display for WindDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindDirection {
    type Err = UnknownWind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "N-S" => Ok(WindDirection::NorthSouth),
            "S-N" => Ok(WindDirection::SouthNorth),
            "E-W" => Ok(WindDirection::EastWest),
            "W-E" => Ok(WindDirection::WestEast),
            _ => Err(UnknownWind(s.to_string())),
        }
    }
}

/// Zone name that is not part of the installation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown zone: {0:?}")]
pub struct UnknownZone(pub String);

/// Wind direction outside `N-S | S-N | E-W | W-E`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown wind direction: {0:?}")]
pub struct UnknownWind(pub String);

/// Ordered lamp ids driven ON for a given zone and wind direction.
///
/// The table is the authoritative route plan for the deployment. Several
/// zones deliberately pair wind directions asymmetrically (e.g. Zone B uses
/// the S-N pattern for E-W); the table is the source of truth, not the
/// pairing symmetry.
pub fn zone_lamps(zone: ZoneName, wind: WindDirection) -> &'static [u8] {
    use WindDirection::{EastWest, NorthSouth, SouthNorth, WestEast};

    match (zone, wind) {
        (ZoneName::A, NorthSouth | EastWest) => &[6, 105],
        (ZoneName::A, SouthNorth | WestEast) => &[4, 13, 22, 31, 42, 52, 70, 79, 97],

        (ZoneName::B, NorthSouth | WestEast) => &[6, 104],
        (ZoneName::B, SouthNorth | EastWest) => &[4, 15],

        (ZoneName::C, NorthSouth | WestEast) => &[4, 15],
        (ZoneName::C, SouthNorth) => &[4, 13, 22, 31, 42, 54, 58],
        (ZoneName::C, EastWest) => &[4, 13, 22, 31, 42, 54, 60],

        (ZoneName::D, NorthSouth | EastWest) => &[6, 103],
        (ZoneName::D, SouthNorth | WestEast) => &[4, 13, 22, 31, 42, 52, 70, 81, 86],

        (ZoneName::E, NorthSouth | WestEast) => &[5],
        (ZoneName::E, SouthNorth | EastWest) => &[4, 14],

        (ZoneName::F, NorthSouth | EastWest) => &[6, 92, 103],
        (ZoneName::F, SouthNorth) => &[4, 13, 22, 31, 42, 52, 70, 81, 83],
        (ZoneName::F, WestEast) => &[4, 13, 22, 31, 42, 52, 70, 81, 86],

        (ZoneName::G, NorthSouth | WestEast) => &[6, 88, 92, 103],
        (ZoneName::G, SouthNorth | EastWest) => &[4, 22, 13, 31, 42, 52, 72],

        (ZoneName::H, NorthSouth | SouthNorth | WestEast) => &[4, 13, 22, 32],
        (ZoneName::H, EastWest) => &[4, 13, 23, 114],

        (ZoneName::K, NorthSouth) => &[4, 13, 23, 113],
        (ZoneName::K, SouthNorth) => &[4, 13, 23, 114, 119],
        (ZoneName::K, EastWest) => &[4, 13, 22, 31, 41, 126],
        (ZoneName::K, WestEast) => &[4, 13, 23, 112],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_zone_names_loosely() {
        assert_eq!("Zone A".parse::<ZoneName>().unwrap(), ZoneName::A);
        assert_eq!("zone k".parse::<ZoneName>().unwrap(), ZoneName::K);
        assert_eq!("g".parse::<ZoneName>().unwrap(), ZoneName::G);
        assert!("Zone I".parse::<ZoneName>().is_err());
        assert!("Zone AB".parse::<ZoneName>().is_err());
        assert!("".parse::<ZoneName>().is_err());
    }

    #[test]
    fn parses_wind_directions() {
        assert_eq!("N-S".parse::<WindDirection>().unwrap(), WindDirection::NorthSouth);
        assert_eq!("s-n".parse::<WindDirection>().unwrap(), WindDirection::SouthNorth);
        assert!("NS".parse::<WindDirection>().is_err());
    }

    // Frozen fixture: the deployment route plan. Any change here must come
    // from the field survey, not from code cleanup.
    #[test]
    fn route_plan_fixture() {
        assert_eq!(
            zone_lamps(ZoneName::A, WindDirection::SouthNorth),
            &[4, 13, 22, 31, 42, 52, 70, 79, 97]
        );
        assert_eq!(zone_lamps(ZoneName::A, WindDirection::NorthSouth), &[6, 105]);
        // Zone B pairs E-W with the S-N pattern and W-E with the N-S pattern.
        assert_eq!(zone_lamps(ZoneName::B, WindDirection::EastWest), &[4, 15]);
        assert_eq!(zone_lamps(ZoneName::B, WindDirection::WestEast), &[6, 104]);
        // Zone G's long route runs 4, 22, 13 — transmission order, not sorted.
        assert_eq!(
            zone_lamps(ZoneName::G, WindDirection::SouthNorth),
            &[4, 22, 13, 31, 42, 52, 72]
        );
        // Zone F is asymmetric between S-N (…81, 83) and W-E (…81, 86).
        assert_eq!(
            zone_lamps(ZoneName::F, WindDirection::SouthNorth),
            &[4, 13, 22, 31, 42, 52, 70, 81, 83]
        );
        assert_eq!(
            zone_lamps(ZoneName::F, WindDirection::WestEast),
            &[4, 13, 22, 31, 42, 52, 70, 81, 86]
        );
        assert_eq!(
            zone_lamps(ZoneName::K, WindDirection::EastWest),
            &[4, 13, 22, 31, 41, 126]
        );
    }

    #[test]
    fn every_zone_and_wind_has_lamps_in_range() {
        for &zone in &ZoneName::ALL {
            for wind in [
                WindDirection::NorthSouth,
                WindDirection::SouthNorth,
                WindDirection::EastWest,
                WindDirection::WestEast,
            ] {
                let lamps = zone_lamps(zone, wind);
                assert!(!lamps.is_empty(), "{zone} {wind} has no lamps");
                for &id in lamps {
                    assert!((1..=126).contains(&id), "{zone} {wind} lamp {id} out of range");
                }
            }
        }
    }
}
