//! Six-dimensional normalized score vector.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One axis of the score vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Speed,
    Quality,
    TokenEff,
    Cost,
    Memory,
    Reliability,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Speed,
        Dimension::Quality,
        Dimension::TokenEff,
        Dimension::Cost,
        Dimension::Memory,
        Dimension::Reliability,
    ];

    /// Position of this dimension in fixed-size per-dimension arrays.
    pub fn index(self) -> usize {
        match self {
            Self::Speed => 0,
            Self::Quality => 1,
            Self::TokenEff => 2,
            Self::Cost => 3,
            Self::Memory => 4,
            Self::Reliability => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Speed => "speed",
            Self::Quality => "quality",
            Self::TokenEff => "token_eff",
            Self::Cost => "cost",
            Self::Memory => "memory",
            Self::Reliability => "reliability",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "speed" => Ok(Self::Speed),
            "quality" => Ok(Self::Quality),
            "token_eff" | "token_efficiency" => Ok(Self::TokenEff),
            "cost" => Ok(Self::Cost),
            "memory" | "memory_overhead" => Ok(Self::Memory),
            "reliability" => Ok(Self::Reliability),
            other => Err(format!("unknown score dimension '{other}'")),
        }
    }
}

/// Learned quality signal for one candidate. Every field lies in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreVector {
    pub speed: f64,
    pub quality: f64,
    pub token_eff: f64,
    pub cost: f64,
    pub memory: f64,
    pub reliability: f64,
}

/// Clamp into `[0, 1]`, mapping NaN to 0.
pub(crate) fn unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

impl ScoreVector {
    /// Build a vector, clamping each dimension into `[0, 1]`.
    pub fn new(
        speed: f64,
        quality: f64,
        token_eff: f64,
        cost: f64,
        memory: f64,
        reliability: f64,
    ) -> Self {
        Self {
            speed: unit(speed),
            quality: unit(quality),
            token_eff: unit(token_eff),
            cost: unit(cost),
            memory: unit(memory),
            reliability: unit(reliability),
        }
    }

    /// Same value on every dimension.
    pub fn uniform(v: f64) -> Self {
        Self::new(v, v, v, v, v, v)
    }

    pub fn get(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::Speed => self.speed,
            Dimension::Quality => self.quality,
            Dimension::TokenEff => self.token_eff,
            Dimension::Cost => self.cost,
            Dimension::Memory => self.memory,
            Dimension::Reliability => self.reliability,
        }
    }

    /// Set one dimension, clamped into `[0, 1]`.
    pub fn set(&mut self, dim: Dimension, value: f64) {
        let v = unit(value);
        match dim {
            Dimension::Speed => self.speed = v,
            Dimension::Quality => self.quality = v,
            Dimension::TokenEff => self.token_eff = v,
            Dimension::Cost => self.cost = v,
            Dimension::Memory => self.memory = v,
            Dimension::Reliability => self.reliability = v,
        }
    }

    /// Builder-style variant of [`set`](Self::set).
    pub fn with(mut self, dim: Dimension, value: f64) -> Self {
        self.set(dim, value);
        self
    }

    /// Copy with every dimension forced into `[0, 1]`.
    ///
    /// Used on hydration: a hand-edited snapshot must not break the invariant.
    pub fn clamped(self) -> Self {
        Self::new(
            self.speed,
            self.quality,
            self.token_eff,
            self.cost,
            self.memory,
            self.reliability,
        )
    }

    pub fn is_normalized(&self) -> bool {
        Dimension::ALL
            .iter()
            .all(|d| (0.0..=1.0).contains(&self.get(*d)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, f64)> + '_ {
        Dimension::ALL.iter().map(move |d| (*d, self.get(*d)))
    }
}

impl Default for ScoreVector {
    /// Neutral prior for a candidate nothing is known about.
    fn default() -> Self {
        Self::new(0.5, 0.5, 0.5, 0.5, 0.5, 0.7)
    }
}
