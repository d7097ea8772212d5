//! Network status model

use serde::{Deserialize, Serialize};

/// Physical link type reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    #[default]
    Unknown,
}

/// Effective link quality bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2G,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

/// Ephemeral connectivity snapshot, never persisted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub is_online: bool,
    pub connection_type: ConnectionType,
    pub effective_type: EffectiveType,
    pub downlink_mbps: Option<f64>,
    pub rtt_ms: Option<u32>,
    /// Online and not on a slow-2g link
    pub is_reliable: bool,
}

impl NetworkStatus {
    /// Online status with the given link, quality unknown.
    pub const fn online(connection_type: ConnectionType) -> Self {
        Self {
            is_online: true,
            connection_type,
            effective_type: EffectiveType::Unknown,
            downlink_mbps: None,
            rtt_ms: None,
            is_reliable: true,
        }
    }

    pub const fn offline() -> Self {
        Self {
            is_online: false,
            connection_type: ConnectionType::Unknown,
            effective_type: EffectiveType::Unknown,
            downlink_mbps: None,
            rtt_ms: None,
            is_reliable: false,
        }
    }

    #[must_use]
    pub fn with_quality(
        mut self,
        effective_type: EffectiveType,
        downlink_mbps: Option<f64>,
        rtt_ms: Option<u32>,
    ) -> Self {
        self.effective_type = effective_type;
        self.downlink_mbps = downlink_mbps;
        self.rtt_ms = rtt_ms;
        self.normalized()
    }

    /// Recompute `is_reliable` from the other fields.
    #[must_use]
    pub const fn normalized(mut self) -> Self {
        self.is_reliable = self.is_online && !matches!(self.effective_type, EffectiveType::Slow2G);
        self
    }

    /// Whether moving from `self` to `next` is a notifiable transition.
    pub fn is_transition_to(&self, next: &Self) -> bool {
        self.is_online != next.is_online || self.connection_type != next.connection_type
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::offline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliability_is_derived() {
        let status = NetworkStatus::online(ConnectionType::Cellular).with_quality(
            EffectiveType::Slow2G,
            Some(0.03),
            Some(2500),
        );
        assert!(status.is_online);
        assert!(!status.is_reliable);

        let status = status.with_quality(EffectiveType::FourG, Some(12.0), Some(40));
        assert!(status.is_reliable);
        assert!(!NetworkStatus::offline().normalized().is_reliable);
    }

    #[test]
    fn test_transition_detection() {
        let wifi = NetworkStatus::online(ConnectionType::Wifi);
        let cellular = NetworkStatus::online(ConnectionType::Cellular);
        let slower = wifi.with_quality(EffectiveType::ThreeG, None, Some(400));

        assert!(wifi.is_transition_to(&cellular));
        assert!(wifi.is_transition_to(&NetworkStatus::offline()));
        assert!(!wifi.is_transition_to(&slower));
    }
}
