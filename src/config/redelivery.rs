//! Redelivery policy for rolled-back and recovered messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ConfigError;

/// Rules for delaying and bounding redelivery of a message that was rolled
/// back or left unacknowledged.
///
/// Defaults follow the broker's own: one second before the first
/// redelivery, six redeliveries before the message is dead-lettered, a
/// backoff multiplier of five (only used when exponential backoff is on)
/// and 15 % jitter when collision avoidance is on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedeliveryPolicy {
    /// Delay before the first redelivery.
    #[serde(with = "millis")]
    pub initial_redelivery_delay: Duration,
    /// Delay between later redeliveries when backoff is off.
    #[serde(with = "millis")]
    pub redelivery_delay: Duration,
    /// Upper bound for exponential backoff; `None` means unbounded.
    #[serde(with = "option_millis")]
    pub maximum_redelivery_delay: Option<Duration>,
    /// Redeliveries allowed before dead-lettering; `-1` means unlimited.
    pub maximum_redeliveries: i32,
    pub use_exponential_backoff: bool,
    pub backoff_multiplier: f64,
    pub use_collision_avoidance: bool,
    pub collision_avoidance_percent: u8,
    /// Check the redelivery count before dispatch rather than after.
    pub pre_dispatch_check: bool,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            initial_redelivery_delay: Duration::from_millis(1000),
            redelivery_delay: Duration::from_millis(1000),
            maximum_redelivery_delay: None,
            maximum_redeliveries: 6,
            use_exponential_backoff: false,
            backoff_multiplier: 5.0,
            use_collision_avoidance: false,
            collision_avoidance_percent: 15,
            pre_dispatch_check: true,
        }
    }
}

impl RedeliveryPolicy {
    /// A policy that redelivers immediately with no upper bound on attempts.
    pub fn immediate() -> Self {
        Self {
            initial_redelivery_delay: Duration::ZERO,
            redelivery_delay: Duration::ZERO,
            maximum_redeliveries: -1,
            ..Self::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_redelivery_delay = delay;
        self
    }

    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    pub fn with_maximum_delay(mut self, delay: Duration) -> Self {
        self.maximum_redelivery_delay = Some(delay);
        self
    }

    pub fn with_maximum_redeliveries(mut self, maximum: i32) -> Self {
        self.maximum_redeliveries = maximum;
        self
    }

    /// Enable exponential backoff with the given multiplier.
    pub fn with_exponential_backoff(mut self, multiplier: f64) -> Self {
        self.use_exponential_backoff = true;
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable collision avoidance with the given jitter percentage.
    pub fn with_collision_avoidance(mut self, percent: u8) -> Self {
        self.use_collision_avoidance = true;
        self.collision_avoidance_percent = percent;
        self
    }

    /// Compute the delay that follows `previous`.
    ///
    /// Without exponential backoff (or on the first step, when `previous`
    /// is zero) this is `redelivery_delay`. With backoff the previous delay
    /// is multiplied and capped by `maximum_redelivery_delay`.
    pub fn next_delay(&self, previous: Duration) -> Duration {
        self.jitter(self.scheduled_after(previous))
    }

    /// Delay before redelivery attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.jitter(self.initial_redelivery_delay);
        }
        let mut delay = self.initial_redelivery_delay;
        for _ in 1..attempt {
            let next = self.scheduled_after(delay);
            if next == delay {
                break;
            }
            delay = next;
        }
        self.jitter(delay)
    }

    /// Whether a message redelivered `redelivery_count` times has run out
    /// of attempts.
    pub fn exceeded(&self, redelivery_count: u32) -> bool {
        self.maximum_redeliveries >= 0 && redelivery_count as i64 > self.maximum_redeliveries as i64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collision_avoidance_percent > 100 {
            return Err(ConfigError::InvalidRedeliveryPolicy(format!(
                "collision avoidance percent {} exceeds 100",
                self.collision_avoidance_percent
            )));
        }
        if self.maximum_redeliveries < -1 {
            return Err(ConfigError::InvalidRedeliveryPolicy(format!(
                "maximum redeliveries {} is below -1",
                self.maximum_redeliveries
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 0.0 {
            return Err(ConfigError::InvalidRedeliveryPolicy(
                "backoff multiplier must be positive".into(),
            ));
        }
        Ok(())
    }

    fn scheduled_after(&self, previous: Duration) -> Duration {
        if previous.is_zero() || !self.use_exponential_backoff || self.backoff_multiplier <= 1.0 {
            return self.redelivery_delay;
        }
        let next = scale(previous, self.backoff_multiplier);
        match self.maximum_redelivery_delay {
            Some(cap) if next > cap => cap.max(self.redelivery_delay),
            _ => next,
        }
    }

    fn jitter(&self, delay: Duration) -> Duration {
        if !self.use_collision_avoidance || delay.is_zero() {
            return delay;
        }
        let factor = self.collision_avoidance_percent as f64 / 100.0;
        let bits = Uuid::new_v4().as_u128();
        let fraction = (bits as u64 & ((1u64 << 53) - 1)) as f64 / (1u64 << 53) as f64;
        let sign = if bits >> 127 == 1 { 1.0 } else { -1.0 };
        let variance = sign * factor * fraction;
        scale(delay, (1.0 + variance).max(0.0))
    }
}

/// `delay * factor`, saturating at `Duration::MAX` instead of panicking.
fn scale(delay: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

pub(crate) mod option_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
