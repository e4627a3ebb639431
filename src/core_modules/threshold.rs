// THEORY:
// Threshold profiles turn the continuous signal into a single yes/no alarm.
//
// A profile names up to nine bounds, one per monitored signal: the decayed hue,
// saturation and value and their first and second derivatives. A missing bound
// means the signal is not watched. The sign of a bound picks its direction:
// a non-negative bound fires when the signal rises to meet it, a negative bound
// fires when the signal falls to meet it.
//
// The alarm is the AND of every configured bound. Each watched signal must be
// past its bound at the same time; one signal crossing alone does not alarm.
// A profile with no bounds at all never alarms.

use crate::core_modules::signal_analyzer::SignalSnapshot;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThresholdProfile {
    pub name: String,
    pub h_decay: Option<f64>,
    pub s_decay: Option<f64>,
    pub v_decay: Option<f64>,
    pub dh: Option<f64>,
    pub ds: Option<f64>,
    pub dv: Option<f64>,
    pub ddh: Option<f64>,
    pub dds: Option<f64>,
    pub ddv: Option<f64>,
}

impl ThresholdProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Bounds paired with the snapshot values they apply to.
    fn pairs(&self, snapshot: &SignalSnapshot) -> [(Option<f64>, f64); 9] {
        [
            (self.h_decay, snapshot.decay.h),
            (self.s_decay, snapshot.decay.s),
            (self.v_decay, snapshot.decay.v),
            (self.dh, snapshot.first_derivative.h),
            (self.ds, snapshot.first_derivative.s),
            (self.dv, snapshot.first_derivative.v),
            (self.ddh, snapshot.second_derivative.h),
            (self.dds, snapshot.second_derivative.s),
            (self.ddv, snapshot.second_derivative.v),
        ]
    }

    pub fn configured_count(&self) -> usize {
        self.pairs(&SignalSnapshot::default())
            .iter()
            .filter(|(bound, _)| bound.is_some())
            .count()
    }
}

/// Evaluates profiles against signal snapshots.
pub struct ThresholdEvaluator;

impl ThresholdEvaluator {
    /// True when every configured bound of `profile` is met by `snapshot`.
    pub fn evaluate(profile: &ThresholdProfile, snapshot: &SignalSnapshot) -> bool {
        let mut configured = 0;
        for (bound, value) in profile.pairs(snapshot) {
            let Some(bound) = bound else {
                continue;
            };
            configured += 1;
            if !bound_met(bound, value) {
                return false;
            }
        }
        configured > 0
    }

    /// Like `evaluate`, but a missing profile never alarms.
    pub fn evaluate_optional(profile: Option<&ThresholdProfile>, snapshot: &SignalSnapshot) -> bool {
        profile.is_some_and(|p| Self::evaluate(p, snapshot))
    }
}

/// `value >= bound` for non-negative bounds, `value <= bound` for negative ones.
pub fn bound_met(bound: f64, value: f64) -> bool {
    if bound >= 0.0 {
        value >= bound
    } else {
        value <= bound
    }
}

/// Already-parsed profiles, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, ThresholdProfile>,
    /// Names in the order they were first inserted.
    order: Vec<String>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a profile under its name.
    pub fn insert(&mut self, profile: ThresholdProfile) {
        if !self.profiles.contains_key(&profile.name) {
            self.order.push(profile.name.clone());
        }
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn get(&self, name: &str) -> Option<&ThresholdProfile> {
        self.profiles.get(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl FromIterator<ThresholdProfile> for ProfileRegistry {
    fn from_iter<I: IntoIterator<Item = ThresholdProfile>>(iter: I) -> Self {
        let mut registry = Self::new();
        for profile in iter {
            registry.insert(profile);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::signal_analyzer::Triple;

    fn snapshot(h_decay: f64, dh: f64) -> SignalSnapshot {
        SignalSnapshot {
            decay: Triple::new(h_decay, 0.0, 0.0),
            first_derivative: Triple::new(dh, 0.0, 0.0),
            second_derivative: Triple::default(),
        }
    }

    #[test]
    fn sign_selects_direction() {
        assert!(bound_met(5.0, 5.0));
        assert!(!bound_met(5.0, 4.99));
        assert!(bound_met(-5.0, -5.0));
        assert!(!bound_met(-5.0, -4.99));
        assert!(bound_met(0.0, 0.0));
    }

    #[test]
    fn all_configured_bounds_must_fire() {
        let profile = ThresholdProfile {
            h_decay: Some(4.5),
            dh: Some(0.1),
            ..ThresholdProfile::new("drift")
        };
        assert!(!ThresholdEvaluator::evaluate(&profile, &snapshot(5.0, 0.0)));
        assert!(!ThresholdEvaluator::evaluate(&profile, &snapshot(1.0, 0.5)));
        assert!(ThresholdEvaluator::evaluate(&profile, &snapshot(5.0, 0.5)));
    }

    #[test]
    fn empty_profile_never_alarms() {
        let profile = ThresholdProfile::new("idle");
        assert_eq!(profile.configured_count(), 0);
        assert!(!ThresholdEvaluator::evaluate(&profile, &snapshot(1e9, 1e9)));
        assert!(!ThresholdEvaluator::evaluate_optional(None, &snapshot(1e9, 1e9)));
    }

    #[test]
    fn registry_keeps_insertion_order_and_replaces_by_name() {
        let mut registry: ProfileRegistry = [
            ThresholdProfile::new("fast"),
            ThresholdProfile::new("slow"),
        ]
        .into_iter()
        .collect();
        registry.insert(ThresholdProfile {
            v_decay: Some(-3.0),
            ..ThresholdProfile::new("fast")
        });
        assert_eq!(registry.names(), ["fast".to_string(), "slow".to_string()]);
        assert_eq!(registry.get("fast").unwrap().v_decay, Some(-3.0));
        assert!(registry.get("missing").is_none());
    }
}
