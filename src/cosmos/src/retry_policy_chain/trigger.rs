// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// Tracks a recovery action that may run at most once per logical request.
///
/// The recovery starts [Armed][RecoveryTrigger::Armed]. The first matching
/// failure fires it, moving it to [Triggered][RecoveryTrigger::Triggered].
/// Any later matching failure, or a recovery that did not help, moves it to
/// [Exhausted][RecoveryTrigger::Exhausted]. There is no transition back to
/// `Armed`.
///
/// # Example
/// ```
/// # use cosmos_consistency::retry_policy_chain::RecoveryTrigger;
/// let mut trigger = RecoveryTrigger::default();
/// assert!(trigger.fire());
/// assert!(trigger.is_triggered());
/// assert!(!trigger.fire());
/// assert!(trigger.is_exhausted());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecoveryTrigger {
    #[default]
    Armed,
    Triggered,
    Exhausted,
}

impl RecoveryTrigger {
    pub fn is_armed(&self) -> bool {
        matches!(self, Self::Armed)
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self, Self::Triggered)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }

    /// Fires the trigger.
    ///
    /// Returns true if the trigger was armed, and the caller should run the
    /// recovery. Otherwise the trigger becomes exhausted.
    pub fn fire(&mut self) -> bool {
        match self {
            Self::Armed => {
                *self = Self::Triggered;
                true
            }
            Self::Triggered | Self::Exhausted => {
                *self = Self::Exhausted;
                false
            }
        }
    }

    /// The recovery ran and did not help.
    pub fn exhaust(&mut self) {
        *self = Self::Exhausted;
    }
}
