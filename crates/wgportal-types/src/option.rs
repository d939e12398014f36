// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};

/// A peer setting that either follows the interface defaults or was set
/// explicitly by a user.
///
/// Interface defaults are pushed with [`ConfigOption::try_set_default`],
/// which leaves [`ConfigOption::Custom`] values untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "value", rename_all = "snake_case")]
pub enum ConfigOption<T> {
    /// Inherited from the interface's peer defaults.
    Default(T),
    /// Explicitly set; never overwritten by defaults.
    Custom(T),
}

impl<T> ConfigOption<T> {
    /// The current value regardless of where it came from.
    pub fn value(&self) -> &T {
        match self {
            Self::Default(v) | Self::Custom(v) => v,
        }
    }

    /// Consume the option and return its value.
    pub fn into_value(self) -> T {
        match self {
            Self::Default(v) | Self::Custom(v) => v,
        }
    }

    /// Whether the value was set explicitly.
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }

    /// Replace the value with an interface default unless it is custom.
    /// Returns `true` if the value was written.
    pub fn try_set_default(&mut self, value: T) -> bool {
        match self {
            Self::Default(current) => {
                *current = value;
                true
            }
            Self::Custom(_) => false,
        }
    }

    /// Set the value explicitly.
    pub fn set_custom(&mut self, value: T) {
        *self = Self::Custom(value);
    }
}

impl<T: Default> Default for ConfigOption<T> {
    fn default() -> Self {
        Self::Default(T::default())
    }
}
