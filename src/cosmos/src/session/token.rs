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

use crate::constants::PARTITION_TOKEN_SEPARATOR;
use std::collections::BTreeMap;
use std::str::FromStr;

const SEGMENT_SEPARATOR: char = '#';
const REGION_SEPARATOR: char = '=';

/// The error returned when parsing session tokens.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionTokenError {
    #[error("the session token is empty")]
    Empty,
    #[error("the session token `{0}` is missing the partition key range id")]
    MissingPartition(String),
    #[error("cannot parse `{value}` as the {field} of a session token")]
    InvalidNumber { field: &'static str, value: String },
    #[error("cannot parse `{0}` as a regional progress marker")]
    InvalidRegion(String),
}

/// The progress marker of one partition key range.
///
/// A replica can serve a read in a session if it has caught up with the
/// token. Tokens use the vector format
/// `{version}#{global lsn}[#{region id}={local lsn}]*`. The older format,
/// a single LSN, is also accepted.
///
/// # Example
/// ```
/// # use cosmos_consistency::session::SessionToken;
/// let token: SessionToken = "1#100#1=20#2=30".parse()?;
/// assert_eq!(token.version(), 1);
/// assert_eq!(token.global_lsn(), 100);
/// assert_eq!(token.region_lsn(2), Some(30));
/// assert_eq!(token.to_string(), "1#100#1=20#2=30");
/// # Ok::<(), cosmos_consistency::session::SessionTokenError>(())
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionToken {
    version: u64,
    global_lsn: u64,
    local_lsn_by_region: BTreeMap<u32, u64>,
    vector: bool,
}

impl SessionToken {
    /// Creates a token in the vector format.
    pub fn new(version: u64, global_lsn: u64) -> Self {
        Self {
            version,
            global_lsn,
            local_lsn_by_region: BTreeMap::new(),
            vector: true,
        }
    }

    pub fn with_region_lsn(mut self, region: u32, lsn: u64) -> Self {
        self.local_lsn_by_region.insert(region, lsn);
        self
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn global_lsn(&self) -> u64 {
        self.global_lsn
    }

    pub fn region_lsn(&self, region: u32) -> Option<u64> {
        self.local_lsn_by_region.get(&region).copied()
    }

    /// Combines the progress of two tokens for the same partition.
    ///
    /// The result uses the regions of the token with the higher version, and
    /// the maximum LSN observed for each region and globally. Merging never
    /// moves a token backwards.
    pub fn merge(&self, other: &SessionToken) -> SessionToken {
        let (higher, lower) = if other.version > self.version {
            (other, self)
        } else {
            (self, other)
        };
        let local_lsn_by_region = higher
            .local_lsn_by_region
            .iter()
            .map(|(region, lsn)| {
                let lsn = lower
                    .local_lsn_by_region
                    .get(region)
                    .map_or(*lsn, |other| (*lsn).max(*other));
                (*region, lsn)
            })
            .collect();
        SessionToken {
            version: higher.version,
            global_lsn: self.global_lsn.max(other.global_lsn),
            local_lsn_by_region,
            vector: self.vector || other.vector,
        }
    }

    /// Parses a session token header returned by the service.
    ///
    /// Returns the partition key range id and the token.
    pub fn parse_response_token(
        value: &str,
    ) -> Result<(String, SessionToken), SessionTokenError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(SessionTokenError::Empty);
        }
        match value.split_once(PARTITION_TOKEN_SEPARATOR) {
            Some((partition, token)) if !partition.is_empty() => {
                Ok((partition.to_string(), token.parse()?))
            }
            _ => Err(SessionTokenError::MissingPartition(value.to_string())),
        }
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<u64, SessionTokenError> {
    value.parse().map_err(|_| SessionTokenError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

impl FromStr for SessionToken {
    type Err = SessionTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SessionTokenError::Empty);
        }
        let mut segments = s.split(SEGMENT_SEPARATOR);
        let first = segments.next().unwrap_or_default();
        let Some(global) = segments.next() else {
            // The single LSN format.
            let global_lsn = parse_number("lsn", first)?;
            return Ok(Self {
                version: 0,
                global_lsn,
                local_lsn_by_region: BTreeMap::new(),
                vector: false,
            });
        };
        let mut token = SessionToken::new(
            parse_number("version", first)?,
            parse_number("global lsn", global)?,
        );
        for segment in segments {
            let (region, lsn) = segment
                .split_once(REGION_SEPARATOR)
                .ok_or_else(|| SessionTokenError::InvalidRegion(segment.to_string()))?;
            let region = region
                .parse::<u32>()
                .map_err(|_| SessionTokenError::InvalidRegion(segment.to_string()))?;
            token
                .local_lsn_by_region
                .insert(region, parse_number("local lsn", lsn)?);
        }
        Ok(token)
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.vector {
            return write!(f, "{}", self.global_lsn);
        }
        write!(f, "{}{SEGMENT_SEPARATOR}{}", self.version, self.global_lsn)?;
        for (region, lsn) in &self.local_lsn_by_region {
            write!(f, "{SEGMENT_SEPARATOR}{region}{REGION_SEPARATOR}{lsn}")?;
        }
        Ok(())
    }
}
