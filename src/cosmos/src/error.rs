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

//! The error types returned by the consistency and retry layer.

use crate::constants::{status_codes, sub_status_codes};
use crate::request::RequestContext;
use std::error::Error as StdError;
use std::time::Duration;

type BoxError = Box<dyn StdError + Send + Sync>;

/// The core error returned by the retry layer and its collaborators.
///
/// Errors come from multiple sources: the service may reject a request, the
/// transport may fail to deliver it, the request may time out, or the caller
/// may cancel the operation. This type offers predicates to classify the
/// error, and accessors for the diagnostic fields reported by the service.
///
/// The retry layer never rewrites an error it cannot recover from. If the
/// service returns a `404` with a session sub-status and recovery fails, the
/// caller receives that very `404`.
///
/// # Example
/// ```
/// use cosmos_consistency::error::{Error, ServiceError};
/// let error = Error::service(ServiceError::new(429).set_retry_after(std::time::Duration::from_millis(50)));
/// assert!(error.is_throttled());
/// assert_eq!(error.status_code(), Some(429));
/// ```
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<BoxError>,
}

impl Error {
    /// Creates an error with the information returned by the service.
    pub fn service(details: ServiceError) -> Self {
        Self {
            kind: ErrorKind::Service(Box::new(details)),
            source: None,
        }
    }

    /// A problem in the transport layer without a service response.
    ///
    /// Examples include connection resets and broken connections.
    pub fn io<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Io,
            source: Some(source.into()),
        }
    }

    /// The request could not complete before its deadline.
    pub fn timeout<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            source: Some(source.into()),
        }
    }

    /// The caller cancelled the operation.
    pub fn cancelled<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            source: Some(source.into()),
        }
    }

    /// An uncategorized problem.
    pub fn other<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Other,
            source: Some(source.into()),
        }
    }

    /// The details reported by the service, if any.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match &self.kind {
            ErrorKind::Service(d) => Some(d.as_ref()),
            _ => None,
        }
    }

    /// The HTTP status code reported by the service.
    pub fn status_code(&self) -> Option<u16> {
        self.service_error().map(|d| d.status_code)
    }

    /// The sub-status code reported by the service.
    pub fn sub_status_code(&self) -> Option<u32> {
        self.service_error().and_then(|d| d.sub_status_code)
    }

    /// The address of the resource targeted by the failed request.
    pub fn resource_address(&self) -> Option<&str> {
        self.service_error()
            .and_then(|d| d.resource_address.as_deref())
    }

    /// If true, the failed request addressed its resource by name rather than
    /// by resource id.
    pub fn is_name_based(&self) -> bool {
        self.service_error().is_some_and(|d| d.name_based)
    }

    /// The delay requested by the service before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        self.service_error().and_then(|d| d.retry_after)
    }

    /// A transport problem, the request may or may not have reached the
    /// service.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, ErrorKind::Io)
    }

    /// The request exceeded its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// The caller cancelled the operation. Never retried.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// The service rejected the request because the request rate is too
    /// large. The service did not apply the operation.
    pub fn is_throttled(&self) -> bool {
        self.status_code() == Some(status_codes::TOO_MANY_REQUESTS)
    }

    /// The service asked the client to retry the request. The service did not
    /// apply the operation.
    pub fn is_retry_with(&self) -> bool {
        self.status_code() == Some(status_codes::RETRY_WITH)
    }

    /// The replica could not serve the session token attached to the request.
    ///
    /// When the request is name-based this may indicate the collection was
    /// deleted and recreated under the same name.
    pub fn is_session_unavailable(&self) -> bool {
        self.status_code() == Some(status_codes::NOT_FOUND)
            && self.sub_status_code() == Some(sub_status_codes::READ_SESSION_NOT_AVAILABLE)
    }

    /// The error may succeed if retried.
    ///
    /// Note that some of these errors are only safe to retry for idempotent
    /// operations, see [is_retryable_for_writes][Error::is_retryable_for_writes].
    pub fn is_transient(&self) -> bool {
        match &self.kind {
            ErrorKind::Io | ErrorKind::Timeout => true,
            ErrorKind::Service(d) => matches!(
                d.status_code,
                status_codes::REQUEST_TIMEOUT
                    | status_codes::GONE
                    | status_codes::TOO_MANY_REQUESTS
                    | status_codes::RETRY_WITH
                    | status_codes::INTERNAL_SERVER_ERROR
                    | status_codes::SERVICE_UNAVAILABLE
            ),
            ErrorKind::Cancelled | ErrorKind::Other => false,
        }
    }

    /// The service guarantees the operation was not applied, so it is safe to
    /// retry even if the operation is not idempotent.
    pub fn is_retryable_for_writes(&self) -> bool {
        self.is_throttled() || self.is_retry_with()
    }

    /// Fills in the request details missing from a service error.
    ///
    /// Transports may not know whether the request was name-based, the retry
    /// policies need that information to recognize collection recreation.
    pub(crate) fn with_request(mut self, request: &RequestContext) -> Self {
        if let ErrorKind::Service(d) = &mut self.kind {
            if d.resource_address.is_none() {
                d.resource_address = Some(request.resource_address.clone());
            }
            d.name_based |= request.name_based;
        }
        self
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.source) {
            (ErrorKind::Service(d), _) => d.fmt(f),
            (ErrorKind::Io, Some(e)) => write!(f, "the transport reports an error: {e}"),
            (ErrorKind::Timeout, Some(e)) => {
                write!(f, "the request exceeded the request deadline {e}")
            }
            (ErrorKind::Cancelled, Some(e)) => write!(f, "the operation was cancelled: {e}"),
            (ErrorKind::Other, Some(e)) => {
                write!(f, "an unclassified problem making a request: {e}")
            }
            (_, None) => unreachable!("no constructor allows this"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error))
    }
}

/// The type of error held by an [Error] instance.
#[derive(Debug)]
enum ErrorKind {
    Io,
    Timeout,
    Cancelled,
    Service(Box<ServiceError>),
    /// A uncategorized error.
    Other,
}

/// The diagnostic fields of an error returned by the service.
///
/// # Example
/// ```
/// use cosmos_consistency::error::ServiceError;
/// let details = ServiceError::new(404)
///     .set_sub_status_code(1002_u32)
///     .set_resource_address("dbs/db/colls/coll/docs/doc-1")
///     .set_name_based(true);
/// assert_eq!(details.status_code, 404);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ServiceError {
    /// The HTTP status code.
    pub status_code: u16,
    /// The service-specific sub-status code.
    pub sub_status_code: Option<u32>,
    /// The address of the target resource.
    pub resource_address: Option<String>,
    /// If true, the request addressed the resource by name.
    pub name_based: bool,
    /// The delay requested by the service, typically set on throttling errors.
    pub retry_after: Option<Duration>,
    /// A human-readable description.
    pub message: String,
}

impl ServiceError {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            ..Default::default()
        }
    }

    pub fn set_sub_status_code<T: Into<u32>>(mut self, v: T) -> Self {
        self.sub_status_code = Some(v.into());
        self
    }

    pub fn set_resource_address<T: Into<String>>(mut self, v: T) -> Self {
        self.resource_address = Some(v.into());
        self
    }

    pub fn set_name_based(mut self, v: bool) -> Self {
        self.name_based = v;
        self
    }

    pub fn set_retry_after<T: Into<Duration>>(mut self, v: T) -> Self {
        self.retry_after = Some(v.into());
        self
    }

    pub fn set_message<T: Into<String>>(mut self, v: T) -> Self {
        self.message = v.into();
        self
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "the service reports an error with status {}", self.status_code)?;
        if let Some(sub) = self.sub_status_code {
            write!(f, "/{sub}")?;
        }
        if let Some(address) = &self.resource_address {
            write!(f, " for {address}")?;
        }
        if !self.message.is_empty() {
            write!(f, " described as: {}", self.message)?;
        }
        Ok(())
    }
}
