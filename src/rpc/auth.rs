// In: src/rpc/auth.rs

//! Handshake authentication and per-call session checks.

use arrow_flight::HandshakeRequest;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tonic::metadata::MetadataMap;

use crate::error::{IntegrityError, Result};

/// The only handshake protocol version this service speaks.
pub const PROTOCOL_VERSION: u64 = 1;

pub const AUTHORIZATION_HEADER: &str = "authorization";
const BEARER_PREFIX: &str = "Bearer ";

/// Live sessions kept by an authenticator built with `Authenticator::new`.
pub const DEFAULT_MAX_SESSIONS: usize = 1024;
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Checks handshake credentials and remembers the sessions it handed out.
///
/// With no configured token every handshake succeeds and calls need no
/// session. A session expires `ttl` after its handshake; at most
/// `max_sessions` are live, and a new handshake beyond that evicts the
/// oldest.
#[derive(Debug)]
pub struct Authenticator {
    token: Option<String>,
    max_sessions: usize,
    ttl: Duration,
    sessions: RwLock<HashMap<String, Instant>>,
}

impl Authenticator {
    pub fn new(token: Option<String>) -> Self {
        Self::with_limits(token, DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TTL)
    }

    pub fn with_limits(token: Option<String>, max_sessions: usize, ttl: Duration) -> Self {
        Self {
            token,
            max_sessions: max_sessions.max(1),
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn live_sessions(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Validates one handshake request and returns a fresh session token.
    pub fn handshake(&self, request: &HandshakeRequest) -> Result<String> {
        if request.protocol_version != PROTOCOL_VERSION {
            return Err(IntegrityError::Unsupported(format!(
                "protocol version {} is not supported, expected {PROTOCOL_VERSION}",
                request.protocol_version
            )));
        }
        if let Some(expected) = &self.token {
            if request.payload.as_ref() != expected.as_bytes() {
                return Err(IntegrityError::Unauthenticated(
                    "handshake token rejected".to_string(),
                ));
            }
        }
        let session = format!("{:032x}", rand::random::<u128>());
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        sessions.retain(|_, issued| now.duration_since(*issued) < self.ttl);
        if sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, issued)| **issued)
                .map(|(s, _)| s.clone());
            if let Some(oldest) = oldest {
                sessions.remove(&oldest);
            }
        }
        sessions.insert(session.clone(), now);
        log::debug!("handshake accepted, {} live sessions", sessions.len());
        Ok(session)
    }

    /// Accepts a call if auth is disabled or it carries a known session.
    pub fn check(&self, metadata: &MetadataMap) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let session = metadata
            .get(AUTHORIZATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix(BEARER_PREFIX))
            .ok_or_else(|| {
                IntegrityError::Unauthenticated("missing bearer session".to_string())
            })?;
        let issued = self.sessions.read().get(session).copied();
        match issued {
            Some(issued) if issued.elapsed() < self.ttl => Ok(()),
            Some(_) => {
                self.sessions.write().remove(session);
                Err(IntegrityError::Unauthenticated("session expired".to_string()))
            }
            None => Err(IntegrityError::Unauthenticated("unknown session".to_string())),
        }
    }
}

/// The header value a client sends for `session`.
pub fn bearer(session: &str) -> String {
    format!("{BEARER_PREFIX}{session}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    fn request(version: u64, payload: &str) -> HandshakeRequest {
        HandshakeRequest {
            protocol_version: version,
            payload: payload.as_bytes().to_vec().into(),
        }
    }

    #[test]
    fn test_session_from_handshake_authorizes_calls() {
        let auth = Authenticator::new(Some("s3cret".to_string()));
        let session = auth.handshake(&request(PROTOCOL_VERSION, "s3cret")).unwrap();

        let mut metadata = MetadataMap::new();
        metadata.insert(
            AUTHORIZATION_HEADER,
            MetadataValue::try_from(bearer(&session)).unwrap(),
        );

        assert!(auth.check(&metadata).is_ok());
        assert!(matches!(
            auth.check(&MetadataMap::new()),
            Err(IntegrityError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_bad_token_and_bad_version_are_rejected() {
        let auth = Authenticator::new(Some("s3cret".to_string()));

        let bad_token = auth.handshake(&request(PROTOCOL_VERSION, "guess"));
        let bad_version = auth.handshake(&request(99, "s3cret"));

        assert!(matches!(bad_token, Err(IntegrityError::Unauthenticated(_))));
        assert!(matches!(bad_version, Err(IntegrityError::Unsupported(_))));
    }

    fn authorized(session: &str) -> MetadataMap {
        let mut metadata = MetadataMap::new();
        metadata.insert(
            AUTHORIZATION_HEADER,
            MetadataValue::try_from(bearer(session)).unwrap(),
        );
        metadata
    }

    #[test]
    fn test_sessions_are_capped_oldest_first() {
        // 1. Arrange
        let auth = Authenticator::with_limits(Some("s3cret".to_string()), 2, DEFAULT_SESSION_TTL);

        // 2. Act
        let first = auth.handshake(&request(PROTOCOL_VERSION, "s3cret")).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let second = auth.handshake(&request(PROTOCOL_VERSION, "s3cret")).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let third = auth.handshake(&request(PROTOCOL_VERSION, "s3cret")).unwrap();

        // 3. Assert
        assert_eq!(auth.live_sessions(), 2);
        assert!(auth.check(&authorized(&first)).is_err());
        assert!(auth.check(&authorized(&second)).is_ok());
        assert!(auth.check(&authorized(&third)).is_ok());
    }

    #[test]
    fn test_expired_session_is_rejected_and_dropped() {
        let auth = Authenticator::with_limits(Some("s3cret".to_string()), 8, Duration::ZERO);
        let session = auth.handshake(&request(PROTOCOL_VERSION, "s3cret")).unwrap();

        let res = auth.check(&authorized(&session));

        assert!(matches!(res, Err(IntegrityError::Unauthenticated(_))));
        assert_eq!(auth.live_sessions(), 0);
    }

    #[test]
    fn test_disabled_auth_accepts_everything() {
        let auth = Authenticator::new(None);
        assert!(auth.handshake(&request(PROTOCOL_VERSION, "")).is_ok());
        assert!(auth.check(&MetadataMap::new()).is_ok());
    }
}
