//! Shared-PIN access gate with bcrypt.
//!
//! The whole workshop shares one access PIN. A bcrypt hash set with
//! [`setup_pin`] lives in `local_settings` (category `auth`); until one is
//! stored, the configured default PIN unlocks. Failed attempts are counted
//! in the same table so a lockout survives a restart. The session is kept
//! in memory and carries no identity.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::db;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_FAILED_ATTEMPTS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const MIN_PIN_LEN: usize = 4;
const AUTH_CATEGORY: &str = "auth";
const PIN_HASH_KEY: &str = "pin_hash";
const LOCKOUT_ATTEMPTS_KEY: &str = "lockout_attempts";
const LOCKOUT_LAST_ATTEMPT_KEY: &str = "lockout_last_attempt";

#[cfg(not(test))]
const PIN_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const PIN_HASH_COST: u32 = 4;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Session {
    session_id: String,
    login_time: DateTime<Utc>,
}

struct LockoutEntry {
    attempts: u32,
    last_attempt: DateTime<Utc>,
}

/// In-memory gate state.
pub struct AuthState {
    session: Mutex<Option<Session>>,
    lockout: Mutex<LockoutEntry>,
    default_pin: Zeroizing<String>,
}

impl AuthState {
    pub fn new(default_pin: &str) -> Self {
        Self {
            session: Mutex::new(None),
            lockout: Mutex::new(LockoutEntry {
                attempts: 0,
                last_attempt: Utc::now(),
            }),
            default_pin: Zeroizing::new(default_pin.to_string()),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lockout(&self) -> MutexGuard<'_, LockoutEntry> {
        self.lockout
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Lockout
// ---------------------------------------------------------------------------

fn check_lockout(lockout: &mut LockoutEntry) -> Result<(), String> {
    if lockout.attempts >= MAX_FAILED_ATTEMPTS {
        let elapsed = Utc::now() - lockout.last_attempt;
        if elapsed < Duration::minutes(LOCKOUT_MINUTES) {
            let remaining = (LOCKOUT_MINUTES - elapsed.num_minutes()).max(1);
            return Err(format!(
                "Too many failed attempts. Try again in {remaining} minute(s)."
            ));
        }
        // window over: start counting again
        lockout.attempts = 0;
    }
    Ok(())
}

fn record_failure(lockout: &mut LockoutEntry) {
    lockout.attempts += 1;
    lockout.last_attempt = Utc::now();
    warn!(attempts = lockout.attempts, "failed login attempt");
}

fn reset_lockout(lockout: &mut LockoutEntry) {
    lockout.attempts = 0;
    lockout.last_attempt = Utc::now();
}

fn load_lockout_from_db(conn: &rusqlite::Connection) -> LockoutEntry {
    let attempts = db::get_setting(conn, AUTH_CATEGORY, LOCKOUT_ATTEMPTS_KEY)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    let last_attempt = db::get_setting(conn, AUTH_CATEGORY, LOCKOUT_LAST_ATTEMPT_KEY)
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    LockoutEntry {
        attempts,
        last_attempt,
    }
}

fn persist_lockout_to_db(conn: &rusqlite::Connection, lockout: &LockoutEntry) {
    let writes = db::set_setting(
        conn,
        AUTH_CATEGORY,
        LOCKOUT_ATTEMPTS_KEY,
        &lockout.attempts.to_string(),
    )
    .and_then(|_| {
        db::set_setting(
            conn,
            AUTH_CATEGORY,
            LOCKOUT_LAST_ATTEMPT_KEY,
            &lockout.last_attempt.to_rfc3339(),
        )
    });
    if let Err(e) = writes {
        warn!(error = %e, "failed to persist lockout state");
    }
}

fn validate_pin(pin: &str) -> Result<(), String> {
    if pin.len() < MIN_PIN_LEN {
        return Err(format!("PIN must be at least {MIN_PIN_LEN} digits"));
    }
    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err("PIN must contain only digits".into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Public operations
// ---------------------------------------------------------------------------

/// Check `pin` and open the session.
pub fn login(db: &db::DbState, auth: &AuthState, pin: &str) -> Result<Value, String> {
    let pin = Zeroizing::new(pin.trim().to_string());
    if pin.is_empty() {
        return Err("PIN is required".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut lockout = auth.lockout();
    *lockout = load_lockout_from_db(&conn);
    check_lockout(&mut lockout)?;

    let matches = match db::get_setting(&conn, AUTH_CATEGORY, PIN_HASH_KEY) {
        Some(hash) => bcrypt::verify(pin.as_str(), &hash).unwrap_or(false),
        None => pin.as_str() == auth.default_pin.as_str(),
    };

    if !matches {
        record_failure(&mut lockout);
        persist_lockout_to_db(&conn, &lockout);
        return Err("Wrong PIN. Try again.".into());
    }

    reset_lockout(&mut lockout);
    persist_lockout_to_db(&conn, &lockout);

    let session = Session {
        session_id: Uuid::new_v4().to_string(),
        login_time: Utc::now(),
    };
    let result = json!({
        "success": true,
        "sessionId": session.session_id,
        "loginTime": session.login_time.to_rfc3339(),
    });
    *auth.session() = Some(session);
    info!("login successful");
    Ok(result)
}

pub fn logout(auth: &AuthState) {
    if let Some(session) = auth.session().take() {
        info!(session_id = %session.session_id, "logged out");
    }
}

pub fn is_authorized(auth: &AuthState) -> bool {
    auth.session().is_some()
}

/// Replace the access PIN with a bcrypt hash of `pin`.
pub fn setup_pin(db: &db::DbState, pin: &str) -> Result<Value, String> {
    let pin = Zeroizing::new(pin.trim().to_string());
    validate_pin(&pin)?;
    let hash = bcrypt::hash(pin.as_str(), PIN_HASH_COST)
        .map_err(|e| format!("Failed to hash PIN: {e}"))?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, AUTH_CATEGORY, PIN_HASH_KEY, &hash)?;
    info!("access PIN set");
    Ok(json!({ "success": true }))
}

/// Gate status for the UI.
pub fn status(db: &db::DbState, auth: &AuthState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let pin_configured = db::get_setting(&conn, AUTH_CATEGORY, PIN_HASH_KEY).is_some();
    let mut lockout = load_lockout_from_db(&conn);
    let locked_out = check_lockout(&mut lockout).is_err();
    let session = auth.session().clone();
    Ok(json!({
        "authorized": session.is_some(),
        "sessionId": session.as_ref().map(|s| s.session_id.clone()),
        "loginTime": session.as_ref().map(|s| s.login_time.to_rfc3339()),
        "pinConfigured": pin_configured,
        "lockedOut": locked_out,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lockout_attempts(db_state: &db::DbState) -> u32 {
        let conn = db_state.conn.lock().expect("db lock");
        db::get_setting(&conn, AUTH_CATEGORY, LOCKOUT_ATTEMPTS_KEY)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0)
    }

    #[test]
    fn default_pin_unlocks_until_a_hash_is_stored() {
        let db_state = db::DbState::open_in_memory().unwrap();
        let auth = AuthState::new("2828");
        assert!(!is_authorized(&auth));

        login(&db_state, &auth, "2828").expect("default pin");
        assert!(is_authorized(&auth));
        logout(&auth);
        assert!(!is_authorized(&auth));

        setup_pin(&db_state, "4321").unwrap();
        assert_eq!(login(&db_state, &auth, "2828").unwrap_err(), "Wrong PIN. Try again.");
        login(&db_state, &auth, " 4321 ").expect("stored pin");
        assert!(is_authorized(&auth));

        let status = status(&db_state, &auth).unwrap();
        assert_eq!(status["authorized"], true);
        assert_eq!(status["pinConfigured"], true);
        assert_eq!(status["lockedOut"], false);
    }

    #[test]
    fn setup_pin_validates() {
        let db_state = db::DbState::open_in_memory().unwrap();
        assert!(setup_pin(&db_state, "12").is_err());
        assert!(setup_pin(&db_state, "12a4").is_err());
        assert!(setup_pin(&db_state, "123456").is_ok());

        let conn = db_state.conn.lock().unwrap();
        let hash = db::get_setting(&conn, AUTH_CATEGORY, PIN_HASH_KEY).unwrap();
        assert_ne!(hash, "123456");
        assert!(bcrypt::verify("123456", &hash).unwrap());
    }

    #[test]
    fn lockout_persists_across_auth_state_restart() {
        let db_state = db::DbState::open_in_memory().unwrap();
        let before_restart = AuthState::new("2828");

        for _ in 0..MAX_FAILED_ATTEMPTS {
            let err = login(&db_state, &before_restart, "9999").expect_err("wrong pin");
            assert_eq!(err, "Wrong PIN. Try again.");
        }
        assert_eq!(lockout_attempts(&db_state), MAX_FAILED_ATTEMPTS);

        let after_restart = AuthState::new("2828");
        let err = login(&db_state, &after_restart, "2828").expect_err("still locked");
        assert!(err.contains("Too many failed attempts"), "unexpected: {err}");
        assert_eq!(lockout_attempts(&db_state), MAX_FAILED_ATTEMPTS);
        assert!(!is_authorized(&after_restart));
        assert_eq!(status(&db_state, &after_restart).unwrap()["lockedOut"], true);
    }

    #[test]
    fn expired_lockout_allows_login_and_resets() {
        let db_state = db::DbState::open_in_memory().unwrap();
        {
            let conn = db_state.conn.lock().unwrap();
            persist_lockout_to_db(
                &conn,
                &LockoutEntry {
                    attempts: MAX_FAILED_ATTEMPTS,
                    last_attempt: Utc::now() - Duration::minutes(LOCKOUT_MINUTES + 1),
                },
            );
        }
        let auth = AuthState::new("2828");
        login(&db_state, &auth, "2828").expect("lockout window is over");
        assert_eq!(lockout_attempts(&db_state), 0);
    }

    #[test]
    fn failures_below_the_limit_reset_on_success() {
        let db_state = db::DbState::open_in_memory().unwrap();
        let auth = AuthState::new("2828");
        for _ in 0..2 {
            assert!(login(&db_state, &auth, "0000").is_err());
        }
        assert_eq!(lockout_attempts(&db_state), 2);
        login(&db_state, &auth, "2828").unwrap();
        assert_eq!(lockout_attempts(&db_state), 0);
        assert!(login(&db_state, &auth, "").is_err());
    }
}
