use serde_json::Value;

use super::require_login;
use crate::{auth, payload_or_key, value_str, App};

fn parse_pin(arg0: Option<Value>) -> Result<String, String> {
    let payload = payload_or_key(arg0, "pin");
    value_str(&payload, &["pin", "newPin", "new_pin"]).ok_or_else(|| "PIN is required".into())
}

pub async fn auth_login(arg0: Option<Value>, app: &App) -> Result<Value, String> {
    let pin = parse_pin(arg0)?;
    auth::login(&app.db, &app.auth, &pin)
}

pub async fn auth_logout(_arg0: Option<Value>, app: &App) -> Result<Value, String> {
    auth::logout(&app.auth);
    app.cancel_pull();
    Ok(serde_json::json!({ "success": true }))
}

/// Change the shared PIN. Only an open session may do this.
pub async fn auth_setup_pin(arg0: Option<Value>, app: &App) -> Result<Value, String> {
    require_login(app)?;
    let pin = parse_pin(arg0)?;
    auth::setup_pin(&app.db, &pin)
}

pub async fn auth_status(_arg0: Option<Value>, app: &App) -> Result<Value, String> {
    auth::status(&app.db, &app.auth)
}
